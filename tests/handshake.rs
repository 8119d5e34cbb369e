//! End-to-end handshake: rendezvous file, port exchange, reverse
//! connection, initial resize, session registration and focus.

use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ggdirect::config::{Config, ConfigStore};
use ggdirect::font::CellMetrics;
use ggdirect::protocol::{Packet, PACKET_SIZE};
use ggdirect::utils::Size;
use ggdirect::window::{DisplayInfo, Displays, SessionManager};

fn wait_for(mut done: impl FnMut() -> bool) {
    for _ in 0..400 {
        if done() {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("condition not reached within two seconds");
}

#[test]
fn client_handshake_creates_a_focused_session() {
    let dir = tempfile::tempdir().unwrap();
    let gateway = dir.path().join("gateway");

    let displays = Arc::new(Displays::new(
        1,
        [DisplayInfo {
            id: 1,
            resolution: Size::new(1920, 1080),
        }],
    ));
    let metrics = CellMetrics {
        width: 8,
        height: 16,
    };
    let config = Arc::new(ConfigStore::new(&Config::default()));
    let manager = SessionManager::new(displays, metrics, config, gateway.clone());

    let shutdown = Arc::new(AtomicBool::new(false));
    let listener_thread = manager.start_listener(shutdown.clone()).unwrap();

    // The rendezvous file holds the compositor port in ASCII decimal.
    wait_for(|| gateway.exists());
    let port: u16 = std::fs::read_to_string(&gateway)
        .unwrap()
        .trim()
        .parse()
        .unwrap();

    // Client: open a reverse listener, connect, announce our port.
    let reverse = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let reverse_port = reverse.local_addr().unwrap().port();
    let mut initial = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
    initial.write_all(&reverse_port.to_ne_bytes()).unwrap();

    // The compositor dials back, echoes the port, then sends RESIZE.
    let (mut channel, _) = reverse.accept().unwrap();
    channel
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();

    let mut echo = [0u8; 2];
    channel.read_exact(&mut echo).unwrap();
    assert_eq!(u16::from_ne_bytes(echo), reverse_port);

    let mut packet = [0u8; PACKET_SIZE];
    channel.read_exact(&mut packet).unwrap();
    match Packet::decode(&packet).unwrap() {
        Packet::Resize { width, height } => {
            // Fullscreen on 1920x1080 with 8x16 cells.
            assert_eq!(width, 240);
            assert_eq!(height, 67);
        }
        other => panic!("expected RESIZE, got {other}"),
    }

    // The session exists and took focus as the first one.
    wait_for(|| manager.session_count() == 1);
    assert!(manager.focused_id().is_some());

    shutdown.store(true, Ordering::SeqCst);
    manager.close();
    assert!(!gateway.exists());
    let _ = listener_thread.join();
}
