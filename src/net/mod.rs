//! Loopback transport for client sessions.
//!
//! All client traffic is local: the compositor listens on an OS-assigned
//! loopback port and publishes that port through a rendezvous file that
//! clients read at startup.

use std::fs;
use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::{PacketReader, ReadResult};

/// Well-known rendezvous file holding the listener port in ASCII decimal.
pub const RENDEZVOUS_PATH: &str = "/tmp/GGDirect.gateway";

/// How long handshake reads on the initial connection may block.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);

/// A non-blocking client connection with an attached packet reader.
///
/// The reader keeps partial frames across calls, so a slow client never
/// causes a frame to be re-read from offset zero.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    reader: PacketReader,
    closed: bool,
}

impl Connection {
    /// Wraps an established stream: nodelay plus non-blocking mode.
    pub fn from_stream(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        Ok(Connection {
            stream,
            reader: PacketReader::new(),
            closed: false,
        })
    }

    /// Dials `127.0.0.1:port`.
    pub fn connect(port: u16) -> io::Result<Self> {
        let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
        let stream = TcpStream::connect(addr)?;
        Connection::from_stream(stream)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        if !self.closed {
            let _ = self.stream.shutdown(std::net::Shutdown::Both);
            self.closed = true;
        }
    }

    /// Whether at least one byte is readable right now.
    pub fn has_data(&self) -> bool {
        if self.closed {
            return false;
        }
        let mut probe = [0u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => true, // orderly shutdown; let the reader observe it
            Ok(_) => true,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }

    /// Advances the framed read of `expected` bytes.
    pub fn recv_frame(&mut self, expected: usize) -> ReadResult {
        self.reader.step(expected, &mut self.stream)
    }

    /// Discards a partially accumulated frame.
    pub fn reset_reader(&mut self) {
        self.reader.reset();
    }

    /// Sends a complete buffer.
    ///
    /// The socket is non-blocking; tiny packets fit the send buffer, so a
    /// genuine `WouldBlock` here means the client stopped draining and is
    /// treated as a send failure.
    pub fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        self.stream.write_all(bytes)
    }
}

/// Raw writes for the handshake helpers; framed traffic goes through
/// [`Connection::send`].
impl Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::from(io::ErrorKind::NotConnected));
        }
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

/// The compositor-side listener plus the handshake helpers that run on the
/// short-lived initial connection.
#[derive(Debug)]
pub struct Listener {
    inner: TcpListener,
    port: u16,
}

impl Listener {
    /// Binds a loopback listener on an OS-assigned port, non-blocking.
    pub fn bind() -> io::Result<Self> {
        let inner = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
        let port = inner.local_addr()?.port();
        inner.set_nonblocking(true)?;
        debug!(port, "listener bound");
        Ok(Listener { inner, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accepts one pending connection, if any.
    ///
    /// The returned stream is blocking with a short read timeout: the
    /// handshake is sequential and must not hang the reception thread on a
    /// stalled client.
    pub fn accept(&self) -> io::Result<Option<TcpStream>> {
        match self.inner.accept() {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted client connection");
                stream.set_nonblocking(false)?;
                stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
                Ok(Some(stream))
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Publishes `port` to the rendezvous file, no trailing newline.
    pub fn write_rendezvous(&self, path: &Path) -> io::Result<()> {
        fs::write(path, format!("{}", self.port))
    }
}

/// Reads a host-endian `u16` (handshake step 2, the client's port).
pub fn recv_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut bytes = [0u8; 2];
    reader.read_exact(&mut bytes)?;
    Ok(u16::from_ne_bytes(bytes))
}

/// Writes a host-endian `u16` (the handshake echo).
pub fn send_u16<W: Write>(writer: &mut W, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_ne_bytes())
}

/// Removes the rendezvous file on shutdown; stale files would point clients
/// at a dead port.
pub fn remove_rendezvous(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        if err.kind() != io::ErrorKind::NotFound {
            warn!(?err, "failed to remove rendezvous file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Packet, PACKET_SIZE};

    #[test]
    fn rendezvous_file_contains_ascii_port() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway");
        let listener = Listener::bind().unwrap();
        listener.write_rendezvous(&path).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, listener.port().to_string());
    }

    #[test]
    fn frames_cross_a_loopback_socket() {
        let listener = Listener::bind().unwrap();
        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.port())).unwrap();

        let accepted = loop {
            if let Some(stream) = listener.accept().unwrap() {
                break stream;
            }
        };
        let mut conn = Connection::from_stream(accepted).unwrap();

        let packet = Packet::Resize {
            width: 120,
            height: 40,
        };
        client.write_all(&packet.encode()).unwrap();

        let bytes = loop {
            match conn.recv_frame(PACKET_SIZE) {
                ReadResult::Complete(bytes) => break bytes,
                ReadResult::Pending => std::thread::yield_now(),
                ReadResult::Error(err) => panic!("recv failed: {err}"),
            }
        };
        assert_eq!(Packet::decode(&bytes).unwrap(), packet);
    }

    #[test]
    fn u16_helpers_round_trip() {
        let listener = Listener::bind().unwrap();
        let mut client = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.port())).unwrap();
        let accepted = loop {
            if let Some(stream) = listener.accept().unwrap() {
                break stream;
            }
        };
        let mut conn = Connection::from_stream(accepted).unwrap();

        send_u16(&mut conn, 0xbeef).unwrap();
        assert_eq!(recv_u16(&mut client).unwrap(), 0xbeef);
    }

    #[test]
    fn peer_close_is_reported() {
        let listener = Listener::bind().unwrap();
        let client = TcpStream::connect((Ipv4Addr::LOCALHOST, listener.port())).unwrap();
        let accepted = loop {
            if let Some(stream) = listener.accept().unwrap() {
                break stream;
            }
        };
        let mut conn = Connection::from_stream(accepted).unwrap();
        drop(client);

        let result = loop {
            match conn.recv_frame(PACKET_SIZE) {
                ReadResult::Pending => std::thread::yield_now(),
                other => break other,
            }
        };
        assert!(matches!(result, ReadResult::Error(_)));
    }
}
