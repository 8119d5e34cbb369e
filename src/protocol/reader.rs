//! Partial-read buffering for framed packets.

use std::io::{self, Read};

/// Outcome of one [`PacketReader::step`] call.
#[derive(Debug)]
pub enum ReadResult {
    /// A full frame accumulated; the reader is reset for the next frame.
    Complete(Vec<u8>),
    /// Fewer bytes than expected are available; accumulated state is kept.
    Pending,
    /// The stream failed; accumulated state was discarded.
    Error(ReadError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    /// The peer closed the stream (zero-length read).
    #[error("connection closed by peer")]
    Closed,
    #[error("receive failed: {0}")]
    Io(#[from] io::Error),
}

/// A small state machine `{expected, buffer, filled}` that accumulates
/// exactly one frame across any number of non-blocking reads.
///
/// Callers pass the expected frame length on every step; changing it
/// mid-accumulation discards the partial frame (this happens when a grid
/// resize lands between a `DRAW_BUFFER` header and its payload, where the
/// stale payload must be dropped anyway).
#[derive(Debug, Default)]
pub struct PacketReader {
    expected: usize,
    buf: Vec<u8>,
    filled: usize,
}

impl PacketReader {
    pub fn new() -> Self {
        PacketReader::default()
    }

    /// Bytes accumulated towards the current frame.
    pub fn filled(&self) -> usize {
        self.filled
    }

    /// Discards any partial frame.
    pub fn reset(&mut self) {
        self.filled = 0;
    }

    /// Tries to complete a frame of `expected` bytes from `reader`.
    ///
    /// `WouldBlock` yields [`ReadResult::Pending`] with state preserved, so
    /// a later call resumes from the same offset. A zero-length read or any
    /// other error resets the state and reports the failure so the caller
    /// can retire the connection.
    pub fn step<R: Read>(&mut self, expected: usize, reader: &mut R) -> ReadResult {
        if expected == 0 {
            return ReadResult::Complete(Vec::new());
        }
        if self.expected != expected {
            self.expected = expected;
            self.buf.resize(expected, 0);
            self.filled = 0;
        }

        while self.filled < self.expected {
            match reader.read(&mut self.buf[self.filled..self.expected]) {
                Ok(0) => {
                    self.reset();
                    return ReadResult::Error(ReadError::Closed);
                }
                Ok(n) => self.filled += n,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return ReadResult::Pending;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    self.reset();
                    return ReadResult::Error(ReadError::Io(err));
                }
            }
        }

        self.filled = 0;
        ReadResult::Complete(self.buf[..self.expected].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A reader that yields data in fixed chunks with a `WouldBlock` between
    /// each, imitating a non-blocking socket.
    struct Chunked {
        data: Vec<u8>,
        pos: usize,
        chunk: usize,
        ready: bool,
    }

    impl Chunked {
        fn new(data: Vec<u8>, chunk: usize) -> Self {
            Chunked {
                data,
                pos: 0,
                chunk,
                ready: true,
            }
        }
    }

    impl Read for Chunked {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if !self.ready {
                self.ready = true;
                return Err(io::Error::from(io::ErrorKind::WouldBlock));
            }
            if self.pos == self.data.len() {
                return Ok(0);
            }
            self.ready = false;
            let n = self.chunk.min(buf.len()).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    #[test]
    fn completes_exactly_once_per_block() {
        let frame: Vec<u8> = (0u8..40).collect();
        let mut source = Chunked::new(frame.clone(), 7);
        let mut reader = PacketReader::new();

        let mut completions = 0;
        for _ in 0..32 {
            match reader.step(20, &mut source) {
                ReadResult::Complete(bytes) => {
                    assert_eq!(bytes.len(), 20);
                    assert_eq!(bytes, frame[completions * 20..(completions + 1) * 20]);
                    completions += 1;
                }
                ReadResult::Pending => continue,
                ReadResult::Error(err) => {
                    assert!(matches!(err, ReadError::Closed));
                    break;
                }
            }
        }
        assert_eq!(completions, 2);
    }

    #[test]
    fn pending_preserves_offset() {
        let mut source = Chunked::new(vec![1; 10], 3);
        let mut reader = PacketReader::new();

        assert!(matches!(reader.step(10, &mut source), ReadResult::Pending));
        let before = reader.filled();
        assert!(before > 0);
        // Progress continues from the same offset, never from zero.
        loop {
            match reader.step(10, &mut source) {
                ReadResult::Complete(bytes) => {
                    assert_eq!(bytes, vec![1; 10]);
                    break;
                }
                ReadResult::Pending => assert!(reader.filled() >= before),
                ReadResult::Error(err) => panic!("unexpected error: {err}"),
            }
        }
    }

    #[test]
    fn peer_close_resets_state() {
        let mut source = Chunked::new(vec![9; 4], 4);
        let mut reader = PacketReader::new();

        assert!(matches!(reader.step(8, &mut source), ReadResult::Pending));
        // Next readable step hits EOF.
        let result = loop {
            match reader.step(8, &mut source) {
                ReadResult::Pending => continue,
                other => break other,
            }
        };
        assert!(matches!(result, ReadResult::Error(ReadError::Closed)));
        assert_eq!(reader.filled(), 0);
    }

    #[test]
    fn changing_expected_drops_partial_frame() {
        let mut source = Chunked::new(vec![5; 30], 5);
        let mut reader = PacketReader::new();

        assert!(matches!(reader.step(20, &mut source), ReadResult::Pending));
        assert!(reader.filled() > 0);
        // A new expected length restarts accumulation.
        match reader.step(10, &mut source) {
            ReadResult::Complete(bytes) => assert_eq!(bytes.len(), 10),
            ReadResult::Pending => assert!(reader.filled() <= 10),
            ReadResult::Error(err) => panic!("unexpected error: {err}"),
        }
    }
}
