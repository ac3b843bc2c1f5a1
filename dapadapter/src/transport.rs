//! Transport bridge between the adapter process output and the framing layer.
//!
//! The child process pushes output chunks asynchronously; the framing reader
//! wants a blocking, pull-based byte source. A bounded channel sits in
//! between: the pump side blocks when the buffer is full, the reader side
//! blocks while it is empty, re-checking the closed flag on a timed cadence
//! so that closing the bridge from another thread wakes a blocked reader
//! within one cycle instead of hanging until the next byte arrives.

use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

/// How often a blocked reader re-checks the closed flag.
pub const WAKE_INTERVAL: Duration = Duration::from_millis(750);

/// Buffered chunk capacity before the writer side blocks.
const BUFFER_CHUNKS: usize = 64;

/// Create a connected writer/reader pair plus a control handle that can
/// close the bridge from any thread.
pub fn bridge() -> (BridgeWriter, BridgeReader, BridgeControl) {
    let (tx, rx) = sync_channel(BUFFER_CHUNKS);
    let closed = Arc::new(AtomicBool::new(false));
    (
        BridgeWriter {
            tx,
            closed: closed.clone(),
        },
        BridgeReader {
            rx,
            pending: VecDeque::new(),
            closed: closed.clone(),
            eof: false,
        },
        BridgeControl { closed },
    )
}

/// Push side of the bridge, fed from the process-output pump.
pub struct BridgeWriter {
    tx: SyncSender<Vec<u8>>,
    closed: Arc<AtomicBool>,
}

impl BridgeWriter {
    /// Queue a chunk of process output. Blocks while the buffer is full.
    pub fn push(&self, chunk: Vec<u8>) -> io::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        if chunk.is_empty() {
            return Ok(());
        }
        self.tx
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "bridge reader is gone"))
    }
}

/// Pull side of the bridge, handed to the framing reader.
pub struct BridgeReader {
    rx: Receiver<Vec<u8>>,
    pending: VecDeque<u8>,
    closed: Arc<AtomicBool>,
    eof: bool,
}

impl Read for BridgeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(closed_error());
            }
            if !self.pending.is_empty() {
                let mut n = 0;
                while n < buf.len() {
                    match self.pending.pop_front() {
                        Some(byte) => {
                            buf[n] = byte;
                            n += 1;
                        }
                        None => break,
                    }
                }
                return Ok(n);
            }
            if self.eof {
                return Ok(0);
            }
            match self.rx.recv_timeout(WAKE_INTERVAL) {
                Ok(chunk) => self.pending.extend(chunk),
                // No data yet; loop around to re-check the closed flag.
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => self.eof = true,
            }
        }
    }
}

/// Close handle shared with the session; closing wakes any blocked reader
/// and fails all subsequent reads and writes.
#[derive(Clone)]
pub struct BridgeControl {
    closed: Arc<AtomicBool>,
}

impl BridgeControl {
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport bridge closed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn reads_pushed_bytes_in_order() {
        let (writer, mut reader, _control) = bridge();
        writer.push(b"Cont".to_vec()).unwrap();
        writer.push(b"ent".to_vec()).unwrap();

        let mut buf = [0u8; 7];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"Content");
    }

    #[test]
    fn writer_drop_is_end_of_stream() {
        let (writer, mut reader, _control) = bridge();
        writer.push(b"x".to_vec()).unwrap();
        drop(writer);

        let mut buf = [0u8; 8];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn close_wakes_blocked_reader_within_one_cycle() {
        let (_writer, mut reader, control) = bridge();

        let handle = thread::spawn(move || {
            let mut buf = [0u8; 8];
            let started = Instant::now();
            let result = reader.read(&mut buf);
            (result, started.elapsed())
        });

        thread::sleep(Duration::from_millis(100));
        control.close();

        let (result, elapsed) = handle.join().unwrap();
        assert!(result.is_err());
        assert!(elapsed < WAKE_INTERVAL + Duration::from_millis(500));
    }

    #[test]
    fn read_after_close_fails_immediately() {
        let (writer, mut reader, control) = bridge();
        writer.push(b"data".to_vec()).unwrap();
        control.close();

        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
        assert!(writer.push(b"more".to_vec()).is_err());
    }
}
