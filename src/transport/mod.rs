//! Transport — framed byte I/O over a serial link or a unix domain
//! socket.
//!
//! A [`Transport`] only moves bytes; frame reassembly lives in
//! [`framing`], and the reader/processor threads that turn frames into
//! dispatched [`crate::message::Message`]s live in [`crate::device`].

pub mod framing;

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use parking_lot::Mutex;

use crate::Result;

/// How to reach the dongle.
#[derive(Debug, Clone)]
pub enum TransportConfig {
    /// A serial (UART) link, e.g. `/dev/ttyUSB0`.
    Serial { path: String, baudrate: u32 },
    /// A unix domain socket, used for virtual devices and tests.
    UnixSocket { path: PathBuf },
}

/// Raw byte-oriented endpoint. Implementations need not be thread safe on
/// their own; [`Transport`] adds the write mutex that serializes concurrent
/// writers.
trait RawIo: Read + Write + Send {}
impl<T: Read + Write + Send> RawIo for T {}

/// Owns the underlying byte stream. `read` never blocks longer than
/// `read_timeout`; `write` serializes concurrent writers so a header is
/// never interleaved with another writer's payload.
pub struct Transport {
    io: Mutex<Box<dyn RawIo>>,
}

impl Transport {
    pub fn open(config: &TransportConfig) -> Result<Self> {
        let io: Box<dyn RawIo> = match config {
            TransportConfig::Serial { path, baudrate } => {
                let port = serialport::new(path, *baudrate)
                    .timeout(Duration::from_millis(100))
                    .open()
                    .map_err(|e| match e.kind {
                        serialport::ErrorKind::NoDevice => {
                            crate::Error::DeviceNotFound(path.clone())
                        }
                        _ => crate::Error::Serial(e),
                    })?;
                Box::new(port)
            }
            TransportConfig::UnixSocket { path } => {
                let stream = UnixStream::connect(path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        crate::Error::DeviceNotFound(path.display().to_string())
                    }
                    std::io::ErrorKind::PermissionDenied => {
                        crate::Error::AccessDenied(path.display().to_string())
                    }
                    _ => crate::Error::Io(e),
                })?;
                stream.set_read_timeout(Some(Duration::from_millis(100)))?;
                Box::new(stream)
            }
        };
        Ok(Self { io: Mutex::new(io) })
    }

    /// Read whatever bytes are currently available, up to `buf.len()`.
    /// Returns `Ok(0)` on a read timeout so the reader thread can poll its
    /// cancellation flag; returns `Err` on a genuine I/O failure or EOF.
    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        let mut io = self.io.lock();
        match io.read(buf) {
            Ok(0) => Err(crate::Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "transport closed",
            ))),
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(crate::Error::Io(e)),
        }
    }

    /// Write a full framed message. Serialized by the internal mutex so a
    /// concurrent writer can never interleave with this one.
    pub fn write_frame(&self, payload: &[u8]) -> Result<()> {
        let frame = framing::encode_frame(payload)?;
        let mut io = self.io.lock();
        io.write_all(&frame)?;
        io.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;
    use std::thread;

    #[test]
    fn unix_socket_round_trip() {
        let dir = std::env::temp_dir().join(format!("whad-test-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let listener = UnixListener::bind(&dir).unwrap();

        let server = thread::spawn(move || {
            let (mut sock, _) = listener.accept().unwrap();
            let mut buf = [0u8; 64];
            let n = sock.read(&mut buf).unwrap();
            sock.write_all(&buf[..n]).unwrap();
        });

        let transport = Transport::open(&TransportConfig::UnixSocket { path: dir.clone() }).unwrap();
        transport.write_frame(b"ping").unwrap();

        let mut decoder = framing::FrameDecoder::new();
        let mut buf = [0u8; 64];
        let mut frames = Vec::new();
        while frames.is_empty() {
            let n = transport.read(&mut buf).unwrap();
            frames = decoder.feed(&buf[..n]);
        }
        assert_eq!(frames[0], b"ping".to_vec());

        server.join().unwrap();
        let _ = std::fs::remove_file(&dir);
    }
}
