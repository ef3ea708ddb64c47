//! # Audio Sink
//!
//! Append-only destination for received audio chunks. Chunks are written in
//! arrival order and concatenated verbatim; no chunk boundaries are kept.
//!
//! ## Thread Safety:
//! The sink is the only resource shared by every connection. Appends are
//! serialized with a `Mutex` so concurrent writers never interleave bytes.

use crate::error::SinkError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::info;

/// A destination that audio chunks are appended to.
pub trait AudioSink: Send + Sync {
    /// Append one chunk. The whole chunk is written or an error is returned.
    fn append(&self, chunk: &[u8]) -> Result<(), SinkError>;

    /// Total bytes appended since the sink was opened.
    fn bytes_written(&self) -> u64;

    /// Short description used in logs and the health report.
    fn describe(&self) -> String;
}

/// File-backed sink.
///
/// The file is opened once for appending. When `truncate` is set it is
/// emptied first, so each server run starts a fresh recording.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
    written: AtomicU64,
}

impl FileSink {
    pub fn open(path: impl AsRef<Path>, truncate: bool) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        // `append` and `truncate` cannot be combined on one OpenOptions
        if truncate {
            File::create(&path)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(path = %path.display(), truncate, "Audio sink opened");

        Ok(Self {
            path,
            file: Mutex::new(file),
            written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AudioSink for FileSink {
    fn append(&self, chunk: &[u8]) -> Result<(), SinkError> {
        let mut file = self.file.lock().map_err(|_| SinkError::Poisoned)?;
        let (written, result) = write_counted(&mut *file, chunk);
        // A failed append may still have left a prefix of the chunk on disk
        self.written.fetch_add(written as u64, Ordering::Relaxed);
        result.map_err(SinkError::from)
    }

    fn bytes_written(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

/// `write_all` that also reports how many bytes reached the writer before
/// an error.
fn write_counted<W: Write>(writer: &mut W, chunk: &[u8]) -> (usize, io::Result<()>) {
    let mut written = 0;
    while written < chunk.len() {
        match writer.write(&chunk[written..]) {
            Ok(0) => return (written, Err(io::ErrorKind::WriteZero.into())),
            Ok(n) => written += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return (written, Err(err)),
        }
    }
    (written, writer.flush())
}

/// In-memory sink for tests.
#[cfg(test)]
#[derive(Default)]
pub struct MemorySink {
    bytes: Mutex<Vec<u8>>,
}

#[cfg(test)]
impl MemorySink {
    pub fn contents(&self) -> Vec<u8> {
        self.bytes.lock().map(|b| b.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
impl AudioSink for MemorySink {
    fn append(&self, chunk: &[u8]) -> Result<(), SinkError> {
        let mut bytes = self.bytes.lock().map_err(|_| SinkError::Poisoned)?;
        bytes.extend_from_slice(chunk);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.contents().len() as u64
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Sink whose every append fails, for exercising the fatal-to-connection path.
#[cfg(test)]
pub struct FailingSink;

#[cfg(test)]
impl AudioSink for FailingSink {
    fn append(&self, _chunk: &[u8]) -> Result<(), SinkError> {
        Err(SinkError::Io(io::Error::new(io::ErrorKind::Other, "no space left on device")))
    }

    fn bytes_written(&self) -> u64 {
        0
    }

    fn describe(&self) -> String {
        "failing".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir()
            .join(format!("audio-stream-server-{}", uuid::Uuid::new_v4()))
            .join(name)
    }

    #[test]
    fn test_file_sink_appends_verbatim() {
        let path = temp_path("result.dat");
        let sink = FileSink::open(&path, true).unwrap();

        sink.append(b"\x00\x01").unwrap();
        sink.append(b"{\"type\":\"PING\"}").unwrap();
        sink.append(&[0xff]).unwrap();

        let stored = std::fs::read(&path).unwrap();
        assert_eq!(stored, b"\x00\x01{\"type\":\"PING\"}\xff".to_vec());
        assert_eq!(sink.bytes_written(), stored.len() as u64);
    }

    #[test]
    fn test_file_sink_truncate_on_open() {
        let path = temp_path("result.dat");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"stale recording").unwrap();

        let sink = FileSink::open(&path, true).unwrap();
        sink.append(b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new".to_vec());
    }

    #[test]
    fn test_file_sink_keeps_existing_without_truncate() {
        let path = temp_path("result.dat");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"old-").unwrap();

        let sink = FileSink::open(&path, false).unwrap();
        sink.append(b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"old-new".to_vec());
    }

    /// Accepts `room` bytes, then fails like a full disk.
    struct ShortWriter {
        stored: Vec<u8>,
        room: usize,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.stored.len() >= self.room {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = buf.len().min(self.room - self.stored.len()).min(2);
            self.stored.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_partial_write_counts_stored_prefix() {
        let mut writer = ShortWriter { stored: Vec::new(), room: 5 };
        let (written, result) = write_counted(&mut writer, b"abcdefgh");
        assert_eq!(written, 5);
        assert_eq!(writer.stored, b"abcde".to_vec());
        assert!(result.is_err());

        let mut writer = ShortWriter { stored: Vec::new(), room: 64 };
        let (written, result) = write_counted(&mut writer, b"abcdefgh");
        assert_eq!(written, 8);
        assert!(result.is_ok());
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let path = temp_path("result.dat");
        let sink = Arc::new(FileSink::open(&path, true).unwrap());

        let handles: Vec<_> = (0u8..8)
            .map(|id| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        sink.append(&[id; 64]).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let stored = std::fs::read(&path).unwrap();
        assert_eq!(stored.len(), 8 * 50 * 64);
        for chunk in stored.chunks(64) {
            assert!(chunk.iter().all(|b| *b == chunk[0]));
        }
    }
}
