//! Tracing setup for the agent and server binaries.
//!
//! Two sinks: stderr (dev diagnostics via `RUST_LOG`, compact) and a
//! size-bounded rolling file under the configured log directory. The file
//! log is capped at three 5 MB segments; the oldest segment is dropped on
//! rotation, so disk usage stays bounded no matter how long the process runs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing_subscriber::fmt::writer::MakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const SEGMENT_LIMIT_BYTES: u64 = 5 * 1024 * 1024;
const SEGMENT_COUNT: usize = 3;
const LOG_FILE_NAME: &str = "mender.log";

/// Initialize stderr-only tracing (tests, one-shot CLI).
///
/// Reads `RUST_LOG`; defaults to `warn` if unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .init();
}

/// Initialize stderr tracing plus the rolling file sink under `log_dir`.
pub fn init_with_file(log_dir: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let file_writer = RollingWriter::new(log_dir)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr).compact())
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .init();
    Ok(())
}

/// Size-based rolling writer: `mender.log` rotates to `mender.log.1`,
/// `mender.log.1` to `mender.log.2`, and the previous `mender.log.2` is
/// dropped.
#[derive(Clone)]
pub struct RollingWriter {
    inner: Arc<Mutex<RollingState>>,
}

struct RollingState {
    dir: PathBuf,
    file: File,
    written: u64,
}

impl RollingWriter {
    pub fn new(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
        let path = dir.join(LOG_FILE_NAME);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open log file {}", path.display()))?;
        let written = file.metadata().map(|m| m.len()).unwrap_or(0);
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingState {
                dir: dir.to_path_buf(),
                file,
                written,
            })),
        })
    }
}

impl RollingState {
    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        for index in (1..SEGMENT_COUNT).rev() {
            let from = if index == 1 {
                self.dir.join(LOG_FILE_NAME)
            } else {
                self.dir.join(format!("{LOG_FILE_NAME}.{}", index - 1))
            };
            let to = self.dir.join(format!("{LOG_FILE_NAME}.{index}"));
            if from.exists() {
                fs::rename(&from, &to)?;
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(LOG_FILE_NAME))?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RollingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.inner.lock().expect("log writer poisoned");
        if state.written + buf.len() as u64 > SEGMENT_LIMIT_BYTES {
            state.rotate()?;
        }
        let n = state.file.write(buf)?;
        state.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.lock().expect("log writer poisoned").file.flush()
    }
}

impl<'a> MakeWriter<'a> for RollingWriter {
    type Writer = RollingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_land_in_base_segment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut writer = RollingWriter::new(temp.path()).expect("writer");
        writer.write_all(b"hello\n").expect("write");
        writer.flush().expect("flush");
        let contents = fs::read_to_string(temp.path().join(LOG_FILE_NAME)).expect("read");
        assert_eq!(contents, "hello\n");
    }

    #[test]
    fn rotation_shifts_segments_and_drops_oldest() {
        let temp = tempfile::tempdir().expect("tempdir");
        let writer = RollingWriter::new(temp.path()).expect("writer");
        {
            let mut state = writer.inner.lock().expect("lock");
            state.file.write_all(b"first segment").expect("write");
            state.rotate().expect("rotate");
            state.file.write_all(b"second segment").expect("write");
            state.rotate().expect("rotate");
            state.file.write_all(b"third segment").expect("write");
            state.rotate().expect("rotate");
        }
        // After three rotations: .1 = "third", .2 = "second", "first" is gone.
        let seg1 = fs::read_to_string(temp.path().join("mender.log.1")).expect("read .1");
        let seg2 = fs::read_to_string(temp.path().join("mender.log.2")).expect("read .2");
        assert_eq!(seg1, "third segment");
        assert_eq!(seg2, "second segment");
        assert_eq!(
            fs::read_to_string(temp.path().join(LOG_FILE_NAME)).expect("read base"),
            ""
        );
    }

    #[test]
    fn write_rotates_when_segment_would_overflow() {
        let temp = tempfile::tempdir().expect("tempdir");
        let mut writer = RollingWriter::new(temp.path()).expect("writer");
        {
            let mut state = writer.inner.lock().expect("lock");
            state.written = SEGMENT_LIMIT_BYTES - 2;
        }
        writer.write_all(b"overflow line\n").expect("write");
        writer.flush().expect("flush");
        assert!(temp.path().join("mender.log.1").exists());
        let contents = fs::read_to_string(temp.path().join(LOG_FILE_NAME)).expect("read");
        assert_eq!(contents, "overflow line\n");
    }
}
