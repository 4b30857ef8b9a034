use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::core::{MediaError, Result};

/// Largest payload the stream sink accepts in one `send`
pub const MAX_SEND_CHUNK: usize = 60000;

/// Bandwidth snapshot reported by a sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SinkState {
    pub bandwidth_limit: u64,
    pub bandwidth_used: u64,
    pub busy: bool,
}

/// Outbound video byte stream
pub trait StreamSink: Send {
    fn send(&mut self, data: &[u8]) -> Result<()>;

    fn state(&self) -> SinkState;

    fn max_payload(&self) -> usize {
        MAX_SEND_CHUNK
    }
}

/// Writes the pushed elementary stream to a file, tracking bytes per second
/// against a configured bandwidth limit.
pub struct FileStreamSink {
    writer: BufWriter<File>,
    bandwidth_limit: u64,
    window_start: Instant,
    window_bytes: u64,
    last_window_bytes: u64,
}

impl FileStreamSink {
    const WINDOW: Duration = Duration::from_secs(1);

    pub fn create(path: &Path, bandwidth_limit: u64) -> Result<Self> {
        let file = File::create(path)?;
        log::info!("Streaming video to {}", path.display());
        Ok(Self {
            writer: BufWriter::new(file),
            bandwidth_limit,
            window_start: Instant::now(),
            window_bytes: 0,
            last_window_bytes: 0,
        })
    }

    fn roll_window(&mut self) {
        if self.window_start.elapsed() >= Self::WINDOW {
            self.last_window_bytes = self.window_bytes;
            self.window_bytes = 0;
            self.window_start = Instant::now();
            if let Err(e) = self.writer.flush() {
                log::warn!("Failed to flush stream output: {}", e);
            }
        }
    }
}

impl StreamSink for FileStreamSink {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_SEND_CHUNK {
            return Err(MediaError::OutOfRange(format!(
                "payload of {} bytes exceeds {}",
                data.len(),
                MAX_SEND_CHUNK
            )));
        }
        self.roll_window();
        self.writer.write_all(data)?;
        self.window_bytes += data.len() as u64;
        Ok(())
    }

    fn state(&self) -> SinkState {
        let used = self.window_bytes.max(self.last_window_bytes);
        SinkState {
            bandwidth_limit: self.bandwidth_limit,
            bandwidth_used: used,
            busy: used > self.bandwidth_limit,
        }
    }
}

impl Drop for FileStreamSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
