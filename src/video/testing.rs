//! Test doubles for the external collaborators.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::core::{MediaError, Result};
use crate::video::clock::Clock;
use crate::video::media_tool::{MediaTool, VideoInfo};
use crate::video::sink::{SinkState, StreamSink, MAX_SEND_CHUNK};

pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self { now_us: AtomicU64::new(0) }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * 1000, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Byte pattern the fake transcoder writes for frame `index`
pub fn fake_frame_bytes(index: usize, size: usize) -> Vec<u8> {
    let mut bytes = vec![0u8, 0, 0, 1];
    bytes.resize(size.max(4), (index % 251) as u8 + 1);
    bytes.truncate(size);
    bytes
}

/// Stands in for ffmpeg/ffprobe: "transcodes" by writing a synthetic stream
/// whose frame layout matches the packet dump it reports.
pub struct FakeMediaTool {
    duration_ms: u32,
    frame_rate: f32,
    frame_sizes: Vec<usize>,
    packet_override: Option<String>,
    fail_transcode: bool,
    video_info: VideoInfo,
    pub transcode_calls: AtomicUsize,
    pub preview_calls: AtomicUsize,
    pub last_transcode_output: Mutex<Option<PathBuf>>,
}

impl FakeMediaTool {
    pub fn new() -> Self {
        Self {
            duration_ms: 10_000,
            frame_rate: 30.0,
            frame_sizes: vec![100; 30],
            packet_override: None,
            fail_transcode: false,
            video_info: VideoInfo { duration_ms: 10_000, frame_rate: 30.0, width: 1280, height: 720 },
            transcode_calls: AtomicUsize::new(0),
            preview_calls: AtomicUsize::new(0),
            last_transcode_output: Mutex::new(None),
        }
    }

    pub fn with_duration_ms(mut self, ms: u32) -> Self {
        self.duration_ms = ms;
        self
    }

    pub fn with_frame_rate(mut self, fps: f32) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn with_frames(mut self, sizes: Vec<usize>) -> Self {
        self.frame_sizes = sizes;
        self
    }

    pub fn with_packet_dump(mut self, dump: &str) -> Self {
        self.packet_override = Some(dump.to_string());
        self
    }

    pub fn failing_transcode(mut self) -> Self {
        self.fail_transcode = true;
        self
    }

    pub fn packet_dump(&self) -> String {
        let duration = 1.0 / self.frame_rate;
        let mut pos = 0usize;
        let mut dump = String::new();
        for size in &self.frame_sizes {
            dump.push_str(&format!(
                "[PACKET]\ncodec_type=video\nduration_time={:.6}\nsize={}\npos={}\n[/PACKET]\n",
                duration, size, pos
            ));
            pos += size;
        }
        dump
    }
}

impl MediaTool for FakeMediaTool {
    fn transcode_to_annexb(&self, input: &Path, output: &Path) -> Result<()> {
        self.transcode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_transcode {
            return Err(MediaError::Unknown(format!("cannot transcode {}", input.display())));
        }
        let mut data = Vec::new();
        for (i, size) in self.frame_sizes.iter().enumerate() {
            data.extend(fake_frame_bytes(i, *size));
        }
        std::fs::write(output, data)?;
        if let Ok(mut last) = self.last_transcode_output.lock() {
            *last = Some(output.to_path_buf());
        }
        Ok(())
    }

    fn probe_duration_ms(&self, _path: &Path) -> Result<u32> {
        Ok(self.duration_ms)
    }

    fn probe_frame_rate(&self, _path: &Path) -> Result<f32> {
        Ok(self.frame_rate)
    }

    fn probe_packets(&self, _path: &Path) -> Result<String> {
        Ok(self.packet_override.clone().unwrap_or_else(|| self.packet_dump()))
    }

    fn probe_video_info(&self, _path: &Path) -> Result<VideoInfo> {
        Ok(self.video_info.clone())
    }

    fn extract_preview(&self, _input: &Path, output: &Path, width: u32) -> Result<()> {
        self.preview_calls.fetch_add(1, Ordering::SeqCst);
        let img = image::RgbImage::from_pixel(width, (width / 2).max(1), image::Rgb([40, 90, 160]));
        img.save_with_format(output, image::ImageFormat::Jpeg)?;
        Ok(())
    }
}

/// Collects every payload pushed to it
#[derive(Clone, Default)]
pub struct MemorySink {
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub busy: bool,
    pub state_polls: Arc<AtomicUsize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that always reports itself over its bandwidth budget
    pub fn busy() -> Self {
        Self { busy: true, ..Self::default() }
    }

    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl StreamSink for MemorySink {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_SEND_CHUNK {
            return Err(MediaError::OutOfRange(format!("{} bytes", data.len())));
        }
        self.sent
            .lock()
            .map_err(|_| MediaError::poisoned("memory sink"))?
            .push(data.to_vec());
        Ok(())
    }

    fn state(&self) -> SinkState {
        self.state_polls.fetch_add(1, Ordering::SeqCst);
        if self.busy {
            return SinkState { bandwidth_limit: 1000, bandwidth_used: 4000, busy: true };
        }
        SinkState {
            bandwidth_limit: u64::MAX,
            bandwidth_used: 0,
            busy: false,
        }
    }
}
