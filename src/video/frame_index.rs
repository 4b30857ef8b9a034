use std::path::Path;

use crate::core::{MediaError, Result};
use crate::video::media_tool::MediaTool;

/// One elementary-stream frame: how long it plays and where its bytes live
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInfo {
    pub duration_seconds: f32,
    pub byte_offset: u64,
    pub size_bytes: u32,
}

/// Ordered frame table of a transcoded stream plus its frame rate.
/// Offsets are non-decreasing; summed durations give the stream length.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameIndex {
    pub frame_rate: f32,
    pub frames: Vec<FrameInfo>,
}

impl FrameIndex {
    /// Probe `path` (an annex-B stream) for its frame rate and frame table.
    pub fn probe(tool: &dyn MediaTool, path: &Path, max_frames: usize) -> Result<Self> {
        let frame_rate = tool.probe_frame_rate(path)?;
        let dump = tool.probe_packets(path)?;
        let index = Self { frame_rate, frames: parse_packet_records(&dump, max_frames)? };
        if index.is_empty() {
            return Err(MediaError::NotFound(format!("no frames in {}", path.display())));
        }

        log::debug!(
            "Indexed {} frames ({:.2}s) at {:.3} fps from {}",
            index.len(),
            index.total_duration_seconds(),
            frame_rate,
            path.display()
        );
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn total_duration_seconds(&self) -> f64 {
        self.frames.iter().map(|f| f.duration_seconds as f64).sum()
    }

    /// First frame whose cumulative duration reaches `time_ms`.
    /// Accumulates in f64 so thousands of short frames don't drift.
    pub fn frame_number_by_time(&self, time_ms: u32) -> Result<usize> {
        let target = time_ms as f64 / 1000.0;
        let mut elapsed = 0.0f64;

        for (i, frame) in self.frames.iter().enumerate() {
            elapsed += frame.duration_seconds as f64;
            if elapsed >= target {
                return Ok(i);
            }
        }

        Err(MediaError::NotFound(format!(
            "time {}ms is beyond stream duration {:.3}s",
            time_ms, elapsed
        )))
    }
}

/// Parse `r_frame_rate=num/den` (or a bare decimal) into frames per second
pub fn parse_frame_rate(text: &str) -> Result<f32> {
    let value = text
        .lines()
        .find_map(|line| line.trim().strip_prefix("r_frame_rate="))
        .ok_or_else(|| MediaError::NotFound("r_frame_rate missing from probe output".to_string()))?
        .trim();

    let rate = match value.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse()
                .map_err(|_| MediaError::NotFound(format!("bad frame rate '{}'", value)))?;
            let den: f64 = den.trim().parse()
                .map_err(|_| MediaError::NotFound(format!("bad frame rate '{}'", value)))?;
            if den == 0.0 {
                return Err(MediaError::NotFound(format!("undefined frame rate '{}'", value)));
            }
            num / den
        }
        None => value.parse::<f64>()
            .map_err(|_| MediaError::NotFound(format!("bad frame rate '{}'", value)))?,
    };

    if !rate.is_finite() || rate <= 0.0 {
        return Err(MediaError::NotFound(format!("unusable frame rate '{}'", value)));
    }
    Ok(rate as f32)
}

#[derive(Default)]
struct PartialRecord {
    duration: Option<f32>,
    pos: Option<u64>,
    size: Option<u32>,
}

/// Parse ffprobe `-show_packets` output. Every `[PACKET]` record must carry
/// `duration_time`, `pos` and `size`; a single incomplete record fails the
/// whole table so callers never see a partial index.
pub fn parse_packet_records(dump: &str, max_frames: usize) -> Result<Vec<FrameInfo>> {
    let mut frames = Vec::new();
    let mut current: Option<PartialRecord> = None;

    for line in dump.lines().map(str::trim) {
        match line {
            "[PACKET]" => current = Some(PartialRecord::default()),
            "[/PACKET]" => {
                let record = current.take().unwrap_or_default();
                let index = frames.len();
                let missing = |field: &str| {
                    MediaError::NotFound(format!("packet {} has no usable '{}' field", index, field))
                };
                let frame = FrameInfo {
                    duration_seconds: record.duration.ok_or_else(|| missing("duration_time"))?,
                    byte_offset: record.pos.ok_or_else(|| missing("pos"))?,
                    size_bytes: record.size.ok_or_else(|| missing("size"))?,
                };

                if frames.len() >= max_frames {
                    return Err(MediaError::OutOfRange(format!(
                        "stream has more than {} frames",
                        max_frames
                    )));
                }
                frames.push(frame);
            }
            _ => {
                let (Some(record), Some((key, value))) = (current.as_mut(), line.split_once('=')) else {
                    continue;
                };
                // "N/A" and negative positions fail to parse and count as absent
                match key {
                    "duration_time" => record.duration = value.parse().ok(),
                    "pos" => record.pos = value.parse().ok(),
                    "size" => record.size = value.parse().ok(),
                    _ => {}
                }
            }
        }
    }

    if current.is_some() {
        return Err(MediaError::NotFound(format!(
            "packet {} is not terminated, probe output truncated",
            frames.len()
        )));
    }
    Ok(frames)
}
