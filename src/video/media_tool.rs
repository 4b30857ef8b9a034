use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;

use crate::core::{EmulatorConfig, MediaError, Result};
use crate::video::ffmpeg_manager::ToolRunner;
use crate::video::frame_index::parse_frame_rate;

/// Stream properties used for media file attributes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoInfo {
    pub duration_ms: u32,
    pub frame_rate: f32,
    pub width: u32,
    pub height: u32,
}

/// The external transcode/probe tool. Every call is synchronous and blocks
/// the caller for the tool's whole runtime.
pub trait MediaTool: Send + Sync {
    /// Re-mux `input` into a raw annex-B H.264 elementary stream at `output`
    fn transcode_to_annexb(&self, input: &Path, output: &Path) -> Result<()>;

    fn probe_duration_ms(&self, path: &Path) -> Result<u32>;

    fn probe_frame_rate(&self, path: &Path) -> Result<f32>;

    /// Raw per-packet key=value dump, one `[PACKET]` record per frame
    fn probe_packets(&self, path: &Path) -> Result<String>;

    fn probe_video_info(&self, path: &Path) -> Result<VideoInfo>;

    /// Write a single scaled JPEG frame of `input` to `output`
    fn extract_preview(&self, input: &Path, output: &Path, width: u32) -> Result<()>;
}

/// `MediaTool` backed by the ffmpeg and ffprobe command line programs
pub struct FfmpegTool {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    runner: ToolRunner,
}

#[derive(Deserialize)]
struct ProbeJson {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize, Default)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
}

impl FfmpegTool {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, runner: ToolRunner) -> Self {
        Self { ffmpeg, ffprobe, runner }
    }

    pub fn from_config(config: &EmulatorConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone().unwrap_or_else(|| PathBuf::from("ffmpeg")),
            config.ffprobe_path.clone().unwrap_or_else(|| PathBuf::from("ffprobe")),
            ToolRunner::new(config.max_concurrent_tools, config.tool_timeout()),
        )
    }

    fn ffprobe_stdout(&self, args: &[&str], path: &Path) -> Result<String> {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.args(args).arg(path);
        let output = self.runner.execute(cmd)?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Seconds as printed by ffprobe ("12.345000") to whole milliseconds
fn seconds_to_ms(text: &str) -> Result<u32> {
    let secs = text
        .trim()
        .parse::<f64>()
        .map_err(|_| MediaError::NotFound(format!("no duration in probe output '{}'", text.trim())))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(MediaError::OutOfRange(format!("duration {} out of range", secs)));
    }
    Ok((secs * 1000.0).round().min(u32::MAX as f64) as u32)
}

fn parse_video_info(json: &str) -> Result<VideoInfo> {
    let probe: ProbeJson = serde_json::from_str(json)?;

    let duration_ms = match probe.format.duration.as_deref() {
        Some(d) => seconds_to_ms(d)?,
        None => 0,
    };

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| MediaError::NotFound("no video stream".to_string()))?;

    let frame_rate = match video.r_frame_rate.as_deref() {
        Some(rate) => parse_frame_rate(&format!("r_frame_rate={}", rate))?,
        None => 0.0,
    };

    Ok(VideoInfo {
        duration_ms,
        frame_rate,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
    })
}

impl MediaTool for FfmpegTool {
    fn transcode_to_annexb(&self, input: &Path, output: &Path) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-loglevel").arg("error")
            .arg("-nostdin")
            .arg("-i").arg(input)
            .arg("-codec").arg("copy")
            .arg("-f").arg("h264")
            .arg("-y") // Overwrite output file
            .arg(output);
        self.runner.execute(cmd)?;
        Ok(())
    }

    fn probe_duration_ms(&self, path: &Path) -> Result<u32> {
        let stdout = self.ffprobe_stdout(
            &["-v", "quiet", "-show_entries", "format=duration", "-of", "csv=p=0", "-i"],
            path,
        )?;
        seconds_to_ms(&stdout)
    }

    fn probe_frame_rate(&self, path: &Path) -> Result<f32> {
        let stdout = self.ffprobe_stdout(
            &[
                "-v", "quiet",
                "-select_streams", "v:0",
                "-show_entries", "stream=r_frame_rate",
                "-of", "default=noprint_wrappers=1",
            ],
            path,
        )?;
        parse_frame_rate(&stdout)
    }

    fn probe_packets(&self, path: &Path) -> Result<String> {
        self.ffprobe_stdout(&["-v", "quiet", "-show_packets"], path)
    }

    fn probe_video_info(&self, path: &Path) -> Result<VideoInfo> {
        let stdout = self.ffprobe_stdout(
            &["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"],
            path,
        )?;
        parse_video_info(&stdout)
    }

    fn extract_preview(&self, input: &Path, output: &Path, width: u32) -> Result<()> {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-loglevel").arg("error")
            .arg("-nostdin")
            .arg("-i").arg(input)
            .arg("-vframes").arg("1")
            .arg("-vf").arg(format!("scale={}:-1", width))
            .arg("-f").arg("image2")
            .arg("-y")
            .arg(output);
        self.runner.execute(cmd)?;
        Ok(())
    }
}
