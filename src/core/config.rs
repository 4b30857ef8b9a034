use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How each frame payload is framed before it is pushed to the stream sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoStreamType {
    /// Standard H.264 with an access unit delimiter appended to every frame
    H264Standard,
    /// Raw frames, no delimiter
    H264Custom,
}

impl VideoStreamType {
    pub fn appends_aud(self) -> bool {
        matches!(self, VideoStreamType::H264Standard)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    pub media_directory: PathBuf,
    pub temp_directory: PathBuf,
    pub stream_output: PathBuf,
    pub live_view_file: Option<PathBuf>,
    pub ffmpeg_path: Option<PathBuf>,
    pub ffprobe_path: Option<PathBuf>,
    pub command_queue_capacity: usize, // in commands
    pub task_frequency_hz: u32,
    pub max_chunk_size: usize,
    pub max_frame_count: usize,
    pub video_stream_type: VideoStreamType,
    pub stream_bandwidth_limit: u64, // bytes per second
    pub frame_table_cache_size: usize, // 0 disables caching
    pub tool_timeout_secs: Option<u64>,
    pub thumbnail_width: u32,
    pub screennail_width: u32,
    pub max_concurrent_tools: usize,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            media_directory: PathBuf::from("./media"),
            temp_directory: std::env::temp_dir().join("payload-media-emu"),
            stream_output: PathBuf::from("./output/stream.h264"),
            live_view_file: None,
            ffmpeg_path: None,
            ffprobe_path: None,
            command_queue_capacity: 32,
            task_frequency_hz: 120,
            max_chunk_size: 60000,
            max_frame_count: 18000,
            video_stream_type: VideoStreamType::H264Standard,
            stream_bandwidth_limit: 8 * 1024 * 1024,
            frame_table_cache_size: 0,
            tool_timeout_secs: None,
            thumbnail_width: 100,
            screennail_width: 600,
            max_concurrent_tools: 4,
        }
    }
}

impl EmulatorConfig {
    /// Load the emulator config, writing defaults when the file is missing or unparsable
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();
        log::info!("Emulator config: {}", config_path.display());
        Self::load_from(&config_path)
    }

    pub(crate) fn load_from(config_path: &Path) -> anyhow::Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .map_err(|e| anyhow::anyhow!("Failed to read config: {}", e))?;
            match serde_json::from_str::<Self>(&content) {
                Ok(config) => return Ok(config),
                Err(e) => log::warn!("Unusable config ({}), replacing it with defaults", e),
            }
        } else {
            log::info!("No config yet, writing defaults");
        }

        let config = Self::default();
        config.save_to(config_path)
            .map_err(|e| anyhow::anyhow!("Failed to write default config: {}", e))?;
        Ok(config)
    }

    pub(crate) fn save_to(&self, config_path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("payload-media-emu")
            .join("config.json")
    }

    pub fn ensure_directories(&self) -> anyhow::Result<()> {
        for dir in [&self.media_directory, &self.temp_directory] {
            std::fs::create_dir_all(dir)
                .map_err(|e| anyhow::anyhow!("Failed to create directory {}: {}", dir.display(), e))?;
            log::debug!("Directory ensured: {}", dir.display());
        }
        if let Some(parent) = self.stream_output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    pub fn tool_timeout(&self) -> Option<std::time::Duration> {
        self.tool_timeout_secs.map(std::time::Duration::from_secs)
    }
}
