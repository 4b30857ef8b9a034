use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::core::{EmulatorConfig, MediaError, Result};
use crate::video::{
    Clock, CommandQueue, CameraMode, FrameSendTask, FrameSender, MediaFileAttr, MediaFileHandle,
    MediaFileRegistry, MediaFileType, MediaTool, PlaybackSession, PlaybackStatus, PreviewImage,
    StreamSink,
};

#[derive(Debug, Clone, Serialize)]
pub struct MediaFileOriginInfo {
    pub file_type: MediaFileType,
    pub attr: MediaFileAttr,
    pub file_size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MediaFileEntry {
    pub path: PathBuf,
    pub file_type: MediaFileType,
    pub size: u64,
    pub modified: DateTime<Local>,
}

#[derive(Clone, Copy)]
enum Preview {
    Thumbnail,
    Screennail,
}

/// Owns everything the emulated camera media service needs: the playback
/// session, its command queue, the file-type registry, open media handles
/// and the frame-send task.
pub struct MediaService {
    config: EmulatorConfig,
    tool: Arc<dyn MediaTool>,
    queue: Arc<CommandQueue>,
    session: Arc<PlaybackSession>,
    registry: MediaFileRegistry,
    handles: Mutex<HashMap<PathBuf, MediaFileHandle>>,
    frame_task: Option<FrameSendTask>,
}

impl MediaService {
    pub fn new(config: EmulatorConfig, tool: Arc<dyn MediaTool>, clock: Arc<dyn Clock>) -> Self {
        let queue = Arc::new(CommandQueue::new(config.command_queue_capacity));
        let session = Arc::new(PlaybackSession::new(queue.clone(), tool.clone(), clock));
        let registry = MediaFileRegistry::with_defaults(tool.clone(), config.thumbnail_width, config.screennail_width);

        Self {
            config,
            tool,
            queue,
            session,
            registry,
            handles: Mutex::new(HashMap::new()),
            frame_task: None,
        }
    }

    /// Spawn the frame-send task pushing video into `sink`
    pub fn start_stream(&mut self, sink: Box<dyn StreamSink>) -> Result<()> {
        if self.frame_task.is_some() {
            return Err(MediaError::NonsupportInCurrentState("stream already running".to_string()));
        }
        let sender = FrameSender::new(
            self.config.clone(),
            self.tool.clone(),
            self.queue.clone(),
            self.session.clone(),
            sink,
        );
        self.frame_task = Some(FrameSendTask::spawn(sender)?);
        log::info!("Media service streaming at {}Hz control rate", self.config.task_frequency_hz);
        Ok(())
    }

    pub fn shutdown(&mut self) {
        if let Some(mut task) = self.frame_task.take() {
            task.stop();
        }
        if let Ok(mut handles) = self.handles.lock() {
            handles.clear();
        }
        log::info!("Media service shut down");
    }

    // -------------------------------------------------------------------------
    // Playback control
    // -------------------------------------------------------------------------

    pub fn set_media_playback_file(&self, path: &Path) -> Result<()> {
        log::info!("Set media playback file: {}", path.display());
        self.session.set_file(path)
    }

    pub fn start_media_playback(&self) -> Result<()> {
        log::info!("Start media playback");
        self.session.start()
    }

    pub fn stop_media_playback(&self) -> Result<()> {
        log::info!("Stop media playback");
        self.session.stop()
    }

    pub fn pause_media_playback(&self) -> Result<()> {
        log::info!("Pause media playback");
        self.session.pause()
    }

    pub fn seek_media_playback(&self, position_ms: u32) -> Result<()> {
        log::info!("Seek media playback to {}ms", position_ms);
        self.session.seek(position_ms)
    }

    pub fn get_media_playback_status(&self) -> Result<PlaybackStatus> {
        self.session.status()
    }

    pub fn set_camera_mode(&self, mode: CameraMode) -> Result<()> {
        self.session.set_camera_mode(mode)
    }

    pub fn camera_mode(&self) -> Result<CameraMode> {
        self.session.camera_mode()
    }

    pub fn current_playback_file(&self) -> Result<Option<PathBuf>> {
        self.session.current_file()
    }

    // -------------------------------------------------------------------------
    // Media files
    // -------------------------------------------------------------------------

    pub fn get_media_file_dir(&self) -> &Path {
        &self.config.media_directory
    }

    /// Supported files in the media directory, newest first
    pub fn list_media_files(&self) -> Result<Vec<MediaFileEntry>> {
        let mut files = Vec::new();

        for entry in std::fs::read_dir(&self.config.media_directory)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(ops) = self.registry.lookup(&path) else {
                continue;
            };
            let metadata = entry.metadata()?;
            files.push(MediaFileEntry {
                file_type: ops.file_type(),
                size: metadata.len(),
                modified: DateTime::<Local>::from(metadata.modified()?),
                path,
            });
        }

        files.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(files)
    }

    pub fn get_media_file_origin_info(&self, path: &Path) -> Result<MediaFileOriginInfo> {
        let handle = MediaFileHandle::create(&self.registry, path)?;
        Ok(MediaFileOriginInfo {
            file_type: handle.file_type(),
            attr: handle.attributes()?,
            file_size: handle.original_size()?,
        })
    }

    pub fn get_media_file_origin_data(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
        MediaFileHandle::create(&self.registry, path)?.original_data(offset, length)
    }

    pub fn create_media_file_thumbnail(&self, path: &Path) -> Result<()> {
        self.create_preview(path, Preview::Thumbnail)
    }

    pub fn get_media_file_thumbnail_info(&self, path: &Path) -> Result<u64> {
        self.with_preview(path, Preview::Thumbnail, |p| Ok(p.size()))
    }

    pub fn get_media_file_thumbnail_data(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.with_preview(path, Preview::Thumbnail, |p| p.data(offset, length))
    }

    pub fn destroy_media_file_thumbnail(&self, path: &Path) -> Result<()> {
        self.destroy_preview(path, Preview::Thumbnail)
    }

    pub fn create_media_file_screennail(&self, path: &Path) -> Result<()> {
        self.create_preview(path, Preview::Screennail)
    }

    pub fn get_media_file_screennail_info(&self, path: &Path) -> Result<u64> {
        self.with_preview(path, Preview::Screennail, |p| Ok(p.size()))
    }

    pub fn get_media_file_screennail_data(&self, path: &Path, offset: u64, length: usize) -> Result<Vec<u8>> {
        self.with_preview(path, Preview::Screennail, |p| p.data(offset, length))
    }

    pub fn destroy_media_file_screennail(&self, path: &Path) -> Result<()> {
        self.destroy_preview(path, Preview::Screennail)
    }

    pub fn delete_media_file(&self, path: &Path) -> Result<()> {
        if let Ok(mut handles) = self.handles.lock() {
            handles.remove(path);
        }
        if !path.is_file() {
            return Err(MediaError::NotFound(format!("no media file {}", path.display())));
        }
        std::fs::remove_file(path)?;
        log::info!("Deleted media file {}", path.display());
        Ok(())
    }

    fn create_preview(&self, path: &Path, which: Preview) -> Result<()> {
        let mut handles = self.handles.lock().map_err(|_| MediaError::poisoned("media handles"))?;
        let handle = match handles.entry(path.to_path_buf()) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(MediaFileHandle::create(&self.registry, path)?)
            }
        };

        let result = match which {
            Preview::Thumbnail => handle.create_thumbnail(&self.config.temp_directory),
            Preview::Screennail => handle.create_screennail(&self.config.temp_directory),
        };
        if !handle.has_previews() {
            handles.remove(path);
        }
        result
    }

    fn with_preview<T>(&self, path: &Path, which: Preview, f: impl FnOnce(&PreviewImage) -> Result<T>) -> Result<T> {
        let handles = self.handles.lock().map_err(|_| MediaError::poisoned("media handles"))?;
        let handle = handles.get(path).ok_or_else(|| {
            MediaError::NonsupportInCurrentState(format!("no preview created for {}", path.display()))
        })?;
        let preview = match which {
            Preview::Thumbnail => handle.thumbnail()?,
            Preview::Screennail => handle.screennail()?,
        };
        f(preview)
    }

    fn destroy_preview(&self, path: &Path, which: Preview) -> Result<()> {
        let mut handles = self.handles.lock().map_err(|_| MediaError::poisoned("media handles"))?;
        let Some(handle) = handles.get_mut(path) else {
            return Ok(());
        };
        match which {
            Preview::Thumbnail => handle.destroy_thumbnail(),
            Preview::Screennail => handle.destroy_screennail(),
        }
        if !handle.has_previews() {
            handles.remove(path);
        }
        Ok(())
    }
}

impl Drop for MediaService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
