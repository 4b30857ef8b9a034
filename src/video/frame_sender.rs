// =============================================================================
// FRAME SENDER - PERIODIC PRODUCER FEEDING THE VIDEO STREAM SINK
// =============================================================================
//
// A single task wakes at the control frequency (120Hz by default), takes at
// most one playback command off the queue, and on every Nth tick pushes the
// next frame of the prepared annex-B stream to the sink, N being the control
// frequency divided by the stream frame rate.
//
// Start commands transcode and index the source file synchronously; the task
// is blocked for the whole tool run and sees later commands only afterwards.
//
// =============================================================================

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime};

use lru::LruCache;

use crate::core::{EmulatorConfig, MediaError, Result};
use crate::video::command_queue::{CommandQueue, PlaybackCommand};
use crate::video::frame_index::{FrameIndex, FrameInfo};
use crate::video::media_tool::MediaTool;
use crate::video::session::PlaybackSession;
use crate::video::sink::StreamSink;
use crate::video::temp_file::TempFileGuard;

/// Access unit delimiter appended to frames of standard H.264 streams
pub const AUD_MARKER: [u8; 6] = [0x00, 0x00, 0x00, 0x01, 0x09, 0x10];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Preparing,
    Sending,
}

/// A transcoded stream and its frame table. The temp file lives as long as
/// the last reference.
struct PreparedStream {
    transcoded: TempFileGuard,
    index: FrameIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    path: PathBuf,
    modified: Option<SystemTime>,
}

impl CacheKey {
    fn for_path(path: &Path) -> Self {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        Self { path: path.to_path_buf(), modified }
    }
}

pub struct FrameSender {
    config: EmulatorConfig,
    tool: Arc<dyn MediaTool>,
    queue: Arc<CommandQueue>,
    session: Arc<PlaybackSession>,
    sink: Box<dyn StreamSink>,

    state: SenderState,
    stream: Option<Arc<PreparedStream>>,
    file: Option<File>,
    frame_number: usize,
    looping: bool,
    tick: u64,
    send_interval: u64,

    cache: Option<LruCache<CacheKey, Arc<PreparedStream>>>,
}

impl FrameSender {
    pub fn new(
        config: EmulatorConfig,
        tool: Arc<dyn MediaTool>,
        queue: Arc<CommandQueue>,
        session: Arc<PlaybackSession>,
        sink: Box<dyn StreamSink>,
    ) -> Self {
        let cache = NonZeroUsize::new(config.frame_table_cache_size).map(LruCache::new);
        Self {
            config,
            tool,
            queue,
            session,
            sink,
            state: SenderState::Idle,
            stream: None,
            file: None,
            frame_number: 0,
            looping: false,
            tick: 0,
            send_interval: 1,
            cache,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn frame_number(&self) -> usize {
        self.frame_number
    }

    /// Loop the configured live-view file until the first command arrives
    pub fn start_live_view(&mut self) {
        let Some(path) = self.config.live_view_file.clone() else {
            return;
        };
        log::info!("Starting live view loop from {}", path.display());
        if let Err(e) = self.load(&path, 0, true) {
            log::error!("Failed to prepare live view {}: {}", path.display(), e);
        }
    }

    /// One control period: apply at most one command, then maybe send a frame
    pub fn tick(&mut self) {
        match self.queue.dequeue_if_any() {
            Ok(Some(command)) => self.handle_command(command),
            Ok(None) => {}
            Err(e) => log::error!("Failed to read playback command: {}", e),
        }

        if self.state == SenderState::Sending
            && self.tick % self.send_interval == 0
            && self.session.frames_allowed()
        {
            self.send_next_frame();
        }

        self.tick = self.tick.wrapping_add(1);
    }

    fn set_state(&mut self, state: SenderState) {
        if self.state != state {
            log::info!("Frame sender {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn handle_command(&mut self, command: PlaybackCommand) {
        log::debug!("Handling playback command {:?}", command);
        match command {
            PlaybackCommand::Start { path, seek_ms } => {
                if let Err(e) = self.load(&path, seek_ms, false) {
                    log::error!("Failed to start playback of {} at {}ms: {}", path.display(), seek_ms, e);
                }
            }
            PlaybackCommand::Pause => {
                self.set_state(SenderState::Idle);
            }
            PlaybackCommand::Stop => {
                self.frame_number = 0;
                self.set_state(SenderState::Idle);
            }
        }
    }

    fn load(&mut self, path: &Path, seek_ms: u32, looping: bool) -> Result<()> {
        self.set_state(SenderState::Preparing);

        let prepared = match self.prepare_stream(path) {
            Ok(prepared) => prepared,
            Err(e) => {
                self.set_state(SenderState::Idle);
                return Err(e);
            }
        };
        let opened = prepared
            .index
            .frame_number_by_time(seek_ms)
            .and_then(|n| Ok((n, File::open(prepared.transcoded.path())?)));
        let (frame_number, file) = match opened {
            Ok(v) => v,
            Err(e) => {
                self.set_state(SenderState::Idle);
                return Err(e);
            }
        };

        let frame_rate = prepared.index.frame_rate;
        self.send_interval = ((self.config.task_frequency_hz as f32 / frame_rate).round() as u64).max(1);
        log::info!(
            "Prepared {} ({} frames, {:.2} fps, send every {} ticks) from frame {}",
            path.display(),
            prepared.index.len(),
            frame_rate,
            self.send_interval,
            frame_number
        );

        self.stream = Some(prepared);
        self.file = Some(file);
        self.frame_number = frame_number;
        self.looping = looping;
        self.set_state(SenderState::Sending);
        Ok(())
    }

    fn prepare_stream(&mut self, path: &Path) -> Result<Arc<PreparedStream>> {
        let key = CacheKey::for_path(path);
        if let Some(cache) = self.cache.as_mut() {
            if let Some(hit) = cache.get(&key) {
                log::debug!("Frame table cache hit for {}", path.display());
                return Ok(hit.clone());
            }
        }

        // the guard unlinks the transcoded file if probing fails below
        let transcoded = TempFileGuard::new_in(&self.config.temp_directory, "playback", "h264");
        self.tool.transcode_to_annexb(path, transcoded.path())?;
        let index = FrameIndex::probe(self.tool.as_ref(), transcoded.path(), self.config.max_frame_count)?;

        let prepared = Arc::new(PreparedStream { transcoded, index });
        if let Some(cache) = self.cache.as_mut() {
            cache.put(key, prepared.clone());
        }
        Ok(prepared)
    }

    fn read_frame(&mut self, frame: &FrameInfo) -> Result<Vec<u8>> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MediaError::NonsupportInCurrentState("no stream open".to_string()))?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(frame.size_bytes as usize).map_err(|e| {
            MediaError::MemoryAllocationFailed(format!("frame of {} bytes: {}", frame.size_bytes, e))
        })?;
        buf.resize(frame.size_bytes as usize, 0);
        file.seek(SeekFrom::Start(frame.byte_offset))?;
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn send_next_frame(&mut self) {
        let Some(stream) = self.stream.clone() else {
            self.set_state(SenderState::Idle);
            return;
        };
        let frame_count = stream.index.len();
        let Some(frame) = stream.index.frames.get(self.frame_number).copied() else {
            self.frame_number = 0;
            return;
        };

        let mut payload = self.read_frame(&frame).unwrap_or_else(|e| {
            log::warn!("Failed to read frame {}: {}", self.frame_number, e);
            Vec::new()
        });

        if !payload.is_empty() {
            if self.config.video_stream_type.appends_aud() {
                payload.extend_from_slice(&AUD_MARKER);
            }

            let chunk_size = self.config.max_chunk_size.min(self.sink.max_payload()).max(1);
            for chunk in payload.chunks(chunk_size) {
                if let Err(e) = self.sink.send(chunk) {
                    log::warn!("Failed to send frame {}: {}", self.frame_number, e);
                    break;
                }
            }

            let sink_state = self.sink.state();
            if sink_state.busy {
                log::debug!(
                    "Stream sink busy: {} of {} bytes/s",
                    sink_state.bandwidth_used,
                    sink_state.bandwidth_limit
                );
            }
        }

        self.frame_number += 1;
        if self.frame_number >= frame_count {
            self.frame_number = 0;
            if !self.looping {
                log::info!("End of stream reached");
                self.set_state(SenderState::Idle);
            }
        }
    }

    fn run(mut self, stop_flag: Arc<AtomicBool>) {
        let period = Duration::from_secs_f64(1.0 / self.config.task_frequency_hz.max(1) as f64);
        self.start_live_view();

        while !stop_flag.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick();
            thread::sleep(period.saturating_sub(started.elapsed()));
        }
        log::info!("Frame sender shutting down at frame {} ({:?})", self.frame_number(), self.state());
    }
}

/// Handle to the background frame-send thread
pub struct FrameSendTask {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FrameSendTask {
    const STACK_SIZE: usize = 2 * 1024 * 1024;

    pub fn spawn(sender: FrameSender) -> Result<Self> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_flag = stop_flag.clone();
        let handle = thread::Builder::new()
            .name("frame-sender".to_string())
            .stack_size(Self::STACK_SIZE)
            .spawn(move || sender.run(thread_flag))
            .map_err(|e| MediaError::SystemError(format!("failed to spawn frame sender: {}", e)))?;

        Ok(Self {
            stop_flag,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Frame sender thread panicked");
            }
        }
    }
}

impl Drop for FrameSendTask {
    fn drop(&mut self) {
        self.stop();
    }
}
