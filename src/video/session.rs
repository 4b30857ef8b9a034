use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::core::{MediaError, Result};
use crate::video::clock::Clock;
use crate::video::command_queue::{CommandQueue, PlaybackCommand};
use crate::video::media_tool::MediaTool;

/// Playback mode reported to status pollers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackMode {
    Play,
    Pause,
    Stop,
}

/// Camera work mode selected by the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraMode {
    ShootPhoto,
    RecordVideo,
    Playback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PlaybackStatus {
    pub mode: PlaybackMode,
    pub play_pos_ms: u32,
    pub video_length_ms: u32,
    pub percent: u8,
}

struct SessionState {
    mode: PlaybackMode,
    camera_mode: CameraMode,
    file_path: Option<PathBuf>,
    video_length_ms: u32,
    start_wall_clock_us: i64,
    play_pos_ms: u32,
}

/// What is playing and where. Every transition happens under one lock so the
/// wall-clock position, mode and queued commands stay consistent.
pub struct PlaybackSession {
    state: Mutex<SessionState>,
    queue: Arc<CommandQueue>,
    tool: Arc<dyn MediaTool>,
    clock: Arc<dyn Clock>,
}

impl PlaybackSession {
    pub fn new(queue: Arc<CommandQueue>, tool: Arc<dyn MediaTool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(SessionState {
                mode: PlaybackMode::Stop,
                camera_mode: CameraMode::ShootPhoto,
                file_path: None,
                video_length_ms: 0,
                start_wall_clock_us: 0,
                play_pos_ms: 0,
            }),
            queue,
            tool,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, SessionState>> {
        self.state.lock().map_err(|_| MediaError::poisoned("playback session"))
    }

    /// Load a new file. Its length comes from the original file, not the
    /// transcoded stream the frame-send task will index later.
    pub fn set_file(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            return Err(MediaError::InvalidParameter("empty playback path".to_string()));
        }
        let video_length_ms = self.tool.probe_duration_ms(path)?;

        let mut state = self.lock()?;
        if state.mode != PlaybackMode::Stop {
            self.stop_locked(&mut state)?;
        }
        state.file_path = Some(path.to_path_buf());
        state.video_length_ms = video_length_ms;
        state.play_pos_ms = 0;

        log::info!("Playback file set to {} ({}ms)", path.display(), video_length_ms);
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.start_locked(&mut state)
    }

    pub fn pause(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.pause_locked(&mut state)
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock()?;
        self.stop_locked(&mut state)
    }

    /// Pause, move to `position_ms` (clamped to the video length), start again
    pub fn seek(&self, position_ms: u32) -> Result<()> {
        let mut state = self.lock()?;
        self.pause_locked(&mut state)?;
        state.play_pos_ms = position_ms.min(state.video_length_ms);
        log::info!("Seek to {}ms", state.play_pos_ms);
        self.start_locked(&mut state)
    }

    /// Refreshes the position while playing; reaching the end pauses on the
    /// last position rather than stopping.
    pub fn status(&self) -> Result<PlaybackStatus> {
        let mut state = self.lock()?;

        if state.mode == PlaybackMode::Play {
            self.refresh_position(&mut state);
            if state.play_pos_ms >= state.video_length_ms {
                state.play_pos_ms = state.video_length_ms;
                if let Err(e) = self.queue.enqueue(&PlaybackCommand::Pause) {
                    log::warn!("End of file reached but pause could not be queued: {}", e);
                }
                state.mode = PlaybackMode::Pause;
                log::info!("End of file at {}ms, pausing", state.play_pos_ms);
            }
        }

        let percent = if state.video_length_ms == 0 {
            0
        } else {
            (state.play_pos_ms as u64 * 100 / state.video_length_ms as u64).min(100) as u8
        };

        Ok(PlaybackStatus {
            mode: state.mode,
            play_pos_ms: state.play_pos_ms,
            video_length_ms: state.video_length_ms,
            percent,
        })
    }

    pub fn set_camera_mode(&self, mode: CameraMode) -> Result<()> {
        let mut state = self.lock()?;
        log::info!("Camera mode {:?} -> {:?}", state.camera_mode, mode);
        state.camera_mode = mode;
        Ok(())
    }

    pub fn camera_mode(&self) -> Result<CameraMode> {
        Ok(self.lock()?.camera_mode)
    }

    pub fn current_file(&self) -> Result<Option<PathBuf>> {
        Ok(self.lock()?.file_path.clone())
    }

    /// In playback mode frames only go out while the session is playing
    pub fn frames_allowed(&self) -> bool {
        match self.state.lock() {
            Ok(state) => !(state.camera_mode == CameraMode::Playback && state.mode != PlaybackMode::Play),
            Err(_) => false,
        }
    }

    fn refresh_position(&self, state: &mut SessionState) {
        let now = self.clock.now_us() as i64;
        let elapsed_ms = (now - state.start_wall_clock_us).max(0) / 1000;
        state.play_pos_ms = elapsed_ms.min(state.video_length_ms as i64) as u32;
    }

    fn start_locked(&self, state: &mut SessionState) -> Result<()> {
        if state.mode == PlaybackMode::Play {
            return Ok(());
        }
        let path = state.file_path.clone().ok_or_else(|| {
            MediaError::NonsupportInCurrentState("no playback file set".to_string())
        })?;

        self.queue
            .enqueue(&PlaybackCommand::Start { path, seek_ms: state.play_pos_ms })
            .map_err(|e| {
                log::error!("Failed to queue start command: {}", e);
                e
            })?;

        state.start_wall_clock_us = self.clock.now_us() as i64 - state.play_pos_ms as i64 * 1000;
        state.mode = PlaybackMode::Play;
        log::info!("Playback started at {}ms", state.play_pos_ms);
        Ok(())
    }

    fn pause_locked(&self, state: &mut SessionState) -> Result<()> {
        if state.mode != PlaybackMode::Play {
            return Ok(());
        }
        self.refresh_position(state);

        self.queue.enqueue(&PlaybackCommand::Pause).map_err(|e| {
            log::error!("Failed to queue pause command: {}", e);
            e
        })?;

        state.mode = PlaybackMode::Pause;
        log::info!("Playback paused at {}ms", state.play_pos_ms);
        Ok(())
    }

    fn stop_locked(&self, state: &mut SessionState) -> Result<()> {
        self.queue.enqueue(&PlaybackCommand::Stop).map_err(|e| {
            log::error!("Failed to queue stop command: {}", e);
            e
        })?;

        state.play_pos_ms = 0;
        state.mode = PlaybackMode::Stop;
        log::info!("Playback stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;
    use crate::video::testing::{FakeMediaTool, ManualClock};

    fn session_with(length_ms: u32) -> (PlaybackSession, Arc<CommandQueue>, Arc<ManualClock>) {
        let queue = Arc::new(CommandQueue::new(32));
        let clock = Arc::new(ManualClock::new());
        let tool = Arc::new(FakeMediaTool::new().with_duration_ms(length_ms));
        let session = PlaybackSession::new(queue.clone(), tool, clock.clone());
        session.set_file(Path::new("/media/clip.mp4")).unwrap();
        (session, queue, clock)
    }

    fn drain(queue: &CommandQueue) -> Vec<PlaybackCommand> {
        let mut out = Vec::new();
        while let Some(cmd) = queue.dequeue_if_any().unwrap() {
            out.push(cmd);
        }
        out
    }

    #[test]
    fn test_play_for_half_a_second() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(500);

        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Play);
        assert_eq!(status.play_pos_ms, 500);
        assert_eq!(status.video_length_ms, 10_000);
        assert_eq!(status.percent, 5);
        assert_eq!(
            drain(&queue),
            vec![PlaybackCommand::Start { path: PathBuf::from("/media/clip.mp4"), seek_ms: 0 }]
        );
    }

    #[test]
    fn test_pause_freezes_position() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(1000);
        session.pause().unwrap();

        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Pause);
        assert_eq!(status.play_pos_ms, 1000);

        clock.advance_ms(500);
        assert_eq!(session.status().unwrap().play_pos_ms, 1000);
        assert_eq!(drain(&queue).last(), Some(&PlaybackCommand::Pause));
    }

    #[test]
    fn test_resume_preserves_position() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(1200);
        session.pause().unwrap();
        clock.advance_ms(5000);
        drain(&queue);

        session.start().unwrap();
        assert_eq!(
            drain(&queue),
            vec![PlaybackCommand::Start { path: PathBuf::from("/media/clip.mp4"), seek_ms: 1200 }]
        );
        clock.advance_ms(300);
        assert_eq!(session.status().unwrap().play_pos_ms, 1500);
    }

    #[test]
    fn test_start_twice_is_noop() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(250);
        session.start().unwrap();

        assert_eq!(session.status().unwrap().play_pos_ms, 250);
        assert_eq!(drain(&queue).len(), 1);
    }

    #[test]
    fn test_seek_round_trip_and_percent() {
        let (session, queue, _clock) = session_with(10_000);
        session.seek(5000).unwrap();

        let status = session.status().unwrap();
        assert_eq!(status.play_pos_ms, 5000);
        assert_eq!(status.percent, 50);
        assert_eq!(status.mode, PlaybackMode::Play);
        assert_eq!(
            drain(&queue),
            vec![PlaybackCommand::Start { path: PathBuf::from("/media/clip.mp4"), seek_ms: 5000 }]
        );
    }

    #[test]
    fn test_seek_while_playing_pauses_then_starts() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(100);
        drain(&queue);

        session.seek(3000).unwrap();
        assert_eq!(
            drain(&queue),
            vec![
                PlaybackCommand::Pause,
                PlaybackCommand::Start { path: PathBuf::from("/media/clip.mp4"), seek_ms: 3000 },
            ]
        );
    }

    #[test]
    fn test_natural_end_pauses_at_length() {
        let (session, queue, clock) = session_with(2000);
        session.start().unwrap();
        clock.advance_ms(5000);

        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Pause);
        assert_eq!(status.play_pos_ms, 2000);
        assert_eq!(status.percent, 100);
        assert_eq!(drain(&queue).last(), Some(&PlaybackCommand::Pause));
    }

    #[test]
    fn test_seek_past_end_behaves_like_natural_end() {
        let (session, _queue, _clock) = session_with(2000);
        session.seek(9999).unwrap();

        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Pause);
        assert_eq!(status.play_pos_ms, 2000);
    }

    #[test]
    fn test_position_never_exceeds_length() {
        let (session, _queue, clock) = session_with(1500);
        for seek in [0, 700, 1500, 4000] {
            session.seek(seek).unwrap();
            for _ in 0..4 {
                clock.advance_ms(400);
                let status = session.status().unwrap();
                assert!(status.play_pos_ms <= status.video_length_ms);
            }
        }
    }

    #[test]
    fn test_stop_resets_position() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(800);
        session.stop().unwrap();

        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Stop);
        assert_eq!(status.play_pos_ms, 0);
        assert_eq!(drain(&queue).last(), Some(&PlaybackCommand::Stop));
    }

    #[test]
    fn test_zero_length_video_has_zero_percent() {
        let (session, _queue, _clock) = session_with(0);
        let status = session.status().unwrap();
        assert_eq!(status.percent, 0);
        assert_eq!(status.video_length_ms, 0);
    }

    #[test]
    fn test_start_without_file() {
        let queue = Arc::new(CommandQueue::new(4));
        let session = PlaybackSession::new(queue, Arc::new(FakeMediaTool::new()), Arc::new(ManualClock::new()));
        let err = session.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NonsupportInCurrentState);
        assert_eq!(session.status().unwrap().mode, PlaybackMode::Stop);
    }

    #[test]
    fn test_full_queue_leaves_state_untouched() {
        let queue = Arc::new(CommandQueue::new(1));
        let clock = Arc::new(ManualClock::new());
        let tool = Arc::new(FakeMediaTool::new().with_duration_ms(1000));
        let session = PlaybackSession::new(queue.clone(), tool, clock);
        session.set_file(Path::new("/media/a.mp4")).unwrap();
        queue.enqueue(&PlaybackCommand::Stop).unwrap();

        let err = session.start().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert_eq!(session.status().unwrap().mode, PlaybackMode::Stop);
    }

    #[test]
    fn test_set_file_stops_current_playback() {
        let (session, queue, clock) = session_with(10_000);
        session.start().unwrap();
        clock.advance_ms(400);
        drain(&queue);

        session.set_file(Path::new("/media/other.mp4")).unwrap();
        assert_eq!(drain(&queue), vec![PlaybackCommand::Stop]);
        let status = session.status().unwrap();
        assert_eq!(status.mode, PlaybackMode::Stop);
        assert_eq!(status.play_pos_ms, 0);
        assert_eq!(session.current_file().unwrap(), Some(PathBuf::from("/media/other.mp4")));
    }

    #[test]
    fn test_empty_path_rejected() {
        let (session, _queue, _clock) = session_with(1000);
        assert_eq!(session.set_file(Path::new("")).unwrap_err().kind(), ErrorKind::InvalidParameter);
    }

    #[test]
    fn test_frames_gated_in_playback_mode() {
        let (session, _queue, _clock) = session_with(10_000);
        assert!(session.frames_allowed());

        session.set_camera_mode(CameraMode::Playback).unwrap();
        assert!(!session.frames_allowed());

        session.start().unwrap();
        assert!(session.frames_allowed());

        session.pause().unwrap();
        assert!(!session.frames_allowed());
        assert_eq!(session.camera_mode().unwrap(), CameraMode::Playback);
    }
}
