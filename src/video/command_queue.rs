use std::path::PathBuf;
use std::sync::Mutex;

use crate::core::{MediaError, Result};

/// Longest path (in UTF-8 bytes) a Start command can carry
pub const MAX_COMMAND_PATH_LEN: usize = 256;

/// Serialized size of one command: kind, seek time, path length, path bytes
pub const COMMAND_RECORD_SIZE: usize = 1 + 4 + 2 + MAX_COMMAND_PATH_LEN;

const KIND_START: u8 = 0;
const KIND_PAUSE: u8 = 1;
const KIND_STOP: u8 = 2;

/// Playback intent handed from the control API to the frame-send task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackCommand {
    Start { path: PathBuf, seek_ms: u32 },
    Pause,
    Stop,
}

impl PlaybackCommand {
    fn encode(&self) -> Result<[u8; COMMAND_RECORD_SIZE]> {
        let mut record = [0u8; COMMAND_RECORD_SIZE];
        match self {
            PlaybackCommand::Start { path, seek_ms } => {
                let path = path.to_str().ok_or_else(|| {
                    MediaError::InvalidParameter(format!("path {} is not valid UTF-8", path.display()))
                })?;
                let bytes = path.as_bytes();
                if bytes.len() > MAX_COMMAND_PATH_LEN {
                    return Err(MediaError::InvalidParameter(format!(
                        "path is {} bytes, limit is {}",
                        bytes.len(),
                        MAX_COMMAND_PATH_LEN
                    )));
                }
                record[0] = KIND_START;
                record[1..5].copy_from_slice(&seek_ms.to_le_bytes());
                record[5..7].copy_from_slice(&(bytes.len() as u16).to_le_bytes());
                record[7..7 + bytes.len()].copy_from_slice(bytes);
            }
            PlaybackCommand::Pause => record[0] = KIND_PAUSE,
            PlaybackCommand::Stop => record[0] = KIND_STOP,
        }
        Ok(record)
    }

    fn decode(record: &[u8; COMMAND_RECORD_SIZE]) -> Result<Self> {
        match record[0] {
            KIND_START => {
                let seek_ms = u32::from_le_bytes([record[1], record[2], record[3], record[4]]);
                let len = u16::from_le_bytes([record[5], record[6]]) as usize;
                let path = std::str::from_utf8(&record[7..7 + len.min(MAX_COMMAND_PATH_LEN)])
                    .map_err(|e| MediaError::Unknown(format!("corrupt command path: {}", e)))?;
                Ok(PlaybackCommand::Start { path: PathBuf::from(path), seek_ms })
            }
            KIND_PAUSE => Ok(PlaybackCommand::Pause),
            KIND_STOP => Ok(PlaybackCommand::Stop),
            other => Err(MediaError::Unknown(format!("corrupt command kind {}", other))),
        }
    }
}

struct RingBuffer {
    data: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
    used: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            read_pos: 0,
            write_pos: 0,
            used: 0,
        }
    }

    fn free(&self) -> usize {
        self.data.len() - self.used
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.data[self.write_pos] = b;
            self.write_pos = (self.write_pos + 1) % self.data.len();
        }
        self.used += bytes.len();
    }

    fn read(&mut self, out: &mut [u8]) {
        for slot in out.iter_mut() {
            *slot = self.data[self.read_pos];
            self.read_pos = (self.read_pos + 1) % self.data.len();
        }
        self.used -= out.len();
    }
}

/// Fixed-capacity, mutex-protected FIFO of serialized playback commands.
/// Never blocks: a full queue rejects the command and leaves the buffer untouched.
pub struct CommandQueue {
    buffer: Mutex<RingBuffer>,
}

impl CommandQueue {
    pub fn new(capacity_commands: usize) -> Self {
        Self {
            buffer: Mutex::new(RingBuffer::new(capacity_commands.max(1) * COMMAND_RECORD_SIZE)),
        }
    }

    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.buffer
            .lock()
            .map(|b| b.data.len() / COMMAND_RECORD_SIZE)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.buffer
            .lock()
            .map(|b| b.used / COMMAND_RECORD_SIZE)
            .unwrap_or(0)
    }

    pub fn enqueue(&self, command: &PlaybackCommand) -> Result<()> {
        let record = command.encode()?;
        let mut buffer = self.buffer.lock().map_err(|_| MediaError::poisoned("command queue"))?;

        if buffer.free() < COMMAND_RECORD_SIZE {
            return Err(MediaError::OutOfRange(format!(
                "command queue full, {} bytes free",
                buffer.free()
            )));
        }

        buffer.write(&record);
        Ok(())
    }

    pub fn dequeue_if_any(&self) -> Result<Option<PlaybackCommand>> {
        let mut buffer = self.buffer.lock().map_err(|_| MediaError::poisoned("command queue"))?;
        if buffer.used < COMMAND_RECORD_SIZE {
            return Ok(None);
        }

        let mut record = [0u8; COMMAND_RECORD_SIZE];
        buffer.read(&mut record);
        drop(buffer);

        PlaybackCommand::decode(&record).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ErrorKind;

    fn start(path: &str, seek_ms: u32) -> PlaybackCommand {
        PlaybackCommand::Start { path: PathBuf::from(path), seek_ms }
    }

    #[test]
    fn test_fifo_order() {
        let queue = CommandQueue::new(8);
        queue.enqueue(&start("/media/a.mp4", 1500)).unwrap();
        queue.enqueue(&PlaybackCommand::Pause).unwrap();
        queue.enqueue(&PlaybackCommand::Stop).unwrap();

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue_if_any().unwrap(), Some(start("/media/a.mp4", 1500)));
        assert_eq!(queue.dequeue_if_any().unwrap(), Some(PlaybackCommand::Pause));
        assert_eq!(queue.dequeue_if_any().unwrap(), Some(PlaybackCommand::Stop));
        assert_eq!(queue.dequeue_if_any().unwrap(), None);
    }

    #[test]
    fn test_full_queue_rejects_then_recovers() {
        let queue = CommandQueue::new(4);
        assert_eq!(queue.capacity(), 4);
        for i in 0..4 {
            queue.enqueue(&start("/media/clip.mp4", i)).unwrap();
        }

        let err = queue.enqueue(&PlaybackCommand::Stop).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.dequeue_if_any().unwrap(), Some(start("/media/clip.mp4", 0)));
        queue.enqueue(&PlaybackCommand::Stop).unwrap();

        // the rejected command never made it in; order is preserved across the wrap
        for i in 1..4 {
            assert_eq!(queue.dequeue_if_any().unwrap(), Some(start("/media/clip.mp4", i)));
        }
        assert_eq!(queue.dequeue_if_any().unwrap(), Some(PlaybackCommand::Stop));
        assert_eq!(queue.dequeue_if_any().unwrap(), None);
    }

    #[test]
    fn test_no_loss_while_capacity_remains() {
        let queue = CommandQueue::new(3);
        for round in 0..20u32 {
            queue.enqueue(&start("/m/x.mp4", round)).unwrap();
            queue.enqueue(&PlaybackCommand::Pause).unwrap();
            assert_eq!(queue.dequeue_if_any().unwrap(), Some(start("/m/x.mp4", round)));
            assert_eq!(queue.dequeue_if_any().unwrap(), Some(PlaybackCommand::Pause));
        }
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_overlong_path_is_rejected() {
        let queue = CommandQueue::new(2);
        let long = "a".repeat(MAX_COMMAND_PATH_LEN + 1);
        let err = queue.enqueue(&start(&long, 0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidParameter);
        assert_eq!(queue.len(), 0);

        let exact = "b".repeat(MAX_COMMAND_PATH_LEN);
        queue.enqueue(&start(&exact, 7)).unwrap();
        assert_eq!(queue.dequeue_if_any().unwrap(), Some(start(&exact, 7)));
    }
}
