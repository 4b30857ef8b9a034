pub mod clock;
pub mod command_queue;
pub mod ffmpeg_manager;
pub mod frame_index;
pub mod frame_sender;
pub mod media_file;
pub mod media_tool;
pub mod session;
pub mod sink;
pub mod temp_file;

#[cfg(test)]
pub mod testing;

pub use clock::*;
pub use command_queue::*;
pub use frame_sender::*;
pub use media_file::*;
pub use media_tool::*;
pub use session::*;
pub use sink::*;
