pub mod frame_buffer;
pub mod priority_buffer;

pub use frame_buffer::{FrameBuffer, FrameError};
pub use priority_buffer::{PriorityBuffer, ReadChunk};
