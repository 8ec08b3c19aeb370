// Audio module - real-time microphone capture

pub mod buffer_pool;
mod engine_cpal;

pub use buffer_pool::{
    AnalysisChannels, AudioBuffer, BufferPool, BufferPoolChannels, CaptureThreadChannels,
    DEFAULT_BUFFER_COUNT, DEFAULT_BUFFER_SIZE,
};
pub(crate) use engine_cpal::map_backend_text;
pub use engine_cpal::CpalCaptureStream;
