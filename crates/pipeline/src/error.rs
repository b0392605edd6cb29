use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("frame-transport hook is not available on this platform")]
    UnsupportedPlatform,
    #[error("worker channel closed unexpectedly")]
    WorkerChannelClosed,
}

pub type Result<T> = std::result::Result<T, PipelineError>;
