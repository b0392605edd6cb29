//! Frame pipeline adapter: bridges the frame codec to the host's
//! encoded-frame transport, per media kind, with back-pressure and
//! per-frame error isolation. See [`adapter::FramePipelineAdapter`].

pub mod adapter;
pub mod error;
pub mod stats;
pub mod transport;
pub mod worker;

pub use adapter::{FramePipelineAdapter, PipelineStats};
pub use error::{PipelineError, Result};
pub use stats::{FrameStats, FrameStatsSnapshot};
pub use transport::{FrameTransport, MediaKind, PlatformVariant};
pub use worker::{FrameOutcome, FrameWorker, MAX_PENDING_OPERATIONS, OPERATION_TIMEOUT};
