/// Media kind a sender/receiver handle carries frames for. A 1:1 call has
/// at most one sender and one receiver per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

/// Which transform-installation ordering the host platform requires when
/// a new key takes effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformVariant {
    /// Chrome/Firefox-style encoded-streams: transforms are attached once,
    /// up front, in pass-through mode; keys are pushed and encryption is
    /// enabled afterwards.
    ChainOfTransforms,
    /// Safari-style script transform: the key must reach the worker before
    /// the transform is attached, because attaching dispatches the setup
    /// event synchronously.
    ScriptTransform,
}

/// The host's frame-transport capability. Out of scope here is the actual
/// WebRTC negotiation; this trait is the single seam the adapter needs —
/// whether a transform hook exists at all, and which ordering it requires.
pub trait FrameTransport: Send + Sync {
    /// `None` means the hook is unavailable — the adapter surfaces
    /// `PipelineError::UnsupportedPlatform` and the caller may choose to
    /// continue the call without E2EE.
    fn platform_variant(&self) -> Option<PlatformVariant>;
}
