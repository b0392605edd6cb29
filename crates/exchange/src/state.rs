/// Handshake lifecycle. Rotation does not revisit these states — a
/// completed exchange stays `Complete` through every subsequent rotation;
/// only the active generation counter advances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Initiating,
    Responding,
    Complete,
    Error(String),
}

impl ExchangeState {
    pub fn is_complete(&self) -> bool {
        matches!(self, ExchangeState::Complete)
    }
}
