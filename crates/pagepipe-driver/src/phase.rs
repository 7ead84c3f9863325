use std::fmt;

/// Where a conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Spawning,
    SendingDocument,
    ServingAssets,
    Finalizing,
    Draining,
    Closed,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Spawning => "spawning",
            Phase::SendingDocument => "sending the document",
            Phase::ServingAssets => "serving assets",
            Phase::Finalizing => "finalizing",
            Phase::Draining => "draining output",
            Phase::Closed => "closing",
            Phase::Failed => "failed",
        })
    }
}

impl Phase {
    /// Whether the conversation has stopped, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Closed | Phase::Failed)
    }
}
