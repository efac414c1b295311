//! Per-run phase tracking.
//!
//! `Idle → Testing → Fetching ⇄ Upserting → Done`. `Done` is reachable from
//! every live phase so failures can end a run anywhere; nothing leaves `Done`.

use std::fmt::{Display, Formatter};

use tracing::debug;

use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Testing,
    Fetching,
    Upserting,
    Done { success: bool },
}

impl SyncPhase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Testing => "testing",
            Self::Fetching => "fetching",
            Self::Upserting => "upserting",
            Self::Done { success: true } => "done(success)",
            Self::Done { success: false } => "done(error)",
        }
    }

    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Testing)
                | (Self::Testing, Self::Fetching)
                | (Self::Fetching, Self::Upserting)
                | (Self::Upserting, Self::Fetching)
                | (Self::Idle | Self::Testing | Self::Fetching | Self::Upserting, Self::Done { .. })
        )
    }
}

impl Display for SyncPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub(crate) struct PhaseTracker {
    connection_id: i64,
    phase: SyncPhase,
}

impl PhaseTracker {
    pub(crate) fn new(connection_id: i64) -> Self {
        Self {
            connection_id,
            phase: SyncPhase::Idle,
        }
    }

    pub(crate) fn phase(&self) -> SyncPhase {
        self.phase
    }

    pub(crate) fn advance(&mut self, next: SyncPhase) -> Result<(), SyncError> {
        if !self.phase.can_advance_to(next) {
            return Err(SyncError::InvalidTransition {
                from: self.phase.to_string(),
                to: next.to_string(),
            });
        }
        debug!(connection_id = self.connection_id, from = %self.phase, to = %next, "sync phase");
        self.phase = next;
        Ok(())
    }

    /// Close the run unless it already finished.
    pub(crate) fn finish(&mut self, success: bool) {
        if !matches!(self.phase, SyncPhase::Done { .. }) {
            let _ = self.advance(SyncPhase::Done { success });
        }
    }
}
