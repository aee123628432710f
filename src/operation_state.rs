//! Operation State Machine
//!
//! Tracks one privileged operation from request to outcome and rejects
//! impossible transitions.
//!
//! # Stage Flow
//!
//! ```text
//! Pending
//!     ↓
//! Invoking ──→ Failed
//!     ↓
//! OptimisticDone
//!
//! (Pending can also go straight to Failed: unauthorized, unknown package)
//! ```
//!
//! There is no `Confirmed` stage. The platform's completion result arrives
//! asynchronously; confirmation happens on the next explicit list refresh.

use crate::types::OperationRequest;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Stages of one privileged operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStage {
    /// Request accepted, nothing issued yet
    Pending,
    /// Privileged call(s) in flight
    Invoking,
    /// Call returned without error; success reported before confirmation
    OptimisticDone,
    /// Terminal failure, see the diagnostic
    Failed,
}

impl OperationStage {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::OptimisticDone | Self::Failed)
    }

    /// Whether `to` is a legal successor of `self`.
    pub const fn can_transition_to(self, to: Self) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Invoking)
                | (Self::Pending, Self::Failed)
                | (Self::Invoking, Self::OptimisticDone)
                | (Self::Invoking, Self::Failed)
        )
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Invoking => "Invoking privileged call",
            Self::OptimisticDone => "Done (unconfirmed)",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for OperationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Errors from invalid stage transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationTransitionError {
    #[error("Cannot transition from terminal stage {from}")]
    FromTerminalStage { from: OperationStage },

    #[error("Invalid transition from {from} to {to}")]
    Invalid {
        from: OperationStage,
        to: OperationStage,
    },
}

/// Progress record of one operation.
#[derive(Debug, Clone)]
pub struct OperationTracker {
    request: OperationRequest,
    current: OperationStage,
    diagnostic: Option<String>,
    /// (stage, unix timestamp) for every stage entered
    history: Vec<(OperationStage, u64)>,
}

impl OperationTracker {
    pub fn new(request: OperationRequest) -> Self {
        Self {
            request,
            current: OperationStage::Pending,
            diagnostic: None,
            history: vec![(OperationStage::Pending, unix_now())],
        }
    }

    #[inline]
    pub fn request(&self) -> &OperationRequest {
        &self.request
    }

    #[inline]
    pub fn current_stage(&self) -> OperationStage {
        self.current
    }

    pub fn diagnostic(&self) -> Option<&str> {
        self.diagnostic.as_deref()
    }

    pub fn history(&self) -> &[(OperationStage, u64)] {
        &self.history
    }

    /// Move to `to`.
    ///
    /// # Errors
    ///
    /// - `FromTerminalStage` once the operation has finished
    /// - `Invalid` for any transition not in the stage flow
    pub fn transition_to(&mut self, to: OperationStage) -> Result<(), OperationTransitionError> {
        if self.current.is_terminal() {
            return Err(OperationTransitionError::FromTerminalStage { from: self.current });
        }
        if !self.current.can_transition_to(to) {
            return Err(OperationTransitionError::Invalid {
                from: self.current,
                to,
            });
        }
        log::debug!("{}: {} -> {}", self.request, self.current, to);
        self.current = to;
        self.history.push((to, unix_now()));
        Ok(())
    }

    /// Fail the operation from any non-terminal stage.
    pub fn fail(&mut self, diagnostic: impl Into<String>) -> Result<(), OperationTransitionError> {
        self.transition_to(OperationStage::Failed)?;
        self.diagnostic = Some(diagnostic.into());
        Ok(())
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
