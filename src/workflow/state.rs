//! Run state management with phase transition validation.
//!
//! This module provides `RunState`, which tracks the phase of a single
//! workflow run and rejects transitions outside the run state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::{RunPhase, WorkflowId};

/// A record of a phase transition with timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseHistoryEntry {
    /// The phase that was entered.
    pub phase: RunPhase,
    /// When this phase was entered.
    pub entered_at: DateTime<Utc>,
}

/// Tracks the phase of one workflow run.
///
/// Valid transitions:
///
/// Initializing -> Executing -> Completed | Failed
///
/// Initializing can also go straight to Failed when the graph cannot be
/// built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    workflow_id: WorkflowId,
    phase: RunPhase,
    /// History of all phases visited, in order.
    phase_history: Vec<PhaseHistoryEntry>,
}

impl RunState {
    /// Start a new run in the Initializing phase.
    pub fn new() -> Self {
        Self {
            workflow_id: WorkflowId::new(),
            phase: RunPhase::Initializing,
            phase_history: vec![PhaseHistoryEntry {
                phase: RunPhase::Initializing,
                entered_at: Utc::now(),
            }],
        }
    }

    /// Check if a transition to the target phase is valid from the current phase.
    pub fn can_transition(&self, target: RunPhase) -> bool {
        matches!(
            (self.phase, target),
            (RunPhase::Initializing, RunPhase::Executing)
                | (RunPhase::Initializing, RunPhase::Failed)
                | (RunPhase::Executing, RunPhase::Completed)
                | (RunPhase::Executing, RunPhase::Failed)
        )
    }

    /// Attempt to move the run to a new phase.
    pub fn transition(&mut self, target: RunPhase) -> Result<()> {
        if !self.can_transition(target) {
            return Err(Error::InvalidPhaseTransition {
                from: self.phase.to_string(),
                to: target.to_string(),
            });
        }

        self.phase = target;
        self.phase_history.push(PhaseHistoryEntry {
            phase: target,
            entered_at: Utc::now(),
        });

        Ok(())
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn current_phase(&self) -> RunPhase {
        self.phase
    }

    pub fn phase_history(&self) -> &[PhaseHistoryEntry] {
        &self.phase_history
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}
