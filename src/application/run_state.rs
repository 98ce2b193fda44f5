// Run state machine
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Step a run was in when it aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Idle,
    Configured,
    Extracting,
    Decoding,
    Merging,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Configured => "configure",
            Self::Extracting => "extract",
            Self::Decoding => "decode",
            Self::Merging => "merge",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Idle,
    Configured,
    Extracting,
    Decoding,
    Merging,
    Complete,
    Aborted {
        step: Step,
        reason: String,
    },
}

impl RunState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &RunState) -> bool {
        use RunState::*;

        matches!(
            (self, target),
            (Idle, Configured)
                | (Configured, Extracting)
                | (Extracting, Decoding)
                | (Decoding, Merging)
                | (Merging, Complete)
                | (Complete, Idle)
                | (Aborted { .. }, Idle)
        ) || (matches!(target, Aborted { .. }) && self.step().is_some())
    }

    /// The in-progress step, `None` for terminal states.
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Idle => Some(Step::Idle),
            Self::Configured => Some(Step::Configured),
            Self::Extracting => Some(Step::Extracting),
            Self::Decoding => Some(Step::Decoding),
            Self::Merging => Some(Step::Merging),
            Self::Complete | Self::Aborted { .. } => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Configured => "Configured",
            Self::Extracting => "Extracting",
            Self::Decoding => "Decoding",
            Self::Merging => "Merging",
            Self::Complete => "Complete",
            Self::Aborted { .. } => "Aborted",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error("invalid run transition {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
    #[error("{step} step failed: {reason}")]
    StepFailed { step: Step, reason: String },
}

/// Owns the state of one run and refuses transitions the machine does not allow.
#[derive(Debug, Default)]
pub struct RunTracker {
    state: RunState,
}

impl RunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn advance(&mut self, next: RunState) -> Result<(), RunError> {
        if !self.state.can_transition_to(&next) {
            return Err(RunError::InvalidTransition {
                from: self.state.name(),
                to: next.name(),
            });
        }
        tracing::debug!("Run state {} -> {}", self.state.name(), next.name());
        self.state = next;
        Ok(())
    }

    /// Wrap a step failure with the step it happened in.
    pub fn fail(&self, error: anyhow::Error) -> RunError {
        RunError::StepFailed {
            step: self.state.step().unwrap_or(Step::Idle),
            reason: format!("{:#}", error),
        }
    }

    /// Move to `Aborted`. A run that already finished is left alone.
    pub fn abort(&mut self, error: &RunError) {
        let (step, reason) = match error {
            RunError::StepFailed { step, reason } => (*step, reason.clone()),
            RunError::InvalidTransition { .. } => match self.state.step() {
                Some(step) => (step, error.to_string()),
                None => return,
            },
        };
        let aborted = RunState::Aborted { step, reason };
        if self.state.can_transition_to(&aborted) {
            self.state = aborted;
        }
    }
}
