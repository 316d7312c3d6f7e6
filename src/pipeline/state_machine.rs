use crate::pipeline::error::{PipelineError, PipelineResult};
use crate::pipeline::types::{PipelineStage, PipelineState, PipelineTransition};
use parking_lot::RwLock;
use std::sync::Arc;

/// Tracks one pipeline run through its stages.
///
/// Stages only move forward; a failed or completed run accepts no further
/// transitions.
#[derive(Clone)]
pub struct InstallStateMachine {
    state: Arc<RwLock<PipelineState>>,
}

impl Default for InstallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallStateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(PipelineState::Pending)),
        }
    }

    /// Stage currently running, if any
    pub fn current_stage(&self) -> Option<PipelineStage> {
        match &*self.state.read() {
            PipelineState::Running(stage) => Some(*stage),
            _ => None,
        }
    }

    pub fn transition(&self, event: PipelineTransition) -> PipelineResult<PipelineState> {
        let mut state = self.state.write();

        let new_state = match (&*state, &event) {
            (PipelineState::Pending, PipelineTransition::Start) => {
                PipelineState::Running(PipelineStage::Initializing)
            }

            (PipelineState::Running(stage), PipelineTransition::Advance) => match stage.next() {
                Some(next) => PipelineState::Running(next),
                None => PipelineState::Completed,
            },

            (PipelineState::Running(stage), PipelineTransition::Fail(reason)) => {
                PipelineState::Failed {
                    stage: *stage,
                    reason: reason.clone(),
                }
            }

            _ => {
                return Err(PipelineError::InvalidStateTransition(format!(
                    "Cannot handle {:?} in state {:?}",
                    event, *state
                )));
            }
        };

        *state = new_state.clone();
        Ok(new_state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_creation() {
        let sm = InstallStateMachine::new();
        assert_eq!(sm.current_stage(), None);
        assert_eq!(
            sm.transition(PipelineTransition::Start).unwrap(),
            PipelineState::Running(PipelineStage::Initializing)
        );
    }

    #[test]
    fn test_walks_every_stage_in_order() {
        let sm = InstallStateMachine::new();
        sm.transition(PipelineTransition::Start).unwrap();

        let mut seen = Vec::new();
        let mut last = PipelineState::Pending;
        while let Some(stage) = sm.current_stage() {
            seen.push(stage);
            last = sm.transition(PipelineTransition::Advance).unwrap();
        }

        assert_eq!(seen, PipelineStage::ALL);
        assert_eq!(last, PipelineState::Completed);
    }

    #[test]
    fn test_failure_keeps_stage() {
        let sm = InstallStateMachine::new();
        sm.transition(PipelineTransition::Start).unwrap();
        sm.transition(PipelineTransition::Advance).unwrap();

        let state = sm
            .transition(PipelineTransition::Fail("disk full".into()))
            .unwrap();
        assert_eq!(
            state,
            PipelineState::Failed {
                stage: PipelineStage::PreparingContainer,
                reason: "disk full".into()
            }
        );
        assert!(state.is_terminal());
    }

    #[test]
    fn test_invalid_transitions() {
        let sm = InstallStateMachine::new();
        assert!(sm.transition(PipelineTransition::Advance).is_err());
        assert!(sm.transition(PipelineTransition::Fail("x".into())).is_err());

        sm.transition(PipelineTransition::Start).unwrap();
        assert!(sm.transition(PipelineTransition::Start).is_err());

        let failed = sm.transition(PipelineTransition::Fail("x".into())).unwrap();
        assert!(sm.transition(PipelineTransition::Advance).is_err());
        assert!(matches!(
            failed,
            PipelineState::Failed { stage: PipelineStage::Initializing, .. }
        ));
        assert_eq!(sm.current_stage(), None);
    }
}
