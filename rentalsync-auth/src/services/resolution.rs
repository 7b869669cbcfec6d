//! Profile resolution as a pure state machine.
//!
//! The driver (the session manager) performs each [`Step`] against the
//! profile store and feeds the result back as an [`Input`]. Nothing here
//! touches the network or the clock, so every path can be walked in a
//! plain unit test.

use service_core::retry::Retryable;
use std::time::Duration;

use crate::models::Profile;
use crate::stores::StoreError;

/// Whether exhausting the read attempts may insert a synthesized profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackPolicy {
    Forbid,
    Create,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionOutcome {
    /// The profile row was read.
    Found(Profile),
    /// No row existed; a fallback row was inserted and read back.
    Synthesized(Profile),
    /// The row exists but the account is switched off.
    Deactivated(Profile),
    /// The account is switched off and its session could not be revoked.
    RevokeFailed(StoreError),
    /// Attempts exhausted without a row and fallback was not permitted.
    NotFound,
    /// A store failure ended resolution. The session keeps no profile.
    Failed(StoreError),
    /// An identity transition happened while resolving; nothing was committed.
    Superseded,
}

impl ResolutionOutcome {
    pub fn profile(&self) -> Option<&Profile> {
        match self {
            ResolutionOutcome::Found(p) | ResolutionOutcome::Synthesized(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_synthesized(&self) -> bool {
        matches!(self, ResolutionOutcome::Synthesized(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionState {
    Reading { attempt: u32 },
    InsertingFallback,
    RereadingFallback,
    Settled(ResolutionOutcome),
}

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Read the profile after waiting `delay`.
    Fetch { delay: Duration },
    InsertFallback,
    Settle(ResolutionOutcome),
}

/// Result of performing the last step.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Fetched(Profile),
    Missing,
    ReadFailed(StoreError),
    Inserted,
    InsertRejected(StoreError),
}

#[derive(Debug, Clone)]
pub struct Resolution {
    max_attempts: u32,
    delay: Duration,
    fallback: FallbackPolicy,
    state: ResolutionState,
}

impl Resolution {
    pub fn new(max_attempts: u32, delay: Duration, fallback: FallbackPolicy) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            fallback,
            state: ResolutionState::Reading { attempt: 1 },
        }
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    /// Current read attempt, 1-based. Zero once reading is over.
    pub fn attempt(&self) -> u32 {
        match self.state {
            ResolutionState::Reading { attempt } => attempt,
            _ => 0,
        }
    }

    /// Allow the fallback insert from the next exhausted read on.
    pub fn permit_fallback(&mut self) {
        self.fallback = FallbackPolicy::Create;
    }

    /// Fallback became permitted after the machine settled as
    /// [`ResolutionOutcome::NotFound`]; go on to insert it.
    pub fn reopen_with_fallback(&mut self) -> Step {
        self.permit_fallback();
        self.state = ResolutionState::InsertingFallback;
        Step::InsertFallback
    }

    /// The first read happens immediately.
    pub fn start(&self) -> Step {
        Step::Fetch {
            delay: Duration::ZERO,
        }
    }

    pub fn advance(&mut self, input: Input) -> Step {
        let (state, step) = transition(
            &self.state,
            input,
            self.max_attempts,
            self.delay,
            self.fallback,
        );
        self.state = state;
        step
    }
}

fn settle(outcome: ResolutionOutcome) -> (ResolutionState, Step) {
    (
        ResolutionState::Settled(outcome.clone()),
        Step::Settle(outcome),
    )
}

/// Pure transition function.
pub fn transition(
    state: &ResolutionState,
    input: Input,
    max_attempts: u32,
    delay: Duration,
    fallback: FallbackPolicy,
) -> (ResolutionState, Step) {
    match (state, input) {
        (ResolutionState::Reading { .. }, Input::Fetched(profile)) if !profile.is_active => {
            settle(ResolutionOutcome::Deactivated(profile))
        }
        (ResolutionState::Reading { .. }, Input::Fetched(profile)) => {
            settle(ResolutionOutcome::Found(profile))
        }
        (ResolutionState::Reading { attempt }, Input::Missing) => {
            if *attempt < max_attempts {
                retry(*attempt, delay)
            } else if fallback == FallbackPolicy::Create {
                (ResolutionState::InsertingFallback, Step::InsertFallback)
            } else {
                settle(ResolutionOutcome::NotFound)
            }
        }
        (ResolutionState::Reading { attempt }, Input::ReadFailed(err)) => {
            // Running out of attempts because the store is down says nothing
            // about whether the row exists, so no fallback here.
            if err.is_retryable() && *attempt < max_attempts {
                retry(*attempt, delay)
            } else {
                settle(ResolutionOutcome::Failed(err))
            }
        }

        (ResolutionState::InsertingFallback, Input::Inserted)
        | (ResolutionState::InsertingFallback, Input::InsertRejected(StoreError::Conflict(_))) => (
            ResolutionState::RereadingFallback,
            Step::Fetch {
                delay: Duration::ZERO,
            },
        ),
        (ResolutionState::InsertingFallback, Input::InsertRejected(err)) => {
            settle(ResolutionOutcome::Failed(err))
        }

        (ResolutionState::RereadingFallback, Input::Fetched(profile)) => {
            settle(ResolutionOutcome::Synthesized(profile))
        }
        (ResolutionState::RereadingFallback, Input::Missing) => settle(ResolutionOutcome::Failed(
            StoreError::NotFound("fallback profile not readable after insert".to_string()),
        )),
        (ResolutionState::RereadingFallback, Input::ReadFailed(err)) => {
            settle(ResolutionOutcome::Failed(err))
        }

        (ResolutionState::Settled(outcome), _) => settle(outcome.clone()),

        (state, input) => settle(ResolutionOutcome::Failed(StoreError::InvalidRecord(format!(
            "unexpected {:?} while {:?}",
            input, state
        )))),
    }
}

fn retry(attempt: u32, delay: Duration) -> (ResolutionState, Step) {
    (
        ResolutionState::Reading {
            attempt: attempt + 1,
        },
        Step::Fetch { delay },
    )
}
