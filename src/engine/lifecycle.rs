//! Lifecycle state machine of a convolver
//!
//! Every state change goes through [`LifecycleState::can_transition_to`], so
//! which operation is legal in which state is written down in one place.
//! The current state lives in an [`AtomicLifecycle`] so the audio thread can
//! read it without locking.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of one convolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LifecycleState {
    /// Constructed, never started; audio is bypassed
    #[default]
    Idle = 0,
    /// A build is scheduled or running on the worker
    Building = 1,
    /// A state was published and waits for the audio thread to pick it up
    Swapped = 2,
    /// The audio thread processes with a published state
    Running = 3,
    /// Explicitly stopped; audio is bypassed
    Stopped = 4,
    /// The last build failed, or processing was suspended
    Failed = 5,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Idle => write!(f, "Idle"),
            LifecycleState::Building => write!(f, "Building"),
            LifecycleState::Swapped => write!(f, "Swapped"),
            LifecycleState::Running => write!(f, "Running"),
            LifecycleState::Stopped => write!(f, "Stopped"),
            LifecycleState::Failed => write!(f, "Failed"),
        }
    }
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::Building,
            2 => LifecycleState::Swapped,
            3 => LifecycleState::Running,
            4 => LifecycleState::Stopped,
            5 => LifecycleState::Failed,
            _ => LifecycleState::Idle,
        }
    }

    /// Transition table
    ///
    /// | from \ to | Building | Swapped | Running | Stopped | Failed |
    /// |-----------|----------|---------|---------|---------|--------|
    /// | Idle      | yes      |         |         | yes     | yes    |
    /// | Building  | yes      | yes     |         | yes     | yes    |
    /// | Swapped   | yes      | yes     | yes     | yes     | yes    |
    /// | Running   | yes      |         |         | yes     | yes    |
    /// | Stopped   | yes      |         |         | yes     |        |
    /// | Failed    | yes      | yes     |         | yes     | yes    |
    ///
    /// `Failed -> Swapped` is a build published after a suspension.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        match (self, next) {
            (_, Building) | (_, Stopped) => true,
            (Idle, Failed) => true,
            (Building, Swapped) | (Building, Failed) => true,
            (Swapped, Swapped) | (Swapped, Running) | (Swapped, Failed) => true,
            (Running, Failed) => true,
            (Failed, Swapped) | (Failed, Failed) => true,
            _ => false,
        }
    }

    /// Only a picked-up published state counts as runnable
    pub fn is_runnable(self) -> bool {
        self == LifecycleState::Running
    }

    /// States in which the audio thread must not use any state
    pub fn bypasses_audio(self) -> bool {
        matches!(self, LifecycleState::Idle | LifecycleState::Stopped)
    }

    /// A build has been requested and not yet picked up
    pub fn is_pending(self) -> bool {
        matches!(self, LifecycleState::Building | LifecycleState::Swapped)
    }
}

/// Lock-free cell holding a [`LifecycleState`]
#[derive(Debug, Default)]
pub struct AtomicLifecycle(AtomicU8);

impl AtomicLifecycle {
    pub fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move to `next` if the table allows it from the current state
    ///
    /// Returns the state that was replaced, or `Err` with the current state
    /// when the transition is illegal.
    pub fn transition(&self, next: LifecycleState) -> Result<LifecycleState, LifecycleState> {
        let mut current = self.load();
        loop {
            if !current.can_transition_to(next) {
                return Err(current);
            }
            match self.0.compare_exchange_weak(
                current as u8,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current),
                Err(actual) => current = LifecycleState::from_u8(actual),
            }
        }
    }

    /// Move from exactly `from` to `to`
    #[inline]
    pub fn compare_exchange(&self, from: LifecycleState, to: LifecycleState) -> bool {
        debug_assert!(from.can_transition_to(to));
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
