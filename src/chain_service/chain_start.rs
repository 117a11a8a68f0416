/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The one-shot "chain start" latch.
//!
//! The latch fires at most once, when the genesis state has been built and stored. Waiters attached
//! before it fires are released when it fires; waiters attached after it fired observe the event
//! immediately. Closing the latch (on shutdown) releases waiters that are still waiting with
//! [`LatchWaitError::Closed`].

use std::{
    sync::{Arc, Condvar, Mutex, MutexGuard},
    time::{Duration, Instant},
};

use crate::types::data_types::{CryptoHash, Timestamp};

/// What subscribers learn when the chain starts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainStart {
    pub genesis_time: Timestamp,
    pub genesis_root: CryptoHash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LatchState {
    Waiting,
    Fired(ChainStart),
    Closed,
}

/// A cloneable handle to a shared chain start latch.
#[derive(Clone)]
pub struct ChainStartLatch {
    inner: Arc<(Mutex<LatchState>, Condvar)>,
}

impl ChainStartLatch {
    pub fn new() -> Self {
        ChainStartLatch {
            inner: Arc::new((Mutex::new(LatchState::Waiting), Condvar::new())),
        }
    }

    /// Fire the latch with `chain_start`, releasing every waiter.
    ///
    /// Returns whether this call fired the latch. Calls after the first, or after
    /// [`close`](Self::close), have no effect.
    pub fn fire(&self, chain_start: ChainStart) -> bool {
        let mut state = self.lock();
        if *state != LatchState::Waiting {
            return false;
        }
        *state = LatchState::Fired(chain_start);
        self.inner.1.notify_all();
        true
    }

    /// Release every waiter with [`LatchWaitError::Closed`]. Has no effect on a fired latch.
    pub fn close(&self) {
        let mut state = self.lock();
        if *state == LatchState::Waiting {
            *state = LatchState::Closed;
            self.inner.1.notify_all();
        }
    }

    /// Get the chain start event without waiting, if the latch has fired.
    pub fn try_get(&self) -> Option<ChainStart> {
        match *self.lock() {
            LatchState::Fired(chain_start) => Some(chain_start),
            _ => None,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.try_get().is_some()
    }

    /// Block until the latch fires or is closed.
    pub fn wait(&self) -> Result<ChainStart, LatchWaitError> {
        let mut state = self.lock();
        loop {
            match *state {
                LatchState::Fired(chain_start) => return Ok(chain_start),
                LatchState::Closed => return Err(LatchWaitError::Closed),
                LatchState::Waiting => {
                    state = self
                        .inner
                        .1
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                }
            }
        }
    }

    /// Block until the latch fires or is closed, or until `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<ChainStart, LatchWaitError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            match *state {
                LatchState::Fired(chain_start) => return Ok(chain_start),
                LatchState::Closed => return Err(LatchWaitError::Closed),
                LatchState::Waiting => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(LatchWaitError::Timeout);
                    }
                    state = self
                        .inner
                        .1
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, LatchState> {
        self.inner
            .0
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ChainStartLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchWaitError {
    Timeout,
    Closed,
}
