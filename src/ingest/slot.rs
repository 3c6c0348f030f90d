//! Single-slot "latest frame" mailbox between the capture source and the
//! pipeline worker.
//!
//! The producer never blocks: offering a frame while an older one is still
//! undelivered replaces it, and the older frame is counted as dropped. The
//! worker takes whatever is newest. A slow pipeline therefore drops frames
//! instead of accumulating delay.

use anyhow::{anyhow, Result};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::frame::RawFrame;

#[derive(Default)]
struct SlotState {
    frame: Option<RawFrame>,
    offered: u64,
    dropped: u64,
    closed: bool,
}

#[derive(Default)]
pub struct LatestFrameSlot {
    state: Mutex<SlotState>,
    ready: Condvar,
}

/// Counters for a `LatestFrameSlot`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SlotStats {
    pub offered: u64,
    pub dropped: u64,
}

impl LatestFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, SlotState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("frame slot lock poisoned"))
    }

    /// Hand over a frame. Returns `true` when an undelivered frame was replaced.
    ///
    /// Frames offered after `close` are discarded.
    pub fn offer(&self, frame: RawFrame) -> Result<bool> {
        let mut state = self.lock()?;
        if state.closed {
            return Ok(false);
        }
        state.offered += 1;
        let replaced = state.frame.replace(frame).is_some();
        if replaced {
            state.dropped += 1;
        }
        drop(state);
        self.ready.notify_one();
        Ok(replaced)
    }

    /// Block until a frame is available. `None` once the slot is closed and empty.
    pub fn take(&self) -> Result<Option<RawFrame>> {
        let mut state = self.lock()?;
        loop {
            if let Some(frame) = state.frame.take() {
                return Ok(Some(frame));
            }
            if state.closed {
                return Ok(None);
            }
            state = self
                .ready
                .wait(state)
                .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        }
    }

    /// Like `take`, but gives up after `timeout`.
    pub fn take_timeout(&self, timeout: Duration) -> Result<Option<RawFrame>> {
        let state = self.lock()?;
        let (mut state, _) = self
            .ready
            .wait_timeout_while(state, timeout, |s| s.frame.is_none() && !s.closed)
            .map_err(|_| anyhow!("frame slot lock poisoned"))?;
        Ok(state.frame.take())
    }

    /// Stop accepting frames and wake the worker. A pending frame can still be taken.
    pub fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        self.ready.notify_all();
        Ok(())
    }

    pub fn is_closed(&self) -> Result<bool> {
        Ok(self.lock()?.closed)
    }

    pub fn stats(&self) -> Result<SlotStats> {
        let state = self.lock()?;
        Ok(SlotStats {
            offered: state.offered,
            dropped: state.dropped,
        })
    }
}
