// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Completion tracking for transfer slots
//!
//! Each slot of a [`crate::multibuffer::TransferPool`] is either free or waiting on
//! the GPU.  This module owns the fences that tell the two apart.
//!
//! # Overview
//!
//! Slots move through two states:
//! - `Free`: no fence is outstanding.  Data in the slot may be read.
//! - `PendingGpu`: a read was issued into the slot and its fence has not been
//!   consumed yet.
//!
//! `record_completion` moves a slot to `PendingGpu`; `wait_and_clear` moves it
//! back to `Free`.  There is no terminal state; slots cycle for the lifetime of the
//! reader.
//!
//! # Timeouts
//!
//! `wait_and_clear` returns the slot to `Free` whether the fence signaled or the
//! wait timed out.  Callers go on to read the slot either way, accepting possibly
//! torn data over a stall.  Do not turn a timeout into an error here.

use crate::commands::{Fence, GpuCommands, WaitStatus};
use std::fmt::{Debug, Formatter};
use std::time::Duration;

/// Whether a slot has an outstanding fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotState {
    Free,
    PendingGpu,
}

impl std::fmt::Display for SlotState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = match self {
            SlotState::Free => "FREE",
            SlotState::PendingGpu => "PENDING_GPU",
        };
        write!(f, "{state}")
    }
}

/**
Per-slot completion tokens for a pool of `N` slots.

Fences are owned here and are always handed back to the command stream for
deletion; none are leaked when superseded or when the tracker is cleared.
*/
pub struct CompletionTracker<const N: usize> {
    tokens: [Option<Fence>; N],
}

impl<const N: usize> CompletionTracker<N> {
    pub fn new() -> Self {
        CompletionTracker {
            tokens: std::array::from_fn(|_| None),
        }
    }

    pub fn state(&self, slot: usize) -> SlotState {
        match self.tokens[slot] {
            Some(_) => SlotState::PendingGpu,
            None => SlotState::Free,
        }
    }

    /// Number of slots in `PendingGpu`.
    pub fn pending(&self) -> usize {
        self.tokens.iter().filter(|t| t.is_some()).count()
    }

    /**
    Inserts a fence after the most recent command for `slot`.

    A fence still outstanding for the slot is superseded: only the newest fence per
    slot is ever waited on, and since fences signal in issue order the newer one
    covers everything the older one did.  The superseded fence is deleted.
    */
    pub fn record_completion<C: GpuCommands + ?Sized>(&mut self, slot: usize, commands: &C) {
        if let Some(superseded) = self.tokens[slot].take() {
            logwise::trace_sync!(
                "superseding unconsumed fence on slot {slot}",
                slot = slot
            );
            commands.delete_sync(superseded);
        }
        self.tokens[slot] = Some(commands.fence_sync());
    }

    /**
    Waits for `slot`'s fence, then deletes it.

    Returns `None` without blocking when the slot is already free.  Otherwise blocks
    until the fence signals or `timeout` passes and returns how the wait ended.  The
    slot is free afterwards in both cases.
    */
    pub fn wait_and_clear<C: GpuCommands + ?Sized>(
        &mut self,
        slot: usize,
        timeout: Duration,
        commands: &C,
    ) -> Option<WaitStatus> {
        let fence = self.tokens[slot].take()?;
        let wait = logwise::perfwarn_begin!("CompletionTracker::wait_and_clear");
        let status = commands.client_wait_sync(&fence, timeout);
        drop(wait);
        if !status.is_signaled() {
            logwise::trace_sync!(
                "slot {slot} fence did not signal ({status}); reading anyway",
                slot = slot,
                status = logwise::privacy::LogIt(&status)
            );
        }
        commands.delete_sync(fence);
        Some(status)
    }

    /// Deletes every outstanding fence without waiting.
    pub fn clear_all<C: GpuCommands + ?Sized>(&mut self, commands: &C) {
        for token in self.tokens.iter_mut() {
            if let Some(fence) = token.take() {
                commands.delete_sync(fence);
            }
        }
    }
}

impl<const N: usize> Default for CompletionTracker<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Debug for CompletionTracker<N> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let states: Vec<SlotState> = (0..N).map(|i| self.state(i)).collect();
        f.debug_struct("CompletionTracker")
            .field("states", &states)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Immediate;
    use crate::imp::SoftwareGpu;

    fn commands() -> Immediate<SoftwareGpu> {
        Immediate::new(SoftwareGpu::new(2, 2))
    }

    #[test]
    fn free_slot_does_not_wait() {
        let commands = commands();
        let mut tracker = CompletionTracker::<2>::new();
        assert_eq!(
            tracker.wait_and_clear(0, Duration::from_millis(1), &commands),
            None
        );
        assert_eq!(tracker.state(0), SlotState::Free);
    }

    #[test]
    fn record_then_wait_cycles_state() {
        let commands = commands();
        let mut tracker = CompletionTracker::<3>::new();
        tracker.record_completion(1, &commands);
        assert_eq!(tracker.state(1), SlotState::PendingGpu);
        assert_eq!(tracker.pending(), 1);
        let status = tracker.wait_and_clear(1, Duration::from_millis(10), &commands);
        assert!(status.is_some_and(WaitStatus::is_signaled));
        assert_eq!(tracker.state(1), SlotState::Free);
        assert_eq!(commands.with_backend(|b| b.live_fences()), 0);
    }

    #[test]
    fn superseded_and_cleared_fences_are_deleted() {
        let commands = commands();
        let mut tracker = CompletionTracker::<2>::new();
        tracker.record_completion(0, &commands);
        tracker.record_completion(0, &commands);
        tracker.record_completion(1, &commands);
        assert_eq!(commands.with_backend(|b| b.live_fences()), 2);
        tracker.clear_all(&commands);
        assert_eq!(tracker.pending(), 0);
        assert_eq!(commands.with_backend(|b| b.live_fences()), 0);
    }
}
