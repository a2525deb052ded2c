// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Binding and synchronization state layered over [`crate::commands`]. */

pub mod bind_buffer;
pub mod resource_tracking;

pub use bind_buffer::CachedBindBuffer;
pub use resource_tracking::{CompletionTracker, SlotState};
