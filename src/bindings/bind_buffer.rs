// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Cached buffer bindings.
//!
//! Binding is cheap to ask for and comparatively expensive to issue, and readers
//! rebind the same pack buffer over and over.  [`CachedBindBuffer`] remembers what
//! each target has bound and only issues a bind command when that changes.

use crate::commands::{BufferHandle, BufferTarget, GpuCommands, TARGET_COUNT};
use std::sync::{Arc, Mutex, PoisonError};

/// Tracks the buffer bound to each [`BufferTarget`] and filters redundant binds.
///
/// The cache assumes it is the only thing binding buffers on its command stream.
#[derive(Debug)]
pub struct CachedBindBuffer<C> {
    commands: Arc<C>,
    bound: Mutex<[Option<BufferHandle>; TARGET_COUNT]>,
}

impl<C: GpuCommands> CachedBindBuffer<C> {
    pub fn new(commands: Arc<C>) -> Self {
        CachedBindBuffer {
            commands,
            bound: Mutex::new([None; TARGET_COUNT]),
        }
    }

    /// The command stream binds are issued on.
    pub fn commands(&self) -> &Arc<C> {
        &self.commands
    }

    /**
    Binds `buffer` to `target`, or unbinds with `None`.

    Returns whether a command was issued.
    */
    pub fn bind(&self, target: BufferTarget, buffer: Option<BufferHandle>) -> bool {
        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = &mut bound[target.index()];
        if *slot == buffer {
            return false;
        }
        *slot = buffer;
        //issue while holding the lock so cache order matches command order
        self.commands.bind_buffer(target, buffer);
        true
    }

    pub fn bound(&self, target: BufferTarget) -> Option<BufferHandle> {
        self.bound.lock().unwrap_or_else(PoisonError::into_inner)[target.index()]
    }

    /// Drops cached state for buffers that are about to be deleted.
    ///
    /// Deleting a bound buffer unbinds it, so the cache must forget it too.
    pub fn forget(&self, buffers: &[BufferHandle]) {
        let mut bound = self.bound.lock().unwrap_or_else(PoisonError::into_inner);
        for slot in bound.iter_mut() {
            if slot.is_some_and(|b| buffers.contains(&b)) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::Immediate;
    use crate::imp::SoftwareGpu;

    fn binder() -> CachedBindBuffer<Immediate<SoftwareGpu>> {
        CachedBindBuffer::new(Arc::new(Immediate::new(SoftwareGpu::new(4, 4))))
    }

    #[test]
    fn redundant_binds_are_filtered() {
        let binder = binder();
        let handle = binder.commands().gen_buffers(1)[0];
        assert!(binder.bind(BufferTarget::PixelPack, Some(handle)));
        assert!(!binder.bind(BufferTarget::PixelPack, Some(handle)));
        assert_eq!(binder.bound(BufferTarget::PixelPack), Some(handle));
        assert_eq!(binder.bound(BufferTarget::Array), None);
        assert_eq!(
            binder
                .commands()
                .with_backend(|b| b.bound(BufferTarget::PixelPack)),
            Some(handle)
        );
    }

    #[test]
    fn unbinding_twice_issues_once() {
        let binder = binder();
        let handle = binder.commands().gen_buffers(1)[0];
        binder.bind(BufferTarget::PixelPack, Some(handle));
        assert!(binder.bind(BufferTarget::PixelPack, None));
        assert!(!binder.bind(BufferTarget::PixelPack, None));
        assert_eq!(binder.bound(BufferTarget::PixelPack), None);
    }

    #[test]
    fn forget_clears_deleted_buffers() {
        let binder = binder();
        let handles = binder.commands().gen_buffers(2);
        binder.bind(BufferTarget::PixelPack, Some(handles[0]));
        binder.bind(BufferTarget::Array, Some(handles[1]));
        binder.forget(&handles[..1]);
        assert_eq!(binder.bound(BufferTarget::PixelPack), None);
        assert_eq!(binder.bound(BufferTarget::Array), Some(handles[1]));
    }
}
