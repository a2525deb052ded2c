// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Deferred command execution on a dedicated worker thread.

Many GPU APIs want to be called from one particular thread.  [`Deferred`] moves the
backend onto a worker it owns and turns every [`GpuCommands`] call into a message.
The worker executes messages strictly in the order they were sent.

Most commands are fire-and-forget.  Commands that produce a value carry a reply
channel and the caller blocks until the worker answers.  Fence creation does not
block: fence ids are minted on the caller side and the worker only learns about
them when it reaches the `FenceSync` message.
*/

use super::{
    Backend, BufferHandle, BufferTarget, Fence, FenceId, FenceIds, GpuCommands, MappedRange,
    ReadRect, StorageFlags, WaitStatus,
};
use crate::pixel_formats::ColorFormat;
use logwise::context::Context;
use std::fmt::{Debug, Formatter};
use std::sync::mpsc::{Receiver, Sender, SyncSender, sync_channel};
use std::thread::JoinHandle;
use std::time::Duration;

enum Command {
    GenBuffers {
        count: usize,
        reply: SyncSender<Vec<BufferHandle>>,
    },
    DeleteBuffers(Vec<BufferHandle>),
    BindBuffer {
        target: BufferTarget,
        buffer: Option<BufferHandle>,
    },
    BufferStorage {
        target: BufferTarget,
        size: usize,
        flags: StorageFlags,
        reply: SyncSender<bool>,
    },
    MapBufferRange {
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
        reply: SyncSender<Option<MappedRange>>,
    },
    ReadPixels {
        rect: ReadRect,
        format: ColorFormat,
    },
    FenceSync(FenceId),
    ClientWaitSync {
        fence: FenceId,
        timeout: Duration,
        reply: SyncSender<WaitStatus>,
    },
    DeleteSync(FenceId),
    Finish {
        reply: SyncSender<()>,
    },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Command::GenBuffers { .. } => "gen_buffers",
            Command::DeleteBuffers(_) => "delete_buffers",
            Command::BindBuffer { .. } => "bind_buffer",
            Command::BufferStorage { .. } => "buffer_storage",
            Command::MapBufferRange { .. } => "map_buffer_range",
            Command::ReadPixels { .. } => "read_pixels",
            Command::FenceSync(_) => "fence_sync",
            Command::ClientWaitSync { .. } => "client_wait_sync",
            Command::DeleteSync(_) => "delete_sync",
            Command::Finish { .. } => "finish",
        }
    }

    fn execute<B: Backend>(self, backend: &mut B) {
        //a caller that gave up on its reply is not our problem
        match self {
            Command::GenBuffers { count, reply } => {
                let _ = reply.send(backend.gen_buffers(count));
            }
            Command::DeleteBuffers(buffers) => backend.delete_buffers(&buffers),
            Command::BindBuffer { target, buffer } => backend.bind_buffer(target, buffer),
            Command::BufferStorage {
                target,
                size,
                flags,
                reply,
            } => {
                let _ = reply.send(backend.buffer_storage(target, size, flags));
            }
            Command::MapBufferRange {
                target,
                offset,
                length,
                flags,
                reply,
            } => {
                let _ = reply.send(backend.map_buffer_range(target, offset, length, flags));
            }
            Command::ReadPixels { rect, format } => backend.read_pixels(rect, format),
            Command::FenceSync(fence) => backend.fence_sync(fence),
            Command::ClientWaitSync {
                fence,
                timeout,
                reply,
            } => {
                let _ = reply.send(backend.client_wait_sync(fence, timeout));
            }
            Command::DeleteSync(fence) => backend.delete_sync(fence),
            Command::Finish { reply } => {
                backend.finish();
                let _ = reply.send(());
            }
        }
    }
}

fn run_worker<B: Backend>(mut backend: B, commands: Receiver<Command>, label: String) {
    logwise::info_sync!("command worker {label} started", label = label.clone());
    while let Ok(command) = commands.recv() {
        command.execute(&mut backend);
    }
    //all senders dropped; the backend (and every device object it owns) drops here
    logwise::info_sync!("command worker {label} stopped", label = label);
}

/**
Issues commands to a backend that lives on its own worker thread.

Dropping the `Deferred` closes the queue, lets the worker drain what was already
sent, and joins it.

# Failure

If the worker has died, commands degrade to failure values: no buffer names,
failed storage, no mapping, [`WaitStatus::Failed`].  Nothing panics on the
issuing side.
*/
pub struct Deferred {
    sender: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
    fences: FenceIds,
    label: String,
}

impl Deferred {
    /// Moves `backend` onto a new worker thread named `label`.
    pub fn spawn<B: Backend>(backend: B, label: &str) -> Result<Self, crate::Error> {
        let (sender, receiver) = std::sync::mpsc::channel();
        let label = label.to_string();
        let move_label = label.clone();
        let parent = Context::current();
        let worker = std::thread::Builder::new()
            .name(label.clone())
            .spawn(move || {
                let c = Context::new_task(Some(parent), "deferred_gpu_worker".to_string());
                let id = c.context_id();
                c.set_current();
                run_worker(backend, receiver, move_label);
                Context::pop(id);
            })?;
        Ok(Deferred {
            sender: Some(sender),
            worker: Some(worker),
            fences: FenceIds::new(),
            label,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn send(&self, command: Command) -> bool {
        let name = command.name();
        let sent = self
            .sender
            .as_ref()
            .map(|s| s.send(command).is_ok())
            .unwrap_or(false);
        if !sent {
            logwise::error_sync!(
                "command worker {label} is gone; dropped {command}",
                label = self.label.clone(),
                command = name
            );
        }
        sent
    }

    /// Sends a command carrying a reply channel and blocks for the answer.
    fn request<T>(&self, build: impl FnOnce(SyncSender<T>) -> Command) -> Option<T> {
        let (reply, answer) = sync_channel(1);
        if !self.send(build(reply)) {
            return None;
        }
        match answer.recv() {
            Ok(value) => Some(value),
            Err(_) => {
                logwise::error_sync!(
                    "command worker {label} exited before replying",
                    label = self.label.clone()
                );
                None
            }
        }
    }
}

impl Debug for Deferred {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deferred")
            .field("label", &self.label)
            .field("running", &self.worker.as_ref().map(|w| !w.is_finished()))
            .finish()
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                logwise::error_sync!(
                    "command worker {label} panicked",
                    label = self.label.clone()
                );
            }
        }
    }
}

impl GpuCommands for Deferred {
    fn gen_buffers(&self, count: usize) -> Vec<BufferHandle> {
        self.request(|reply| Command::GenBuffers { count, reply })
            .unwrap_or_default()
    }

    fn delete_buffers(&self, buffers: Vec<BufferHandle>) {
        self.send(Command::DeleteBuffers(buffers));
    }

    fn bind_buffer(&self, target: BufferTarget, buffer: Option<BufferHandle>) {
        self.send(Command::BindBuffer { target, buffer });
    }

    fn buffer_storage(&self, target: BufferTarget, size: usize, flags: StorageFlags) -> bool {
        self.request(|reply| Command::BufferStorage {
            target,
            size,
            flags,
            reply,
        })
        .unwrap_or(false)
    }

    fn map_buffer_range(
        &self,
        target: BufferTarget,
        offset: usize,
        length: usize,
        flags: StorageFlags,
    ) -> Option<MappedRange> {
        self.request(|reply| Command::MapBufferRange {
            target,
            offset,
            length,
            flags,
            reply,
        })
        .flatten()
    }

    fn read_pixels(&self, rect: ReadRect, format: ColorFormat) {
        self.send(Command::ReadPixels { rect, format });
    }

    fn fence_sync(&self) -> Fence {
        let fence = self.fences.mint();
        self.send(Command::FenceSync(fence.id()));
        fence
    }

    fn client_wait_sync(&self, fence: &Fence, timeout: Duration) -> WaitStatus {
        let fence = fence.id();
        self.request(|reply| Command::ClientWaitSync {
            fence,
            timeout,
            reply,
        })
        .unwrap_or(WaitStatus::Failed)
    }

    fn delete_sync(&self, fence: Fence) {
        self.send(Command::DeleteSync(fence.id()));
    }

    fn finish(&self) {
        let _finish = logwise::perfwarn_begin!("Deferred::finish");
        self.request(|reply| Command::Finish { reply });
    }
}
