//! The real-time data loop
//!
//! Owns the [`RtContext`] and executes closures against it in submission
//! order. Before `start()` (and after `stop()`) closures run inline on the
//! caller, which keeps tests deterministic. Once started, a dedicated thread
//! owns the context and callers talk to it over a bounded crossbeam channel.
//! `invoke` waits for room in the queue; `invoke_async` fails with
//! [`LoopError::QueueFull`] instead:
//!
//! ```text
//! control thread                     data loop thread
//!      │ invoke(f) ──── Message ────────────►│ f(&mut rt)
//!      │◄────────────── reply (bounded 1) ───│
//!      │ invoke_async(f) ─ Message ─────────►│ f(&mut rt)
//! ```

use std::fmt;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use tracing::{debug, error, info, warn};

use crate::rt::RtContext;

type Task = Box<dyn FnOnce(&mut RtContext) + Send>;

enum Message {
    Invoke(Task),
    Stop,
}

/// Errors from submitting work to the data loop
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoopError {
    #[error("data loop queue full")]
    QueueFull,
    #[error("data loop stopped")]
    Stopped,
    #[error("failed to spawn data loop thread: {0}")]
    ThreadSpawn(String),
    #[error("data loop thread panicked")]
    Panicked,
}

enum LoopState {
    Inline(Box<RtContext>),
    Threaded {
        tx: Sender<Message>,
        handle: JoinHandle<Box<RtContext>>,
    },
    /// The thread died and took the context with it.
    Dead,
}

pub struct DataLoop {
    state: LoopState,
    queue_size: usize,
    thread_name: String,
}

impl fmt::Debug for DataLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mode = match self.state {
            LoopState::Inline(_) => "inline",
            LoopState::Threaded { .. } => "threaded",
            LoopState::Dead => "dead",
        };
        f.debug_struct("DataLoop")
            .field("mode", &mode)
            .field("queue_size", &self.queue_size)
            .field("thread_name", &self.thread_name)
            .finish()
    }
}

impl DataLoop {
    pub fn new(queue_size: usize, thread_name: impl Into<String>) -> Self {
        Self {
            state: LoopState::Inline(Box::default()),
            queue_size: queue_size.max(1),
            thread_name: thread_name.into(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, LoopState::Threaded { .. })
    }

    /// Move the context onto a dedicated thread.
    pub fn start(&mut self) -> Result<(), LoopError> {
        let ctx = match std::mem::replace(&mut self.state, LoopState::Dead) {
            LoopState::Inline(ctx) => ctx,
            other => {
                self.state = other;
                return Ok(());
            }
        };

        let (tx, rx) = bounded::<Message>(self.queue_size);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || {
                let mut ctx = ctx;
                while let Ok(message) = rx.recv() {
                    match message {
                        Message::Invoke(task) => task(&mut *ctx),
                        Message::Stop => break,
                    }
                }
                ctx
            });

        match spawned {
            Ok(handle) => {
                info!(thread = %self.thread_name, queue = self.queue_size, "data loop started");
                self.state = LoopState::Threaded { tx, handle };
                Ok(())
            }
            Err(e) => {
                // The context went down with the closure; the loop stays dead.
                error!("data loop thread failed to spawn: {}", e);
                Err(LoopError::ThreadSpawn(e.to_string()))
            }
        }
    }

    /// Stop the thread and take the context back. Work already queued runs
    /// first.
    pub fn stop(&mut self) -> Result<(), LoopError> {
        match std::mem::replace(&mut self.state, LoopState::Dead) {
            LoopState::Threaded { tx, handle } => {
                let _ = tx.send(Message::Stop);
                match handle.join() {
                    Ok(ctx) => {
                        debug!("data loop stopped");
                        self.state = LoopState::Inline(ctx);
                        Ok(())
                    }
                    Err(_) => {
                        error!("data loop thread panicked");
                        Err(LoopError::Panicked)
                    }
                }
            }
            other => {
                self.state = other;
                Ok(())
            }
        }
    }

    /// Run `f` against the context and wait for its result. Blocks while the
    /// queue is full.
    pub fn invoke<R, F>(&mut self, f: F) -> Result<R, LoopError>
    where
        R: Send + 'static,
        F: FnOnce(&mut RtContext) -> R + Send + 'static,
    {
        match &mut self.state {
            LoopState::Inline(ctx) => Ok(f(ctx.as_mut())),
            LoopState::Threaded { tx, .. } => {
                let (reply_tx, reply_rx) = bounded(1);
                let task: Task = Box::new(move |ctx: &mut RtContext| {
                    let _ = reply_tx.send(f(ctx));
                });
                // Waits for room in the queue instead of failing like
                // `invoke_async`.
                tx.send(Message::Invoke(task))
                    .map_err(|_| LoopError::Stopped)?;
                reply_rx.recv().map_err(|_| LoopError::Stopped)
            }
            LoopState::Dead => Err(LoopError::Stopped),
        }
    }

    /// Queue `f` without waiting for it.
    pub fn invoke_async<F>(&mut self, f: F) -> Result<(), LoopError>
    where
        F: FnOnce(&mut RtContext) + Send + 'static,
    {
        match &mut self.state {
            LoopState::Inline(ctx) => {
                f(ctx.as_mut());
                Ok(())
            }
            LoopState::Threaded { tx, .. } => submit(tx, Box::new(f)),
            LoopState::Dead => Err(LoopError::Stopped),
        }
    }

    /// Sender for code outside the control thread, such as a device timer
    /// that drives cycles. `None` unless the loop is running.
    pub fn handle(&self) -> Option<LoopHandle> {
        match &self.state {
            LoopState::Threaded { tx, .. } => Some(LoopHandle { tx: tx.clone() }),
            _ => None,
        }
    }
}

impl Drop for DataLoop {
    fn drop(&mut self) {
        if self.is_running() {
            if let Err(e) = self.stop() {
                warn!("data loop shutdown: {}", e);
            }
        }
    }
}

fn submit(tx: &Sender<Message>, task: Task) -> Result<(), LoopError> {
    tx.try_send(Message::Invoke(task)).map_err(|e| match e {
        TrySendError::Full(_) => {
            warn!("data loop queue full");
            LoopError::QueueFull
        }
        TrySendError::Disconnected(_) => LoopError::Stopped,
    })
}

/// Cloneable, non-blocking submitter for a running data loop.
#[derive(Clone)]
pub struct LoopHandle {
    tx: Sender<Message>,
}

impl LoopHandle {
    pub fn invoke_async<F>(&self, f: F) -> Result<(), LoopError>
    where
        F: FnOnce(&mut RtContext) + Send + 'static,
    {
        submit(&self.tx, Box::new(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Quantum;
    use uuid::Uuid;

    #[test]
    fn test_inline_invoke_runs_on_caller() {
        let mut data_loop = DataLoop::new(4, "test-loop");
        let caller = thread::current().id();
        let ran_on = data_loop.invoke(|_rt| thread::current().id()).unwrap();
        assert_eq!(ran_on, caller);
    }

    #[test]
    fn test_threaded_invoke_runs_on_loop_thread() {
        let mut data_loop = DataLoop::new(4, "test-loop");
        data_loop.start().unwrap();
        assert!(data_loop.is_running());

        let name = data_loop
            .invoke(|_rt| thread::current().name().map(str::to_string))
            .unwrap();
        assert_eq!(name.as_deref(), Some("test-loop"));

        data_loop.stop().unwrap();
        assert!(!data_loop.is_running());
    }

    #[test]
    fn test_context_survives_restart() {
        let id = Uuid::new_v4();
        let mut data_loop = DataLoop::new(4, "test-loop");
        data_loop
            .invoke(move |rt| rt.add_node(id, Quantum::new(64, 48_000)))
            .unwrap();

        data_loop.start().unwrap();
        data_loop.invoke_async(move |rt| rt.set_driver(id, true)).unwrap();
        data_loop.invoke(move |rt| rt.process(id)).unwrap();
        data_loop.stop().unwrap();

        let q = data_loop.invoke(move |rt| rt.quantum(id)).unwrap();
        assert_eq!(q.map(|q| q.size), Some(64));
    }

    #[test]
    fn test_invocations_run_in_order() {
        let mut data_loop = DataLoop::new(16, "test-loop");
        data_loop.start().unwrap();

        let (tx, rx) = crossbeam_channel::unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            data_loop
                .invoke_async(move |_rt| {
                    let _ = tx.send(i);
                })
                .unwrap();
        }
        data_loop.invoke(|_rt| ()).unwrap();

        let order: Vec<i32> = rx.try_iter().collect();
        assert_eq!(order, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_queue_full() {
        let mut data_loop = DataLoop::new(1, "test-loop");
        data_loop.start().unwrap();

        let (block_tx, block_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        data_loop
            .invoke_async(move |_rt| {
                let _ = started_tx.send(());
                let _ = block_rx.recv();
            })
            .unwrap();
        started_rx.recv().unwrap();

        // The loop is busy; one message fits, the next does not.
        data_loop.invoke_async(|_rt| {}).unwrap();
        assert_eq!(data_loop.invoke_async(|_rt| {}), Err(LoopError::QueueFull));

        block_tx.send(()).unwrap();
        data_loop.stop().unwrap();
    }

    #[test]
    fn test_invoke_waits_for_room() {
        let mut data_loop = DataLoop::new(1, "test-loop");
        data_loop.start().unwrap();

        let (block_tx, block_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::bounded::<()>(1);
        data_loop
            .invoke_async(move |_rt| {
                let _ = started_tx.send(());
                let _ = block_rx.recv();
            })
            .unwrap();
        started_rx.recv().unwrap();
        data_loop.invoke_async(|_rt| {}).unwrap();
        assert_eq!(data_loop.invoke_async(|_rt| {}), Err(LoopError::QueueFull));

        let release = thread::spawn(move || {
            thread::sleep(std::time::Duration::from_millis(50));
            block_tx.send(()).unwrap();
        });
        assert_eq!(data_loop.invoke(|_rt| 7), Ok(7));

        release.join().unwrap();
        data_loop.stop().unwrap();
    }
}
