// SPDX-FileCopyrightText: 2025 Contributors to the pinflow project.
// SPDX-License-Identifier: Apache-2.0

//! Supervised worker threads with a bounded join.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, error};

use crate::{Error, Result, lockcheck};

/// Signals thread exit when dropped, including on panic.
struct ExitSignal(Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

/// A named thread spawned by a filter.
///
/// Cancellation is cooperative: the owner sets a flag the thread checks and
/// wakes it, then calls [`SupervisedTask::join`], which waits at most the
/// given timeout. An expired join is reported as [`Error::Timeout`] and
/// never retried.
pub(crate) struct SupervisedTask {
    name: String,
    handle: JoinHandle<()>,
    exited: Receiver<()>,
}

impl SupervisedTask {
    pub(crate) fn spawn<F>(name: String, body: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let (tx, exited) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let _signal = ExitSignal(tx);
                body();
            })
            .map_err(|err| Error::Other(format!("Failed to spawn thread {name}: {err}")))?;
        debug!("Spawned thread {}", name);
        Ok(Self {
            name,
            handle,
            exited,
        })
    }

    /// Waits up to `timeout` for the thread to exit.
    ///
    /// # Errors
    ///
    /// - [`Error::Timeout`] if the thread is still running at the deadline;
    ///   the thread is detached.
    /// - [`Error::WrongState`] if called from the thread itself.
    /// - [`Error::Other`] if the thread panicked.
    pub(crate) fn join(self, timeout: Duration) -> Result<()> {
        lockcheck::assert_not_held("SupervisedTask::join");
        if self.handle.thread().id() == thread::current().id() {
            return Err(Error::WrongState("thread cannot join itself"));
        }
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                self.handle
                    .join()
                    .map_err(|_| Error::Other(format!("Thread {} panicked", self.name)))?;
                debug!("Joined thread {}", self.name);
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => {
                error!("Thread {} did not exit within {:?}", self.name, timeout);
                Err(Error::Timeout(format!("thread {}", self.name)))
            }
        }
    }

    /// Whether the thread exits within `timeout`. Unlike [`join`], the task
    /// stays owned by the caller either way.
    ///
    /// [`join`]: SupervisedTask::join
    pub(crate) fn wait_exit(&self, timeout: Duration) -> bool {
        !matches!(
            self.exited.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
