//! Per-language state cell and exclusive instance slot

use crate::error::SandboxError;
use chrono::Utc;
use polyrun_common::{Language, RuntimeState, RuntimeStatus};
use std::ops::{Deref, DerefMut};
use tokio::sync::{watch, Mutex, MutexGuard};

/// Observable state plus the live instance of one sandbox.
///
/// Status changes go through a `watch` channel, so every observer sees each
/// transition as a whole. Exclusive operations claim the slot by moving it
/// from `ready` to `executing` in a single state update: a second concurrent
/// operation fails instead of queueing. Reads only take the instance mutex,
/// and a claimed operation waits for a read in progress to finish.
pub(crate) struct RuntimeSlot<S: ?Sized> {
    language: Language,
    state: watch::Sender<RuntimeState>,
    instance: Mutex<Option<Box<S>>>,
}

impl<S: ?Sized> RuntimeSlot<S> {
    pub fn new(language: Language) -> Self {
        let (state, _) = watch::channel(RuntimeState::new());
        Self {
            language,
            state,
            instance: Mutex::new(None),
        }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn state(&self) -> RuntimeState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> RuntimeStatus {
        self.state.borrow().status
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.state.subscribe()
    }

    pub fn transition(&self, status: RuntimeStatus) {
        self.state.send_modify(|state| {
            state.status = status;
            state.changed_at = Utc::now();
        });
        tracing::debug!(language = %self.language, %status, "Runtime status changed");
    }

    /// Enter `loading`, clearing the previous failure
    pub fn begin_load(&self) {
        self.state.send_modify(|state| {
            state.status = RuntimeStatus::Loading;
            state.last_error = None;
            state.changed_at = Utc::now();
        });
        tracing::debug!(language = %self.language, "Runtime status changed to loading");
    }

    pub fn fail(&self, message: String) {
        self.state.send_modify(|state| {
            state.status = RuntimeStatus::Error;
            state.last_error = Some(message);
            state.changed_at = Utc::now();
        });
    }

    pub async fn install(&self, sandbox: Box<S>) {
        *self.instance.lock().await = Some(sandbox);
        self.transition(RuntimeStatus::Ready);
    }

    pub async fn clear(&self) {
        self.instance.lock().await.take();
    }

    /// Take the instance for an operation that changes it. Status is
    /// `executing` until the lease is dropped, then back to `ready`.
    pub async fn lease(&self) -> Result<Lease<'_, S>, SandboxError> {
        self.claim()?;
        // From here on, dropping the lease hands the slot back as `ready`
        let mut lease = Lease {
            slot: self,
            guard: None,
        };

        let guard = self.instance.lock().await;
        if guard.is_none() {
            return Err(SandboxError::MissingInstance(self.language));
        }
        lease.guard = Some(guard);
        Ok(lease)
    }

    /// Take the instance for a read without changing status
    pub fn peek(&self) -> Result<ReadGuard<'_, S>, SandboxError> {
        self.check_ready()?;

        let guard = self
            .instance
            .try_lock()
            .map_err(|_| SandboxError::Busy(self.language))?;
        if guard.is_none() {
            return Err(SandboxError::MissingInstance(self.language));
        }
        Ok(ReadGuard { guard })
    }

    fn check_ready(&self) -> Result<(), SandboxError> {
        match self.status() {
            RuntimeStatus::Ready => Ok(()),
            RuntimeStatus::Executing => Err(SandboxError::Busy(self.language)),
            _ => Err(SandboxError::NotReady(self.language)),
        }
    }

    /// Move `ready` to `executing` in one state update
    fn claim(&self) -> Result<(), SandboxError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| match state.status {
            RuntimeStatus::Ready => {
                state.status = RuntimeStatus::Executing;
                state.changed_at = Utc::now();
                true
            }
            RuntimeStatus::Executing => {
                outcome = Err(SandboxError::Busy(self.language));
                false
            }
            _ => {
                outcome = Err(SandboxError::NotReady(self.language));
                false
            }
        });
        if outcome.is_ok() {
            tracing::debug!(language = %self.language, "Runtime status changed to executing");
        }
        outcome
    }
}

/// Exclusive access to a sandbox for one operation
pub(crate) struct Lease<'a, S: ?Sized> {
    slot: &'a RuntimeSlot<S>,
    /// Holds an installed instance once the lease is handed out
    guard: Option<MutexGuard<'a, Option<Box<S>>>>,
}

impl<S: ?Sized> Deref for Lease<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.guard
            .as_deref()
            .and_then(Option::as_deref)
            .expect("lease holds an installed instance")
    }
}

impl<S: ?Sized> DerefMut for Lease<'_, S> {
    fn deref_mut(&mut self) -> &mut S {
        self.guard
            .as_deref_mut()
            .and_then(Option::as_deref_mut)
            .expect("lease holds an installed instance")
    }
}

impl<S: ?Sized> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        // Release the instance before observers can see `ready`
        self.guard.take();
        self.slot.transition(RuntimeStatus::Ready);
    }
}

/// Shared access to a sandbox for a read
pub(crate) struct ReadGuard<'a, S: ?Sized> {
    guard: MutexGuard<'a, Option<Box<S>>>,
}

impl<S: ?Sized> Deref for ReadGuard<'_, S> {
    type Target = S;

    fn deref(&self) -> &S {
        self.guard
            .as_deref()
            .expect("read guard holds an installed instance")
    }
}
