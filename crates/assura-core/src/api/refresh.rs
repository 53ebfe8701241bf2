//! Single-flight coordination of token refreshes.
//!
//! The first request to see a 401 becomes the leader and performs the refresh.
//! Requests that see a 401 while it runs are queued and get the leader's
//! outcome when it finishes. The in-flight check and the queue share one
//! mutex, and nothing awaits while it is held.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::oneshot;

use super::RefreshError;
use crate::models::TokenPair;

pub(crate) type RefreshOutcome = Result<TokenPair, RefreshError>;

type Waiters = Option<Vec<oneshot::Sender<RefreshOutcome>>>;

pub(crate) enum Ticket<'a> {
    /// The session token already differs from the rejected one
    Current(String),
    /// Another request is refreshing; wait for its outcome
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// This request performs the refresh
    Lead(RefreshLease<'a>),
}

/// `None` while idle, `Some(waiters)` while a refresh is in flight.
#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    waiters: Mutex<Waiters>,
}

impl RefreshCoordinator {
    fn lock(&self) -> MutexGuard<'_, Waiters> {
        self.waiters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Decide how a request rejected while carrying `sent_with` recovers.
    ///
    /// `current` reads the session token. It is called under the lock, after
    /// any finished leader has already stored its new token.
    pub(crate) fn begin(
        &self,
        sent_with: Option<&str>,
        current: impl FnOnce() -> Option<String>,
    ) -> Ticket<'_> {
        let mut waiters = self.lock();

        if let Some(queue) = waiters.as_mut() {
            let (tx, rx) = oneshot::channel();
            queue.push(tx);
            return Ticket::Wait(rx);
        }

        if let Some(token) = current() {
            if sent_with != Some(token.as_str()) {
                return Ticket::Current(token);
            }
        }

        *waiters = Some(Vec::new());
        Ticket::Lead(RefreshLease {
            coordinator: self,
            finished: false,
        })
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.lock().is_some()
    }

    fn finish(&self, outcome: RefreshOutcome) -> usize {
        let waiters = self.lock().take().unwrap_or_default();
        let released = waiters.len();
        // Arrival order
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
        released
    }
}

/// Held by the leader. Dropping it unfinished releases the queue with
/// `RefreshError::Abandoned`.
pub(crate) struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    finished: bool,
}

impl RefreshLease<'_> {
    /// Publish the outcome to every queued request; returns how many there were.
    pub(crate) fn complete(mut self, outcome: RefreshOutcome) -> usize {
        self.finished = true;
        self.coordinator.finish(outcome)
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.coordinator.finish(Err(RefreshError::Abandoned));
        }
    }
}
