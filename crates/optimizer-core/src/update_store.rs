//! Broadcast + history store for session updates.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{AgentEvent, SessionUpdate, machine::Phase};

/// Default history size limit (1 MiB).
const HISTORY_BYTES: usize = 1024 * 1024;

/// Live channel capacity.
const LIVE_CAPACITY: usize = 1024;

#[derive(Clone)]
struct StoredUpdate {
    update: SessionUpdate,
    bytes: usize,
}

struct Inner {
    history: VecDeque<StoredUpdate>,
    total_bytes: usize,
}

/// Ordered update log with live broadcast.
///
/// Subscribers that attach late get the history first and then switch
/// to live updates, so nobody misses the start of a session.
pub struct UpdateStore {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<SessionUpdate>,
}

impl Default for UpdateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(LIVE_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(32),
                total_bytes: 0,
            }),
            sender,
        }
    }

    /// Record an update and send it to live listeners.
    pub fn push(&self, update: SessionUpdate) {
        let bytes = update.approx_bytes();

        // History is written before the broadcast so a subscriber that reads
        // history after this point cannot miss the update.
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        while inner.total_bytes.saturating_add(bytes) > HISTORY_BYTES {
            if let Some(front) = inner.history.pop_front() {
                inner.total_bytes = inner.total_bytes.saturating_sub(front.bytes);
            } else {
                break;
            }
        }
        inner.history.push_back(StoredUpdate {
            update: update.clone(),
            bytes,
        });
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
        let _ = self.sender.send(update);
    }

    pub fn push_event(&self, event: AgentEvent) {
        self.push(SessionUpdate::Event { event });
    }

    pub fn push_phase(&self, from: Phase, to: Phase) {
        self.push(SessionUpdate::Phase { from, to });
    }

    pub fn push_finished(&self) {
        self.push(SessionUpdate::Finished);
    }

    /// Whether [`SessionUpdate::Finished`] has been recorded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .back()
            .is_some_and(|s| s.update == SessionUpdate::Finished)
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<SessionUpdate> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<SessionUpdate> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .map(|s| s.update.clone())
            .collect()
    }

    /// Stream that yields history first, then live updates, ending after
    /// [`SessionUpdate::Finished`].
    #[must_use]
    pub fn history_plus_stream(&self) -> BoxStream<'static, SessionUpdate> {
        // Subscribe while holding the history lock so no update falls
        // between the two.
        let (history, rx) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            let history: Vec<_> = inner.history.iter().map(|s| s.update.clone()).collect();
            (history, self.sender.subscribe())
        };

        let finished = history.contains(&SessionUpdate::Finished);
        let hist = futures::stream::iter(history);
        if finished {
            return hist.boxed();
        }

        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(update) => Some(update),
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!("Update subscriber lagged, skipped {n} updates");
                    None
                }
            }
        });

        let combined = hist.chain(live).boxed();
        futures::stream::unfold((combined, false), |(mut updates, done)| async move {
            if done {
                return None;
            }
            let update = updates.next().await?;
            let done = update == SessionUpdate::Finished;
            Some((update, (updates, done)))
        })
        .boxed()
    }

    /// Stream of agent events only (until finished).
    #[must_use]
    pub fn event_stream(&self) -> BoxStream<'static, AgentEvent> {
        self.history_plus_stream()
            .filter_map(|update| async move {
                match update {
                    SessionUpdate::Event { event } => Some(event),
                    _ => None,
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::machine::fixtures::{progress, tool};

    #[tokio::test]
    async fn test_history_then_live() {
        let store = UpdateStore::new();
        store.push_phase(Phase::Idle, Phase::Running);
        store.push_event(progress(1));

        let mut stream = store.history_plus_stream();
        assert_eq!(
            stream.next().await,
            Some(SessionUpdate::Phase {
                from: Phase::Idle,
                to: Phase::Running
            })
        );
        assert_eq!(
            stream.next().await,
            Some(SessionUpdate::Event { event: progress(1) })
        );

        store.push_event(tool("score"));
        store.push_finished();
        assert_eq!(
            stream.next().await,
            Some(SessionUpdate::Event { event: tool("score") })
        );
        assert_eq!(stream.next().await, Some(SessionUpdate::Finished));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_late_subscriber_after_finish() {
        let store = UpdateStore::new();
        store.push_event(progress(1));
        store.push_event(tool("score"));
        store.push_finished();
        assert!(store.is_finished());

        let events: Vec<_> = store.event_stream().collect().await;
        assert_eq!(events, vec![progress(1), tool("score")]);
    }

    #[test]
    fn test_history_is_capped() {
        let store = UpdateStore::new();
        let reason = "x".repeat(64 * 1024);
        for _ in 0..32 {
            store.push(SessionUpdate::Rejected {
                reason: reason.clone(),
            });
        }
        let total: usize = store.get_history().iter().map(SessionUpdate::approx_bytes).sum();
        assert!(total <= HISTORY_BYTES);
        assert!(store.get_history().len() < 32);
    }
}
