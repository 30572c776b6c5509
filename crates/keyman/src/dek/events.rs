//! Per-key readiness notifications.
//!
//! Every master key id scheduled by [`KeyManager::start`](super::KeyManager::start)
//! yields exactly one [`KeyEvent`]. Events arrive in completion order, which is
//! unrelated to configuration order. There is no barrier: callers that need
//! several keys count events themselves or use [`KeyEvents::collect`].

use std::time::Duration;

use common::KeyError;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::store::DekBytes;

/// Outcome of initialising one master key id.
#[derive(Debug)]
pub enum KeyEvent {
    /// The data key is cached and ready for use.
    Ready { key_id: String, key: DekBytes },
    /// The data key could not be made available. Other ids are unaffected.
    Failed { key_id: String, error: KeyError },
}

impl KeyEvent {
    /// The master key id this event is about.
    pub fn key_id(&self) -> &str {
        match self {
            KeyEvent::Ready { key_id, .. } | KeyEvent::Failed { key_id, .. } => key_id,
        }
    }

    /// Returns `true` for [`KeyEvent::Ready`].
    pub fn is_ready(&self) -> bool {
        matches!(self, KeyEvent::Ready { .. })
    }
}

/// Receiver of the events of one initialisation run.
#[derive(Debug)]
pub struct KeyEvents {
    rx: mpsc::UnboundedReceiver<KeyEvent>,
    key_ids: Vec<String>,
}

/// Aggregated result of an initialisation run.
#[derive(Debug, Default)]
pub struct InitSummary {
    /// Ids whose data key became ready, sorted.
    pub ready: Vec<String>,
    /// Ids that failed, in completion order.
    pub failed: Vec<(String, KeyError)>,
    /// Ids still in flight when collection stopped (timeout only), sorted.
    pub pending: Vec<String>,
}

impl InitSummary {
    /// Returns `true` if every scheduled id became ready.
    pub fn all_ready(&self) -> bool {
        self.failed.is_empty() && self.pending.is_empty()
    }
}

impl KeyEvents {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<KeyEvent>, key_ids: Vec<String>) -> Self {
        Self { rx, key_ids }
    }

    /// Ids scheduled in this run.
    pub fn key_ids(&self) -> &[String] {
        &self.key_ids
    }

    /// Wait for the next event. Returns `None` once every id has reported.
    pub async fn recv(&mut self) -> Option<KeyEvent> {
        self.rx.recv().await
    }

    /// Drain every event and summarise.
    pub async fn collect(mut self) -> InitSummary {
        let mut summary = InitSummary::default();
        while let Some(event) = self.rx.recv().await {
            record(&mut summary, event);
        }
        summary.ready.sort();
        summary
    }

    /// Like [`KeyEvents::collect`], but stop waiting after `timeout`. Ids that
    /// have not reported by then are listed as pending.
    pub async fn collect_within(mut self, timeout: Duration) -> InitSummary {
        let deadline = Instant::now() + timeout;
        let mut summary = InitSummary::default();
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.rx.recv()).await {
            record(&mut summary, event);
        }
        summary.pending = self
            .key_ids
            .iter()
            .filter(|id| {
                !summary.ready.contains(id) && !summary.failed.iter().any(|(f, _)| f == *id)
            })
            .cloned()
            .collect();
        summary.pending.sort();
        summary.ready.sort();
        summary
    }
}

fn record(summary: &mut InitSummary, event: KeyEvent) {
    match event {
        KeyEvent::Ready { key_id, .. } => summary.ready.push(key_id),
        KeyEvent::Failed { key_id, error } => summary.failed.push((key_id, error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dek::store::DEK_LEN;

    fn ready(id: &str) -> KeyEvent {
        KeyEvent::Ready {
            key_id: id.into(),
            key: DekBytes::from_slice(&[7u8; DEK_LEN]).unwrap(),
        }
    }

    #[tokio::test]
    async fn collect_drains_until_all_senders_drop() {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = KeyEvents::new(rx, vec!["b".into(), "a".into(), "c".into()]);
        tx.send(ready("b")).unwrap();
        tx.send(KeyEvent::Failed {
            key_id: "c".into(),
            error: KeyError::KeyDecryption {
                key_id: "c".into(),
                detail: "denied".into(),
            },
        })
        .unwrap();
        tx.send(ready("a")).unwrap();
        drop(tx);

        let summary = events.collect().await;
        assert_eq!(summary.ready, vec!["a", "b"]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "c");
        assert!(!summary.all_ready());
    }

    #[tokio::test]
    async fn collect_within_reports_pending_ids() {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = KeyEvents::new(rx, vec!["a".into(), "hung".into()]);
        tx.send(ready("a")).unwrap();

        let summary = events.collect_within(Duration::from_millis(50)).await;
        assert_eq!(summary.ready, vec!["a"]);
        assert_eq!(summary.pending, vec!["hung"]);
        drop(tx);
    }

    #[test]
    fn event_accessors() {
        let e = ready("id-A");
        assert_eq!(e.key_id(), "id-A");
        assert!(e.is_ready());
    }
}
