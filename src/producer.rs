//! NATS publisher for prediction session updates

use crate::orchestrator::PredictionOrchestrator;
use crate::types::session::PredictionSession;
use anyhow::Result;
use async_nats::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Serializes publishing per user and remembers the highest request
/// sequence already sent, so an update from an older request can never
/// follow one from a newer request.
#[derive(Default)]
pub struct PublishGate {
    lanes: Mutex<HashMap<String, Arc<tokio::sync::Mutex<u64>>>>,
}

impl PublishGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `publish` for `session` unless it is older than what the user
    /// has already been sent or `is_current` rejects it. The check and the
    /// publish happen under the user's lane lock. Returns whether the
    /// update went out.
    pub async fn send<F, Fut, E>(
        &self,
        session: &PredictionSession,
        is_current: impl FnOnce(&PredictionSession) -> bool,
        publish: F,
    ) -> Result<bool, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let lane = self.lane(&session.user_id);
        let mut highest = lane.lock().await;

        if session.sequence < *highest || !is_current(session) {
            debug!(
                user_id = %session.user_id,
                sequence = session.sequence,
                newest_sent = *highest,
                status = session.status.as_str(),
                "Dropping stale session update"
            );
            return Ok(false);
        }

        publish().await?;
        *highest = session.sequence;
        Ok(true)
    }

    fn lane(&self, user_id: &str) -> Arc<tokio::sync::Mutex<u64>> {
        let mut lanes = self
            .lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lanes.entry(user_id.to_string()).or_default().clone()
    }
}

/// Publishes each session snapshot to `<prefix>.<user_id>`
#[derive(Clone)]
pub struct SessionPublisher {
    client: Client,
    prefix: String,
    gate: Arc<PublishGate>,
}

impl SessionPublisher {
    pub fn new(client: Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
            gate: Arc::new(PublishGate::new()),
        }
    }

    /// Publish one session snapshot if it still belongs to the user's
    /// latest request. Returns whether it was published.
    pub async fn publish(
        &self,
        session: &PredictionSession,
        orchestrator: &PredictionOrchestrator,
    ) -> Result<bool> {
        let payload = serde_json::to_vec(session)?;
        let subject = self.subject_for(&session.user_id);

        let sent = self
            .gate
            .send(
                session,
                |s| orchestrator.is_current(s),
                || async {
                    self.client
                        .publish(subject.clone(), payload.into())
                        .await
                        .map_err(anyhow::Error::from)
                },
            )
            .await?;

        if sent {
            debug!(
                subject = %subject,
                session_id = %session.session_id,
                sequence = session.sequence,
                status = session.status.as_str(),
                "Published session update"
            );
        }

        Ok(sent)
    }

    /// Subject carrying updates for `user_id`
    pub fn subject_for(&self, user_id: &str) -> String {
        session_subject(&self.prefix, user_id)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// `<prefix>.<user_id>`, with characters NATS treats as token separators
/// or wildcards replaced by `_`.
pub fn session_subject(prefix: &str, user_id: &str) -> String {
    let token: String = user_id
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect();
    format!("{prefix}.{token}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::session::SessionStatus;
    use std::time::Duration;

    fn session(user: &str, sequence: u64, status: SessionStatus) -> PredictionSession {
        let mut session = PredictionSession::new(user, sequence);
        session.transition(status);
        session
    }

    async fn send_recorded(
        gate: &PublishGate,
        sent: &Mutex<Vec<(u64, SessionStatus)>>,
        session: &PredictionSession,
        current: bool,
    ) -> bool {
        gate.send(
            session,
            |_| current,
            || async {
                sent.lock().unwrap().push((session.sequence, session.status));
                Ok::<(), std::convert::Infallible>(())
            },
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_session_subject() {
        assert_eq!(session_subject("food.sessions", "user_1"), "food.sessions.user_1");
        assert_eq!(
            session_subject("food.sessions", "jane.doe *>"),
            "food.sessions.jane_doe___"
        );
    }

    #[tokio::test]
    async fn test_older_request_never_follows_newer() {
        let gate = PublishGate::new();
        let sent = Mutex::new(Vec::new());

        let newer = session("user_1", 2, SessionStatus::Preprocessing);
        let older = session("user_1", 1, SessionStatus::Succeeded);

        assert!(send_recorded(&gate, &sent, &newer, true).await);
        assert!(!send_recorded(&gate, &sent, &older, true).await);

        assert_eq!(*sent.lock().unwrap(), vec![(2, SessionStatus::Preprocessing)]);
    }

    #[tokio::test]
    async fn test_superseded_session_not_published() {
        let gate = PublishGate::new();
        let sent = Mutex::new(Vec::new());

        let finished = session("user_1", 1, SessionStatus::Succeeded);
        assert!(!send_recorded(&gate, &sent, &finished, false).await);
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_lanes_are_per_user() {
        let gate = PublishGate::new();
        let sent = Mutex::new(Vec::new());

        assert!(send_recorded(&gate, &sent, &session("alice", 5, SessionStatus::Inferring), true).await);
        assert!(send_recorded(&gate, &sent, &session("bob", 3, SessionStatus::Inferring), true).await);
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_publish_does_not_advance() {
        let gate = PublishGate::new();
        let newer = session("user_1", 2, SessionStatus::Preprocessing);

        let result: Result<bool, &str> = gate
            .send(&newer, |_| true, || async { Err("connection reset") })
            .await;
        assert_eq!(result, Err("connection reset"));

        let sent = Mutex::new(Vec::new());
        let older = session("user_1", 1, SessionStatus::Succeeded);
        assert!(send_recorded(&gate, &sent, &older, true).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_check_and_publish_are_atomic_per_user() {
        let gate = Arc::new(PublishGate::new());
        let sent = Arc::new(Mutex::new(Vec::new()));

        // A slow publish of the newer request holds the lane; the older
        // update queued behind it must be dropped once the lane frees up.
        let slow = {
            let gate = gate.clone();
            let sent = sent.clone();
            tokio::spawn(async move {
                let newer = session("user_1", 2, SessionStatus::Preprocessing);
                gate.send(
                    &newer,
                    |_| true,
                    || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        sent.lock().unwrap().push(newer.sequence);
                        Ok::<(), std::convert::Infallible>(())
                    },
                )
                .await
                .unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let older = session("user_1", 1, SessionStatus::Succeeded);
        let sent_older = gate
            .send(
                &older,
                |_| true,
                || async {
                    sent.lock().unwrap().push(older.sequence);
                    Ok::<(), std::convert::Infallible>(())
                },
            )
            .await
            .unwrap();

        assert!(slow.await.unwrap());
        assert!(!sent_older);
        assert_eq!(*sent.lock().unwrap(), vec![2]);
    }

    // Publishing over NATS would require a running server
}
