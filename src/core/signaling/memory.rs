//! In-memory signaling store.
//!
//! Backs the loopback path and the test suite: both peers share one
//! `MemoryStore` and observe each other's writes through a broadcast of
//! touched session codes. Watchers re-read the record on every touch and
//! forward the watched field only when its value actually changed, so a
//! feed never emits spurious duplicates but may re-emit a whole candidate
//! list after an append (consumers apply idempotently).

use super::{
    IceCandidate, PeerRole, SdpDescription, SessionRecord, SessionStatus, SignalingStore,
    Subscription, FEED_BUFFER,
};
use crate::core::error::SignalError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

pub struct MemoryStore {
    sessions: Arc<RwLock<HashMap<String, SessionRecord>>>,
    touched: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (touched, _) = broadcast::channel(256);
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            touched,
        }
    }

    /// Mutate `code`'s record (if present) and notify watchers.
    async fn update<F>(&self, code: &str, apply: F)
    where
        F: FnOnce(&mut SessionRecord),
    {
        {
            let mut sessions = self.sessions.write().await;
            if let Some(record) = sessions.get_mut(code) {
                apply(record);
            }
        }
        let _ = self.touched.send(code.to_string());
    }

    /// Spawn a watcher that projects a field out of the session record and
    /// emits it on subscribe and on every change.
    fn watch_field<T, F>(&self, code: &str, project: F) -> Subscription<T>
    where
        T: Clone + PartialEq + Send + 'static,
        F: Fn(Option<&SessionRecord>) -> T + Send + 'static,
    {
        let sessions = self.sessions.clone();
        let mut touched = self.touched.subscribe();
        let code = code.to_string();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let task = tokio::spawn(async move {
            let mut last: Option<T> = None;
            loop {
                let current = {
                    let sessions = sessions.read().await;
                    project(sessions.get(&code))
                };
                if last.as_ref() != Some(&current) {
                    if tx.send(current.clone()).await.is_err() {
                        break;
                    }
                    last = Some(current);
                }

                match touched.recv().await {
                    Ok(c) if c == code => {}
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Subscription::new(rx, task)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn create_session(&self, code: &str, record: SessionRecord) -> Result<(), SignalError> {
        self.sessions
            .write()
            .await
            .insert(code.to_string(), record);
        let _ = self.touched.send(code.to_string());
        Ok(())
    }

    async fn read_session(&self, code: &str) -> Result<Option<SessionRecord>, SignalError> {
        Ok(self.sessions.read().await.get(code).cloned())
    }

    async fn mark_joined(&self, code: &str, joined_at: u64) -> Result<(), SignalError> {
        self.update(code, |record| {
            record.joined_at = Some(joined_at);
            record.status = SessionStatus::Connecting;
        })
        .await;
        Ok(())
    }

    async fn mark_closed(&self, code: &str, closed_at: u64) -> Result<(), SignalError> {
        self.update(code, |record| {
            record.status = SessionStatus::Closed;
            record.closed_at = Some(closed_at);
        })
        .await;
        Ok(())
    }

    async fn delete_session(&self, code: &str) -> Result<(), SignalError> {
        self.sessions.write().await.remove(code);
        let _ = self.touched.send(code.to_string());
        Ok(())
    }

    async fn publish_offer(&self, code: &str, offer: SdpDescription) -> Result<(), SignalError> {
        self.update(code, |record| record.offer = Some(offer)).await;
        Ok(())
    }

    async fn publish_answer(&self, code: &str, answer: SdpDescription) -> Result<(), SignalError> {
        self.update(code, |record| {
            record.answer = Some(answer);
            record.status = SessionStatus::Connected;
        })
        .await;
        Ok(())
    }

    async fn append_candidate(
        &self,
        code: &str,
        role: PeerRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalError> {
        self.update(code, |record| {
            let list = match role {
                PeerRole::Caller => &mut record.candidates.caller,
                PeerRole::Callee => &mut record.candidates.callee,
            };
            list.push(candidate);
        })
        .await;
        Ok(())
    }

    async fn watch_offer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError> {
        Ok(self.watch_field(code, |record| record.and_then(|r| r.offer.clone())))
    }

    async fn watch_answer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError> {
        Ok(self.watch_field(code, |record| record.and_then(|r| r.answer.clone())))
    }

    async fn watch_candidates(
        &self,
        code: &str,
        role: PeerRole,
    ) -> Result<Subscription<Vec<IceCandidate>>, SignalError> {
        Ok(self.watch_field(code, move |record| {
            record
                .map(|r| match role {
                    PeerRole::Caller => r.candidates.caller.clone(),
                    PeerRole::Callee => r.candidates.callee.clone(),
                })
                .unwrap_or_default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signaling::unix_millis;
    use std::time::Duration;

    fn cand(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 9 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[tokio::test]
    async fn watch_offer_emits_current_value_then_changes() {
        let store = MemoryStore::new();
        store
            .create_session("482193", SessionRecord::new(unix_millis()))
            .await
            .unwrap();

        let mut feed = store.watch_offer("482193").await.unwrap();
        // Initial emission: no offer yet.
        assert_eq!(feed.recv().await, Some(None));

        store
            .publish_offer("482193", SdpDescription::offer("v=0"))
            .await
            .unwrap();
        let offer = feed.recv().await.unwrap();
        assert_eq!(offer.unwrap().sdp, "v=0");
    }

    #[tokio::test]
    async fn watch_candidates_reemits_whole_list_on_append() {
        let store = MemoryStore::new();
        store
            .create_session("111111", SessionRecord::new(unix_millis()))
            .await
            .unwrap();

        let mut feed = store
            .watch_candidates("111111", PeerRole::Caller)
            .await
            .unwrap();
        assert_eq!(feed.recv().await, Some(vec![]));

        store
            .append_candidate("111111", PeerRole::Caller, cand(1))
            .await
            .unwrap();
        assert_eq!(feed.recv().await.unwrap().len(), 1);

        store
            .append_candidate("111111", PeerRole::Caller, cand(2))
            .await
            .unwrap();
        let list = feed.recv().await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0], cand(1));
    }

    #[tokio::test]
    async fn candidate_lists_are_isolated_per_role() {
        let store = MemoryStore::new();
        store
            .create_session("222222", SessionRecord::new(unix_millis()))
            .await
            .unwrap();

        store
            .append_candidate("222222", PeerRole::Callee, cand(7))
            .await
            .unwrap();

        let record = store.read_session("222222").await.unwrap().unwrap();
        assert!(record.candidates.caller.is_empty());
        assert_eq!(record.candidates.callee.len(), 1);
    }

    #[tokio::test]
    async fn publish_answer_marks_session_connected() {
        let store = MemoryStore::new();
        store
            .create_session("333333", SessionRecord::new(unix_millis()))
            .await
            .unwrap();

        store
            .publish_answer("333333", SdpDescription::answer("v=0"))
            .await
            .unwrap();

        let record = store.read_session("333333").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Connected);
        assert!(record.answer.is_some());
    }

    #[tokio::test]
    async fn cancelled_subscription_stops_emitting() {
        let store = MemoryStore::new();
        store
            .create_session("444444", SessionRecord::new(unix_millis()))
            .await
            .unwrap();

        let mut feed = store.watch_answer("444444").await.unwrap();
        assert_eq!(feed.recv().await, Some(None));
        feed.cancel();

        store
            .publish_answer("444444", SdpDescription::answer("v=0"))
            .await
            .unwrap();
        // The watcher task is aborted; the feed drains to None.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(feed.recv().await, None);
    }

    #[tokio::test]
    async fn delete_session_is_idempotent() {
        let store = MemoryStore::new();
        store.delete_session("999999").await.unwrap();
        store
            .create_session("999999", SessionRecord::new(unix_millis()))
            .await
            .unwrap();
        store.delete_session("999999").await.unwrap();
        store.delete_session("999999").await.unwrap();
        assert!(store.read_session("999999").await.unwrap().is_none());
    }
}
