//! HTTP signaling store: a REST key-value service with a polling change feed.
//!
//! Speaks a Firebase-RTDB-style JSON API:
//!
//!   GET/PUT/PATCH/DELETE {base}/sessions/{code}.json          whole record
//!   GET/PUT              {base}/sessions/{code}/candidates/{role}.json
//!   GET                  {base}/sessions/{code}/{field}.json  single field
//!
//! `GET` of an absent path returns JSON `null`. Change feeds poll at
//! [`SIGNAL_POLL_INTERVAL`] and emit on value change; the notification
//! transport is an implementation detail behind [`Subscription`], exactly
//! like the in-memory store's broadcast.
//!
//! Candidate append is a read-modify-write of the role's whole list. That
//! is race-free here because each peer only ever appends to its own list.

use super::{
    IceCandidate, PeerRole, SdpDescription, SessionRecord, SessionStatus, SignalingStore,
    Subscription, FEED_BUFFER,
};
use crate::core::config::SIGNAL_POLL_INTERVAL;
use crate::core::error::SignalError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

pub struct HttpStore {
    client: reqwest::Client,
    base: String,
}

impl HttpStore {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base,
        }
    }

    fn session_url(&self, code: &str) -> String {
        format!("{}/sessions/{}.json", self.base, code)
    }

    fn field_url(&self, code: &str, field: &str) -> String {
        format!("{}/sessions/{}/{}.json", self.base, code, field)
    }

    fn candidates_url(&self, code: &str, role: PeerRole) -> String {
        format!("{}/sessions/{}/candidates/{}.json", self.base, code, role.key())
    }

    /// GET a path; absent paths (JSON `null` body, or a 404 from stores
    /// that prefer it) deserialize as the type's null form.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, SignalError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(SignalError::store)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return serde_json::from_value(serde_json::Value::Null).map_err(SignalError::store);
        }
        resp.error_for_status()
            .map_err(SignalError::store)?
            .json()
            .await
            .map_err(SignalError::store)
    }

    async fn put_json<T: Serialize>(&self, url: &str, body: &T) -> Result<(), SignalError> {
        self.client
            .put(url)
            .json(body)
            .send()
            .await
            .map_err(SignalError::store)?
            .error_for_status()
            .map_err(SignalError::store)?;
        Ok(())
    }

    /// PATCH merges the given fields into the record.
    async fn patch_json<T: Serialize>(&self, url: &str, body: &T) -> Result<(), SignalError> {
        self.client
            .patch(url)
            .json(body)
            .send()
            .await
            .map_err(SignalError::store)?
            .error_for_status()
            .map_err(SignalError::store)?;
        Ok(())
    }

    /// Spawn a poller that GETs `url` on an interval and forwards changes.
    ///
    /// Transient fetch errors are logged and retried on the next tick;
    /// a change feed must outlive store hiccups, not abort negotiation.
    fn watch_url<T>(&self, url: String) -> Subscription<T>
    where
        T: DeserializeOwned + Clone + PartialEq + Send + 'static,
    {
        let client = self.client.clone();
        let (tx, rx) = mpsc::channel(FEED_BUFFER);

        let task = tokio::spawn(async move {
            let mut last: Option<T> = None;
            let mut ticker = tokio::time::interval(SIGNAL_POLL_INTERVAL);
            loop {
                ticker.tick().await;

                let fetched: Result<T, anyhow::Error> = async {
                    let resp = client.get(url.as_str()).send().await?;
                    if resp.status() == reqwest::StatusCode::NOT_FOUND {
                        return Ok(serde_json::from_value(serde_json::Value::Null)?);
                    }
                    Ok(resp.error_for_status()?.json::<T>().await?)
                }
                .await;

                match fetched {
                    Ok(current) => {
                        if last.as_ref() != Some(&current) {
                            if tx.send(current.clone()).await.is_err() {
                                break;
                            }
                            last = Some(current);
                        }
                    }
                    Err(e) => {
                        warn!(event = "signal_poll_failed", url = %url, %e, "Change feed poll failed, retrying");
                    }
                }
            }
        });

        Subscription::new(rx, task)
    }
}

#[async_trait]
impl SignalingStore for HttpStore {
    async fn create_session(&self, code: &str, record: SessionRecord) -> Result<(), SignalError> {
        self.put_json(&self.session_url(code), &record).await
    }

    async fn read_session(&self, code: &str) -> Result<Option<SessionRecord>, SignalError> {
        self.get_json(&self.session_url(code)).await
    }

    async fn mark_joined(&self, code: &str, joined_at: u64) -> Result<(), SignalError> {
        self.patch_json(
            &self.session_url(code),
            &json!({ "status": SessionStatus::Connecting, "joinedAt": joined_at }),
        )
        .await
    }

    async fn mark_closed(&self, code: &str, closed_at: u64) -> Result<(), SignalError> {
        self.patch_json(
            &self.session_url(code),
            &json!({ "status": SessionStatus::Closed, "closedAt": closed_at }),
        )
        .await
    }

    async fn delete_session(&self, code: &str) -> Result<(), SignalError> {
        let resp = self
            .client
            .delete(self.session_url(code))
            .send()
            .await
            .map_err(SignalError::store)?;
        // Deleting an absent record is a normal no-op.
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        resp.error_for_status().map_err(SignalError::store)?;
        Ok(())
    }

    async fn publish_offer(&self, code: &str, offer: SdpDescription) -> Result<(), SignalError> {
        self.patch_json(&self.session_url(code), &json!({ "offer": offer }))
            .await
    }

    async fn publish_answer(&self, code: &str, answer: SdpDescription) -> Result<(), SignalError> {
        self.patch_json(
            &self.session_url(code),
            &json!({ "answer": answer, "status": SessionStatus::Connected }),
        )
        .await
    }

    async fn append_candidate(
        &self,
        code: &str,
        role: PeerRole,
        candidate: IceCandidate,
    ) -> Result<(), SignalError> {
        let url = self.candidates_url(code, role);
        let mut list: Vec<IceCandidate> = self
            .get_json::<Option<Vec<IceCandidate>>>(&url)
            .await?
            .unwrap_or_default();
        list.push(candidate);
        self.put_json(&url, &list).await
    }

    async fn watch_offer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError> {
        Ok(self.watch_url(self.field_url(code, "offer")))
    }

    async fn watch_answer(
        &self,
        code: &str,
    ) -> Result<Subscription<Option<SdpDescription>>, SignalError> {
        Ok(self.watch_url(self.field_url(code, "answer")))
    }

    async fn watch_candidates(
        &self,
        code: &str,
        role: PeerRole,
    ) -> Result<Subscription<Vec<IceCandidate>>, SignalError> {
        // Absent list polls as `null`; map to empty so consumers see a list.
        let url = self.candidates_url(code, role);
        let inner = self.watch_url::<Option<Vec<IceCandidate>>>(url);
        Ok(flatten_candidates(inner))
    }
}

/// Adapt a feed of `Option<Vec<_>>` (absent list = null) into `Vec<_>`.
fn flatten_candidates(
    mut inner: Subscription<Option<Vec<IceCandidate>>>,
) -> Subscription<Vec<IceCandidate>> {
    let (tx, rx) = mpsc::channel(FEED_BUFFER);
    let task = tokio::spawn(async move {
        while let Some(value) = inner.recv().await {
            if tx.send(value.unwrap_or_default()).await.is_err() {
                break;
            }
        }
    });
    Subscription::new(rx, task)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_follow_the_rest_schema() {
        let store = HttpStore::new("http://signal.example/");
        assert_eq!(
            store.session_url("482193"),
            "http://signal.example/sessions/482193.json"
        );
        assert_eq!(
            store.field_url("482193", "answer"),
            "http://signal.example/sessions/482193/answer.json"
        );
        assert_eq!(
            store.candidates_url("482193", PeerRole::Callee),
            "http://signal.example/sessions/482193/candidates/callee.json"
        );
    }
}
