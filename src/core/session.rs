//! Session lifecycle: code generation, create/join/close/delete.
//!
//! A session pairs exactly one sender and one receiver. The receiver
//! creates the session and shows the code; the sender joins with it.

use crate::core::config::SESSION_CODE_RETRIES;
use crate::core::error::SignalError;
use crate::core::signaling::{unix_millis, SessionRecord, SignalingStore};
use rand::Rng;
use std::sync::Arc;
use tracing::{debug, info};

/// True when `code` is exactly 6 ASCII digits.
pub fn is_valid_code(code: &str) -> bool {
    code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit())
}

/// Random code in `100000..=999999`.
fn generate_code() -> String {
    format!("{}", rand::rng().random_range(100_000..=999_999u32))
}

pub struct SessionManager {
    store: Arc<dyn SignalingStore>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SignalingStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn SignalingStore> {
        self.store.clone()
    }

    /// Allocate an unused code and write the initial `waiting` record.
    ///
    /// Collisions retry up to [`SESSION_CODE_RETRIES`] times before
    /// surfacing `SessionCreationExhausted`.
    pub async fn create_session(&self) -> Result<String, SignalError> {
        for attempt in 0..SESSION_CODE_RETRIES {
            let code = generate_code();
            if self.store.read_session(&code).await?.is_some() {
                debug!(event = "session_code_collision", attempt, "Generated code already in use");
                continue;
            }
            self.store
                .create_session(&code, SessionRecord::new(unix_millis()))
                .await?;
            info!(event = "session_created", code = %code, "Session created");
            return Ok(code);
        }
        Err(SignalError::SessionCreationExhausted(SESSION_CODE_RETRIES))
    }

    /// Join an existing session. `Ok(false)` means the code was well-formed
    /// but no such session exists; only a malformed code is an error, and
    /// that is raised before any store access.
    pub async fn join_session(&self, code: &str) -> Result<bool, SignalError> {
        if !is_valid_code(code) {
            return Err(SignalError::InvalidCodeFormat);
        }
        if self.store.read_session(code).await?.is_none() {
            return Ok(false);
        }
        self.store.mark_joined(code, unix_millis()).await?;
        info!(event = "session_joined", code = %code, "Joined session");
        Ok(true)
    }

    /// Soft close. Idempotent: closing an absent or already-closed
    /// session is a no-op.
    pub async fn close_session(&self, code: &str) -> Result<(), SignalError> {
        self.store.mark_closed(code, unix_millis()).await
    }

    /// Hard delete. Idempotent.
    pub async fn delete_session(&self, code: &str) -> Result<(), SignalError> {
        self.store.delete_session(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signaling::memory::MemoryStore;
    use crate::core::signaling::SessionStatus;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..100 {
            let code = generate_code();
            assert!(is_valid_code(&code), "bad code: {code}");
        }
    }

    #[test]
    fn code_validation_rejects_malformed_input() {
        assert!(is_valid_code("482193"));
        assert!(!is_valid_code("12345")); // too short
        assert!(!is_valid_code("1234567")); // too long
        assert!(!is_valid_code("12a456"));
        assert!(!is_valid_code(""));
        assert!(!is_valid_code("12 456"));
        assert!(!is_valid_code("１２３４５６")); // full-width digits are not ASCII
    }

    #[tokio::test]
    async fn created_session_starts_waiting() {
        let mgr = manager();
        let code = mgr.create_session().await.unwrap();
        assert!(is_valid_code(&code));

        let record = mgr.store().read_session(&code).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Waiting);
        assert!(record.offer.is_none());
        assert!(record.answer.is_none());
    }

    #[tokio::test]
    async fn join_flips_status_and_records_timestamp() {
        let mgr = manager();
        let code = mgr.create_session().await.unwrap();

        assert!(mgr.join_session(&code).await.unwrap());
        let record = mgr.store().read_session(&code).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Connecting);
        assert!(record.joined_at.is_some());
    }

    #[tokio::test]
    async fn join_with_unknown_code_is_false_not_error() {
        let mgr = manager();
        assert!(!mgr.join_session("000000").await.unwrap());
    }

    #[tokio::test]
    async fn join_with_five_digit_code_rejected_before_store_access() {
        // A store that panics on read would prove the point; the memory
        // store cannot observe reads, so assert on the error instead.
        let mgr = manager();
        let err = mgr.join_session("12345").await.unwrap_err();
        assert!(matches!(err, SignalError::InvalidCodeFormat));
    }

    #[tokio::test]
    async fn full_signaling_scenario_reaches_connected() {
        use crate::core::signaling::{SdpDescription, SessionRecord, unix_millis};

        // Pin the code by writing the record directly, then drive the
        // lifecycle the way the two peers would.
        let store = Arc::new(MemoryStore::new());
        store
            .create_session("482193", SessionRecord::new(unix_millis()))
            .await
            .unwrap();
        let mgr = SessionManager::new(store.clone());

        assert!(mgr.join_session("482193").await.unwrap());
        store
            .publish_offer("482193", SdpDescription::offer("v=0 offer"))
            .await
            .unwrap();
        store
            .publish_answer("482193", SdpDescription::answer("v=0 answer"))
            .await
            .unwrap();

        let record = store.read_session("482193").await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Connected);
        assert_eq!(record.offer.unwrap().kind, "offer");
        assert_eq!(record.answer.unwrap().kind, "answer");
    }

    #[tokio::test]
    async fn close_and_delete_are_idempotent() {
        let mgr = manager();
        let code = mgr.create_session().await.unwrap();

        mgr.close_session(&code).await.unwrap();
        mgr.close_session(&code).await.unwrap();
        let record = mgr.store().read_session(&code).await.unwrap().unwrap();
        assert_eq!(record.status, SessionStatus::Closed);
        assert!(record.closed_at.is_some());

        mgr.delete_session(&code).await.unwrap();
        mgr.delete_session(&code).await.unwrap();
        assert!(mgr.store().read_session(&code).await.unwrap().is_none());

        // Closing after deletion is still a no-op.
        mgr.close_session(&code).await.unwrap();
    }
}
