use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use kvitto_core::{
    ImageCapture, MergedReceipt, Session, SessionError, SessionId, ValidationResult,
};

/// Durable home of session aggregates.
///
/// Implementations must serialize updates per session id, so the
/// check-and-act transitions on `Session` hold under concurrent
/// requests: two writers racing the same transition see one winner and
/// one `Conflict`/`InvalidStatus`, never a lost update.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: Session) -> Result<(), SessionError>;

    async fn fetch(&self, id: SessionId) -> Result<Session, SessionError>;

    /// Append a capture, assigning its order under the store's
    /// atomicity; the `order` on the passed capture is overwritten.
    async fn append_capture(
        &self,
        id: SessionId,
        capture: ImageCapture,
    ) -> Result<Session, SessionError>;

    /// capturing -> processing; the caller that gets `Ok` owns the merge.
    async fn begin_processing(&self, id: SessionId) -> Result<Session, SessionError>;

    async fn finish_completed(
        &self,
        id: SessionId,
        merged: MergedReceipt,
        validation: ValidationResult,
    ) -> Result<Session, SessionError>;

    async fn finish_failed(&self, id: SessionId, message: String)
        -> Result<Session, SessionError>;

    async fn cancel(&self, id: SessionId) -> Result<Session, SessionError>;
}

/// Single-process store backed by a mutex-guarded map. One lock for the
/// whole map is enough here; updates are short and session counts small.
#[derive(Default)]
pub struct MemoryStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch-transform-replace under the map lock.
    async fn update_with<F>(&self, id: SessionId, apply: F) -> Result<Session, SessionError>
    where
        F: FnOnce(Session) -> Result<Session, SessionError> + Send,
    {
        let mut sessions = self.sessions.lock().await;
        let current = sessions
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))?;
        let updated = apply(current)?;
        sessions.insert(id, updated.clone());
        Ok(updated)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn insert(&self, session: Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&session.id) {
            return Err(SessionError::Conflict(format!(
                "session {} already exists",
                session.id
            )));
        }
        sessions.insert(session.id, session);
        Ok(())
    }

    async fn fetch(&self, id: SessionId) -> Result<Session, SessionError> {
        let sessions = self.sessions.lock().await;
        sessions.get(&id).cloned().ok_or(SessionError::NotFound(id))
    }

    async fn append_capture(
        &self,
        id: SessionId,
        mut capture: ImageCapture,
    ) -> Result<Session, SessionError> {
        self.update_with(id, move |session| {
            capture.order = session.next_order();
            session.with_capture(capture)
        })
        .await
    }

    async fn begin_processing(&self, id: SessionId) -> Result<Session, SessionError> {
        self.update_with(id, |session| session.into_processing()).await
    }

    async fn finish_completed(
        &self,
        id: SessionId,
        merged: MergedReceipt,
        validation: ValidationResult,
    ) -> Result<Session, SessionError> {
        self.update_with(id, move |session| session.into_completed(merged, validation))
            .await
    }

    async fn finish_failed(
        &self,
        id: SessionId,
        message: String,
    ) -> Result<Session, SessionError> {
        self.update_with(id, move |session| session.into_failed(message))
            .await
    }

    async fn cancel(&self, id: SessionId) -> Result<Session, SessionError> {
        self.update_with(id, |session| session.into_cancelled()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use kvitto_core::{ParsedFields, SessionSettings, SessionStatus};

    fn capture() -> ImageCapture {
        ImageCapture {
            order: 0,
            raw_text: "TOTAL 10.00".to_string(),
            parsed: ParsedFields::fallback(),
            overlap_with_previous: None,
            blob_key: None,
            recognition_confidence: 0.5,
            captured_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_fetch() {
        let store = MemoryStore::new();
        let session = Session::new(SessionSettings::default());
        let id = session.id;
        store.insert(session).await.unwrap();
        assert_eq!(store.fetch(id).await.unwrap().id, id);
    }

    #[tokio::test]
    async fn duplicate_insert_conflicts() {
        let store = MemoryStore::new();
        let session = Session::new(SessionSettings::default());
        store.insert(session.clone()).await.unwrap();
        assert!(matches!(
            store.insert(session).await.unwrap_err(),
            SessionError::Conflict(_)
        ));
    }

    #[tokio::test]
    async fn fetch_unknown_is_not_found() {
        let store = MemoryStore::new();
        let id = SessionId::new();
        assert_eq!(
            store.fetch(id).await.unwrap_err(),
            SessionError::NotFound(id)
        );
    }

    #[tokio::test]
    async fn append_assigns_sequential_orders() {
        let store = MemoryStore::new();
        let session = Session::new(SessionSettings::default());
        let id = session.id;
        store.insert(session).await.unwrap();

        // Both writers pass a stale order; the store assigns the real one.
        let mut stale = capture();
        stale.order = 7;
        let after_first = store.append_capture(id, stale).await.unwrap();
        let after_second = store.append_capture(id, capture()).await.unwrap();
        assert_eq!(after_first.images[0].order, 0);
        assert_eq!(after_second.images[1].order, 1);
    }

    #[tokio::test]
    async fn concurrent_appends_both_land() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::new(SessionSettings::default());
        let id = session.id;
        store.insert(session).await.unwrap();

        let a = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.append_capture(id, capture()).await }
        });
        let b = tokio::spawn({
            let store = Arc::clone(&store);
            async move { store.append_capture(id, capture()).await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let session = store.fetch(id).await.unwrap();
        assert_eq!(session.images.len(), 2);
        assert_eq!(session.images[0].order, 0);
        assert_eq!(session.images[1].order, 1);
    }

    #[tokio::test]
    async fn processing_claim_is_exclusive() {
        let store = MemoryStore::new();
        let session = Session::new(SessionSettings::default());
        let id = session.id;
        store.insert(session).await.unwrap();
        store.append_capture(id, capture()).await.unwrap();

        let claimed = store.begin_processing(id).await.unwrap();
        assert_eq!(claimed.status, SessionStatus::Processing);
        // Second claimant loses.
        assert!(matches!(
            store.begin_processing(id).await.unwrap_err(),
            SessionError::InvalidStatus { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_persists() {
        let store = MemoryStore::new();
        let session = Session::new(SessionSettings::default());
        let id = session.id;
        store.insert(session).await.unwrap();
        store.cancel(id).await.unwrap();
        assert_eq!(
            store.fetch(id).await.unwrap().status,
            SessionStatus::Cancelled
        );
    }
}
