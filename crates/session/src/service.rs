use chrono::Utc;
use tracing::{debug, info, warn};

use kvitto_core::{
    ImageCapture, MergedReceipt, OverlapResult, ParsedFields, Session, SessionError, SessionId,
    SessionSettings, ValidationResult,
};
use kvitto_stitch::{find_overlap, FieldParser, Merger, Validator};
use kvitto_vision::{ImageEnhancer, RecognizedText, TextRecognizer};

use crate::blob::BlobStore;
use crate::store::SessionStore;

/// Media types accepted for capture uploads.
pub const SUPPORTED_MEDIA_TYPES: &[&str] =
    &["image/jpeg", "image/png", "image/webp", "application/pdf"];

/// What the caller learns from a successful capture upload.
#[derive(Debug, Clone)]
pub struct AddImageOutcome {
    pub session_id: SessionId,
    /// Zero-based position this capture received.
    pub order: usize,
    pub parsed: ParsedFields,
    /// Overlap against the previous capture, for live feedback while
    /// shooting. The final merge recomputes overlaps from scratch.
    pub overlap_preview: Option<OverlapResult>,
    pub can_add_more: bool,
    /// True when auto-detect is on and this capture parsed a total,
    /// which usually means the bottom of the receipt is in frame.
    pub end_detected: bool,
}

#[derive(Debug, Clone)]
pub struct CompleteOutcome {
    pub session_id: SessionId,
    pub merged: MergedReceipt,
    pub validation: ValidationResult,
    pub confidence: f32,
}

/// Orchestrates a capture session: per image enhance -> recognize ->
/// parse -> blob-store -> append, and on completion merge -> validate
/// -> terminal state. Collaborator failures degrade, they never fail a
/// capture; state transitions go through the store's atomicity.
pub struct SessionService<S, B, R, E> {
    store: S,
    blobs: B,
    recognizer: R,
    enhancer: E,
    parser: FieldParser,
}

impl<S, B, R, E> SessionService<S, B, R, E>
where
    S: SessionStore,
    B: BlobStore,
    R: TextRecognizer,
    E: ImageEnhancer,
{
    pub fn new(store: S, blobs: B, recognizer: R, enhancer: E) -> Self {
        Self {
            store,
            blobs,
            recognizer,
            enhancer,
            parser: FieldParser::new(),
        }
    }

    pub async fn create(&self, settings: SessionSettings) -> Result<Session, SessionError> {
        let session = Session::new(settings);
        self.store.insert(session.clone()).await?;
        info!("session {} created", session.id);
        Ok(session)
    }

    pub async fn get(&self, id: SessionId) -> Result<Session, SessionError> {
        self.store.fetch(id).await
    }

    pub async fn add_image(
        &self,
        id: SessionId,
        data: &[u8],
        mime: &str,
    ) -> Result<AddImageOutcome, SessionError> {
        if !SUPPORTED_MEDIA_TYPES.contains(&mime) {
            return Err(SessionError::UnsupportedMediaType(mime.to_string()));
        }
        let session = self.store.fetch(id).await?;
        // Fast-fail before collaborator work; the store re-checks on append.
        session.can_add_image()?;

        let recognized = self.recognize_degraded(data, mime).await;
        let parsed = self.parser.parse(&recognized.text);

        let blob_key = self
            .blobs
            .put(data, ext_for(mime))
            .await
            .map_err(|e| SessionError::Storage(e.to_string()))?;

        let overlap_preview = session
            .last_capture()
            .map(|prev| find_overlap(&prev.parsed.lines, &parsed.lines));
        if let Some(preview) = &overlap_preview {
            debug!(
                "session {id}: preview matched {} lines at confidence {:.2}",
                preview.matched_count(),
                preview.confidence
            );
        }

        let capture = ImageCapture {
            order: session.next_order(),
            raw_text: recognized.text,
            parsed: parsed.clone(),
            overlap_with_previous: overlap_preview.clone(),
            blob_key: Some(blob_key),
            recognition_confidence: recognized.confidence,
            captured_at: Utc::now(),
        };
        let updated = self.store.append_capture(id, capture).await?;

        let end_detected = updated.settings.auto_detect_end && parsed.total_cents.is_some();
        Ok(AddImageOutcome {
            session_id: id,
            order: updated.images.len() - 1,
            parsed,
            overlap_preview,
            can_add_more: updated.can_add_image().is_ok(),
            end_detected,
        })
    }

    /// Recognition must never fail a capture. An enhancement error falls
    /// back to the original bytes; a recognizer error falls back to
    /// empty text at zero confidence.
    async fn recognize_degraded(&self, data: &[u8], mime: &str) -> RecognizedText {
        let (bytes, send_mime) = if mime.starts_with("image/") {
            match self.enhancer.enhance(data) {
                Ok(enhanced) => (enhanced, "image/png"),
                Err(e) => {
                    warn!("image enhancement failed, sending original bytes: {e}");
                    (data.to_vec(), mime)
                }
            }
        } else {
            (data.to_vec(), mime)
        };
        match self.recognizer.recognize(&bytes, send_mime).await {
            Ok(recognized) => recognized,
            Err(e) => {
                warn!("text recognition degraded to empty result: {e}");
                RecognizedText::default()
            }
        }
    }

    /// Claim the session, run merge + validation, and land it in a
    /// terminal state. The session is never left in `processing`.
    pub async fn complete(&self, id: SessionId) -> Result<CompleteOutcome, SessionError> {
        let claimed = self.store.begin_processing(id).await?;
        let merger = Merger::new(claimed.settings.min_overlap_confidence);
        match run_merge(&merger, &claimed.images) {
            Ok((merged, validation)) => {
                let session = self
                    .store
                    .finish_completed(id, merged.clone(), validation.clone())
                    .await?;
                info!(
                    "session {id} completed: {} items, confidence {:.2}",
                    merged.items.len(),
                    merged.confidence
                );
                Ok(CompleteOutcome {
                    session_id: id,
                    confidence: session.confidence,
                    merged,
                    validation,
                })
            }
            Err(message) => {
                warn!("session {id} merge failed: {message}");
                self.store.finish_failed(id, message.clone()).await?;
                Err(SessionError::MergeFailed(message))
            }
        }
    }

    pub async fn cancel(&self, id: SessionId) -> Result<Session, SessionError> {
        let session = self.store.cancel(id).await?;
        info!("session {id} cancelled");
        Ok(session)
    }
}

/// The merge pipeline is pure, but a panic in it must not take the
/// session down with it; the payload becomes the failure message.
fn run_merge(
    merger: &Merger,
    images: &[ImageCapture],
) -> Result<(MergedReceipt, ValidationResult), String> {
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let merged = merger.merge(images);
        let validation = Validator::validate(&merged);
        (merged, validation)
    }));
    outcome.map_err(|payload| {
        if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "merge panicked".to_string()
        }
    })
}

fn ext_for(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kvitto_core::{MergeMethod, SessionStatus};
    use kvitto_vision::{LocalEnhancer, MockRecognizer, UnavailableRecognizer};

    use crate::blob::MemoryBlobStore;
    use crate::store::MemoryStore;

    // The byte payloads below are not decodable images, so enhancement
    // degrades to the original bytes; the mock ignores them either way.
    fn service_with(
        recognizer: MockRecognizer,
    ) -> SessionService<MemoryStore, MemoryBlobStore, MockRecognizer, LocalEnhancer> {
        SessionService::new(
            MemoryStore::new(),
            MemoryBlobStore::new(),
            recognizer,
            LocalEnhancer::default(),
        )
    }

    #[tokio::test]
    async fn create_persists_a_capturing_session() {
        let service = service_with(MockRecognizer::new("", 0.0));
        let session = service.create(SessionSettings::default()).await.unwrap();
        assert_eq!(session.status, SessionStatus::Capturing);
        let fetched = service.get(session.id).await.unwrap();
        assert_eq!(fetched.id, session.id);
    }

    #[tokio::test]
    async fn unsupported_media_type_is_rejected() {
        let service = service_with(MockRecognizer::new("ignored", 0.9));
        let session = service.create(SessionSettings::default()).await.unwrap();
        let err = service
            .add_image(session.id, b"GIF89a", "image/gif")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            SessionError::UnsupportedMediaType("image/gif".to_string())
        );
        assert!(service.get(session.id).await.unwrap().images.is_empty());
    }

    #[tokio::test]
    async fn add_image_parses_and_stores_the_capture() {
        let service = service_with(MockRecognizer::new("CAFE NOAH\nlatte 12.00\nTOTAL 12.00", 0.9));
        let session = service.create(SessionSettings::default()).await.unwrap();

        let outcome = service
            .add_image(session.id, b"photo-bytes", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(outcome.order, 0);
        assert!(outcome.overlap_preview.is_none());
        assert!(outcome.can_add_more);
        assert!(outcome.end_detected);
        assert_eq!(outcome.parsed.total_cents, Some(1200));

        let stored = service.get(session.id).await.unwrap();
        assert_eq!(stored.images.len(), 1);
        assert_eq!(stored.images[0].recognition_confidence, 0.9);
        assert!(stored.images[0].blob_key.is_some());
    }

    #[tokio::test]
    async fn second_capture_gets_an_overlap_preview() {
        let recognizer = MockRecognizer::with_pages(vec![
            kvitto_vision::RecognizedText {
                text: "CAFE NOAH\nlatte 12.00\nsoup 24.00\nbread 6.00".into(),
                confidence: 0.9,
            },
            kvitto_vision::RecognizedText {
                text: "soup 24.00\nbread 6.00\nTOTAL 42.00".into(),
                confidence: 0.85,
            },
        ]);
        let service = service_with(recognizer);
        let session = service.create(SessionSettings::default()).await.unwrap();

        service
            .add_image(session.id, b"top", "image/jpeg")
            .await
            .unwrap();
        let second = service
            .add_image(session.id, b"bottom", "image/jpeg")
            .await
            .unwrap();
        assert_eq!(second.order, 1);
        let preview = second.overlap_preview.unwrap();
        assert_eq!(preview.matched_count(), 2);
        assert_eq!(preview.confidence, 1.0);
    }

    #[tokio::test]
    async fn recognizer_outage_degrades_to_empty_capture() {
        let service = SessionService::new(
            MemoryStore::new(),
            MemoryBlobStore::new(),
            UnavailableRecognizer,
            LocalEnhancer::default(),
        );
        let session = service.create(SessionSettings::default()).await.unwrap();
        let outcome = service
            .add_image(session.id, b"%PDF-1.4", "application/pdf")
            .await
            .unwrap();
        assert_eq!(outcome.parsed.confidence, 0.0);
        assert!(outcome.parsed.lines.is_empty());
        assert!(!outcome.end_detected);

        let stored = service.get(session.id).await.unwrap();
        assert_eq!(stored.images[0].raw_text, "");
        assert_eq!(stored.images[0].recognition_confidence, 0.0);
    }

    #[tokio::test]
    async fn capture_limit_stops_further_uploads() {
        let pages = vec![
            kvitto_vision::RecognizedText::default(),
            kvitto_vision::RecognizedText::default(),
        ];
        let service = service_with(MockRecognizer::with_pages(pages));
        let settings = SessionSettings {
            max_images: 1,
            ..Default::default()
        };
        let session = service.create(settings).await.unwrap();

        let first = service
            .add_image(session.id, b"a", "image/png")
            .await
            .unwrap();
        assert!(!first.can_add_more);
        let err = service
            .add_image(session.id, b"b", "image/png")
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::CaptureLimitReached { limit: 1 });
        assert_eq!(service.get(session.id).await.unwrap().images.len(), 1);
    }

    #[tokio::test]
    async fn complete_merges_validates_and_finishes() {
        let recognizer = MockRecognizer::with_pages(vec![
            kvitto_vision::RecognizedText {
                text: "CAFE NOAH\nlatte 12.00\nsoup 24.00\nbread 6.00".into(),
                confidence: 0.9,
            },
            kvitto_vision::RecognizedText {
                text: "soup 24.00\nbread 6.00\nTOTAL 42.00".into(),
                confidence: 0.85,
            },
        ]);
        let service = service_with(recognizer);
        let session = service.create(SessionSettings::default()).await.unwrap();
        service
            .add_image(session.id, b"top", "image/jpeg")
            .await
            .unwrap();
        service
            .add_image(session.id, b"bottom", "image/jpeg")
            .await
            .unwrap();

        let outcome = service.complete(session.id).await.unwrap();
        assert_eq!(outcome.merged.method, MergeMethod::Overlap);
        assert_eq!(outcome.merged.total_cents, Some(4200));
        assert_eq!(outcome.merged.items.len(), 3);
        assert!(outcome.validation.is_valid);
        assert_eq!(outcome.confidence, 1.0);

        let stored = service.get(session.id).await.unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert!(stored.merged_result.is_some());
        assert!(stored.validation.is_some());
    }

    #[tokio::test]
    async fn complete_requires_at_least_one_image() {
        let service = service_with(MockRecognizer::new("", 0.0));
        let session = service.create(SessionSettings::default()).await.unwrap();
        assert_eq!(
            service.complete(session.id).await.unwrap_err(),
            SessionError::EmptySession
        );
        // The failed claim must not have moved the session.
        assert_eq!(
            service.get(session.id).await.unwrap().status,
            SessionStatus::Capturing
        );
    }

    #[tokio::test]
    async fn complete_twice_conflicts() {
        let service = service_with(MockRecognizer::new("TOTAL 5.00", 0.9));
        let session = service.create(SessionSettings::default()).await.unwrap();
        service
            .add_image(session.id, b"a", "image/jpeg")
            .await
            .unwrap();
        service.complete(session.id).await.unwrap();
        assert!(matches!(
            service.complete(session.id).await.unwrap_err(),
            SessionError::InvalidStatus { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_only_before_completion() {
        let service = service_with(MockRecognizer::new("TOTAL 5.00", 0.9));
        let session = service.create(SessionSettings::default()).await.unwrap();
        service
            .add_image(session.id, b"a", "image/jpeg")
            .await
            .unwrap();
        service.complete(session.id).await.unwrap();
        assert!(matches!(
            service.cancel(session.id).await.unwrap_err(),
            SessionError::InvalidStatus { .. }
        ));
    }

    #[tokio::test]
    async fn cancel_while_capturing() {
        let service = service_with(MockRecognizer::new("", 0.0));
        let session = service.create(SessionSettings::default()).await.unwrap();
        let cancelled = service.cancel(session.id).await.unwrap();
        assert_eq!(cancelled.status, SessionStatus::Cancelled);
    }

    #[test]
    fn extensions_follow_media_types() {
        assert_eq!(ext_for("image/jpeg"), "jpg");
        assert_eq!(ext_for("application/pdf"), "pdf");
        assert_eq!(ext_for("application/octet-stream"), "bin");
    }
}
