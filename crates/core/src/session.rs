use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SessionError;
use crate::fields::ParsedFields;
use crate::overlap::{OverlapResult, DEFAULT_MIN_OVERLAP_CONFIDENCE};
use crate::receipt::MergedReceipt;
use crate::validation::ValidationResult;

/// Opaque session identifier handed out to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle of a capture session.
///
/// ```text
/// capturing ──> processing ──> completed
///     │              └───────> failed
///     └──> cancelled
/// ```
///
/// `completed`, `failed` and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Capturing,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Cancelled
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Capturing => "capturing",
            SessionStatus::Processing => "processing",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
            SessionStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "capturing" => Ok(SessionStatus::Capturing),
            "processing" => Ok(SessionStatus::Processing),
            "completed" => Ok(SessionStatus::Completed),
            "failed" => Ok(SessionStatus::Failed),
            "cancelled" => Ok(SessionStatus::Cancelled),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

/// Per-session knobs, fixed at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Suggest finishing once a capture parses a total line.
    pub auto_detect_end: bool,
    /// Overlap confidence below which a transition counts as a gap.
    pub min_overlap_confidence: f32,
    /// Hard cap on captures per session.
    pub max_images: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            auto_detect_end: true,
            min_overlap_confidence: DEFAULT_MIN_OVERLAP_CONFIDENCE,
            max_images: 10,
        }
    }
}

/// One captured photo, its recognized text and per-capture analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageCapture {
    /// Zero-based capture order, assigned when the capture is appended.
    pub order: usize,
    pub raw_text: String,
    pub parsed: ParsedFields,
    /// Preview against the immediately preceding capture. Informational
    /// only; the final merge recomputes all overlaps from scratch.
    pub overlap_with_previous: Option<OverlapResult>,
    /// Content key of the original upload in the blob store.
    pub blob_key: Option<String>,
    /// Scanning confidence reported by the recognition service, in [0, 1].
    pub recognition_confidence: f32,
    pub captured_at: DateTime<Utc>,
}

/// The session aggregate. Transitions consume the current snapshot and
/// return the next one, so a stored session can only advance through
/// `SessionStore` implementations that serialize updates per id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub status: SessionStatus,
    pub images: Vec<ImageCapture>,
    /// Present only once the session completed.
    pub merged_result: Option<MergedReceipt>,
    /// Mirrors the merged result's confidence; 0.0 until completion.
    pub confidence: f32,
    pub validation: Option<ValidationResult>,
    pub settings: SessionSettings,
    /// Failure diagnostics, set when the merge pipeline errored.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            status: SessionStatus::Capturing,
            images: Vec::new(),
            merged_result: None,
            confidence: 0.0,
            validation: None,
            settings,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether another capture may be appended right now.
    pub fn can_add_image(&self) -> Result<(), SessionError> {
        if self.status != SessionStatus::Capturing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Capturing,
                actual: self.status,
            });
        }
        if self.images.len() >= self.settings.max_images {
            return Err(SessionError::CaptureLimitReached {
                limit: self.settings.max_images,
            });
        }
        Ok(())
    }

    /// Order the next capture will receive.
    pub fn next_order(&self) -> usize {
        self.images.len()
    }

    pub fn last_capture(&self) -> Option<&ImageCapture> {
        self.images.last()
    }

    /// Append a capture. The capture's `order` must equal the current image
    /// count; a mismatch means another append won the race.
    pub fn with_capture(mut self, capture: ImageCapture) -> Result<Self, SessionError> {
        self.can_add_image()?;
        if capture.order != self.images.len() {
            return Err(SessionError::Conflict(format!(
                "capture order {} does not match image count {}",
                capture.order,
                self.images.len()
            )));
        }
        self.images.push(capture);
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// capturing -> processing. Requires at least one capture.
    pub fn into_processing(mut self) -> Result<Self, SessionError> {
        if self.status != SessionStatus::Capturing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Capturing,
                actual: self.status,
            });
        }
        if self.images.is_empty() {
            return Err(SessionError::EmptySession);
        }
        self.status = SessionStatus::Processing;
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// processing -> completed, recording the merge output.
    pub fn into_completed(
        mut self,
        merged: MergedReceipt,
        validation: ValidationResult,
    ) -> Result<Self, SessionError> {
        if self.status != SessionStatus::Processing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Processing,
                actual: self.status,
            });
        }
        self.confidence = merged.confidence;
        self.merged_result = Some(merged);
        self.validation = Some(validation);
        self.status = SessionStatus::Completed;
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// processing -> failed, recording the failure message.
    pub fn into_failed(mut self, message: impl Into<String>) -> Result<Self, SessionError> {
        if self.status != SessionStatus::Processing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Processing,
                actual: self.status,
            });
        }
        self.error = Some(message.into());
        self.status = SessionStatus::Failed;
        self.updated_at = Utc::now();
        Ok(self)
    }

    /// capturing -> cancelled. Processing sessions cannot be cancelled.
    pub fn into_cancelled(mut self) -> Result<Self, SessionError> {
        if self.status != SessionStatus::Capturing {
            return Err(SessionError::InvalidStatus {
                expected: SessionStatus::Capturing,
                actual: self.status,
            });
        }
        self.status = SessionStatus::Cancelled;
        self.updated_at = Utc::now();
        Ok(self)
    }
}
