pub mod error;
pub mod fields;
pub mod money;
pub mod overlap;
pub mod receipt;
pub mod session;
pub mod validation;

pub use error::SessionError;
pub use fields::{Item, MerchantInfo, ParsedFields};
pub use money::{format_cents, parse_amount};
pub use overlap::{OverlapResult, DEFAULT_MIN_OVERLAP_CONFIDENCE, MIN_RELIABLE_LINES};
pub use receipt::{MergeMethod, MergedReceipt};
pub use session::{ImageCapture, Session, SessionId, SessionSettings, SessionStatus};
pub use validation::{Issue, IssueType, Severity, ValidationResult};
