pub mod error;
pub mod message;
pub mod redaction;
pub mod types;

pub use error::{Error, FailureClass, Result};
pub use message::{ConversationTurn, TurnRole};
pub use redaction::{Redacted, RedactingWriter, redact_secrets};
pub use types::SessionId;
