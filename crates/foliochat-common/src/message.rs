use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One prior turn of a conversation as handed over by the HTTP layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    System,
    User,
    Assistant,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: None,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_factories() {
        let now = Utc::now();
        let turn = ConversationTurn::assistant("AAPL: $150").at(now);

        assert_eq!(turn.role, TurnRole::Assistant);
        assert_eq!(turn.content, "AAPL: $150");
        assert_eq!(turn.timestamp, Some(now));

        let user = ConversationTurn::user("how is my portfolio?");
        assert_eq!(user.role, TurnRole::User);
        assert!(user.timestamp.is_none());
    }

    #[test]
    fn test_turn_deserializes_without_timestamp() {
        let turn: ConversationTurn =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(turn.role, TurnRole::User);
        assert!(turn.timestamp.is_none());
    }
}
