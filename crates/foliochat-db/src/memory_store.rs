use async_trait::async_trait;
use dashmap::DashMap;
use foliochat_common::{Result, SessionId};
use foliochat_facts::SessionState;

use crate::store::SessionStateStore;

/// Process-local session store. State is lost on exit.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: DashMap<String, SessionState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStateStore for MemorySessionStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>> {
        Ok(self
            .sessions
            .get(session_id.as_str())
            .map(|entry| entry.value().clone()))
    }

    async fn save(&self, session_id: &SessionId, state: &SessionState) -> Result<()> {
        self.sessions
            .insert(session_id.as_str().to_string(), state.clone());
        Ok(())
    }
}
