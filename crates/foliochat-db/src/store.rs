use async_trait::async_trait;
use foliochat_common::{Result, SessionId};
use foliochat_facts::SessionState;

/// Persistence contract for per-conversation session state.
///
/// Turns of one conversation are processed sequentially, so implementations
/// only need last-writer-wins semantics per session.
#[async_trait]
pub trait SessionStateStore: Send + Sync {
    /// `None` when the session has never been saved.
    async fn load(&self, session_id: &SessionId) -> Result<Option<SessionState>>;

    async fn save(&self, session_id: &SessionId, state: &SessionState) -> Result<()>;
}
