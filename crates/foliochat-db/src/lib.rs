pub mod memory_store;
pub mod session_store;
pub mod store;

pub use memory_store::MemorySessionStore;
pub use session_store::SqliteSessionStore;
pub use store::SessionStateStore;
