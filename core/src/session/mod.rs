mod conversation;
mod manager;
mod session_id;

pub use conversation::Session;
pub use conversation::SessionDescriptor;
pub use conversation::SessionState;
pub use manager::SessionManager;
pub use session_id::SessionId;
