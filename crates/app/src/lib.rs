pub mod preview_store;
pub mod session;

pub use preview_store::PreviewStore;
pub use session::{EditorSession, SessionError};
