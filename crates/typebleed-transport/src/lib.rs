pub mod dispatcher;
pub mod server;

pub use dispatcher::{router, ApiError, AppState, CreatedSession, SessionList, SessionSummary};
pub use server::TypeBleedServer;
