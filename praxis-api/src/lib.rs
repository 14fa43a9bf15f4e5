pub mod handlers;
pub mod server;

pub use handlers::{AskRequest, AskResponse, ApiState, StatusResponse};
pub use server::ApiServer;
