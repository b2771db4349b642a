//! `ragchat-server` exposes the RagChat retrieval engine over HTTP.
//!
//! Documents are uploaded as multipart files, every other operation takes and
//! returns JSON. Errors are reported as `{"message", "details"}` bodies with a
//! status code derived from the engine error.

pub mod error;
pub mod protocol;
pub mod server;
pub mod settings;
pub mod telemetry;

pub use error::ApiError;
pub use server::{AppState, ServerConfig, app_router, run_server};
pub use settings::Settings;
pub use telemetry::{LogFormat, init_tracing};
