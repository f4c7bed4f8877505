pub mod api_docs;
pub mod auth;
pub mod config;
pub mod error;
pub mod reconciler;
pub mod routes;
pub mod state;

pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use reconciler::{run_reconcile_pass, start_reconciler_task};
pub use routes::create_app;
pub use state::AppState;
