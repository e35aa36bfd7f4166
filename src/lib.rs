pub mod auth;
pub mod billing;
pub mod cache_ratio;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod logging;
pub mod registry;
pub mod relay;
pub mod router;
pub mod server;
pub mod translate;

pub use cache_ratio::CacheRatioTable;
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use logging::RelayLog;
pub use relay::Relay;
pub use router::ModelRouter;
pub use server::{build_router, AppState};
