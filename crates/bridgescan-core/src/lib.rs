/*!
 * bridgescan core
 *
 * Shared support for the bridgescan crates: error type, configuration,
 * logging, identifiers and async helpers.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// bridgescan core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization with default logging
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("bridgescan core {} initialized", VERSION);
    Ok(())
}

/// Library initialization from a loaded configuration
pub fn init_with_config(config: &config::Config) -> Result<(), error::Error> {
    logging::init_from_config(&config.logging)?;
    tracing::info!(
        app = %config.general.app_name,
        environment = %config.general.environment,
        "bridgescan core {} initialized",
        VERSION
    );
    Ok(())
}
