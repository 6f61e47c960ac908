/*!
 * Prelude module for bridgescan core.
 *
 * Re-exports the types most components import together.
 */

pub use crate::error::{Error, Result};

pub use crate::types::{Id, Metadata, Value};

pub use crate::config::{Config, ConfigBuilder, DiscoveryConfig};

pub use crate::utils::{optional_millis, with_timeout};

pub use tracing::{debug, error, info, trace, warn};

pub use crate::init;
