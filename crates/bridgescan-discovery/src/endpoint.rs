/*!
 * Discovery endpoints.
 *
 * An endpoint is one bridge connection (a TCP gateway, a serial line...)
 * that participants can probe for attached devices.
 */
use std::fmt::Debug;

use bridgescan_core::types::Id;

/// A bridge connection that can be scanned for devices
pub trait DiscoveryEndpoint: Send + Sync + Debug {
    /// Stable identity, used as the registry key and as the bridge id of results
    fn id(&self) -> &Id;

    /// Whether the bridge allows discovery on its connection
    fn is_discovery_enabled(&self) -> bool;

    /// Human readable name for logs
    fn label(&self) -> String {
        self.id().to_string()
    }
}
