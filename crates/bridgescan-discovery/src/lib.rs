/*!
 * bridgescan discovery
 *
 * Discovery orchestration for automation bridges. Endpoints are the
 * physical or logical buses to scan (a TCP gateway, a serial line);
 * participants know how to find one family of devices on such a bus.
 * The [`ScanOrchestrator`] runs every registered participant against every
 * registered endpoint, one participant at a time per endpoint and all
 * endpoints in parallel, and reports a scan as finished once every endpoint
 * has gone quiet.
 */

#![warn(missing_docs)]

pub mod cancel;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod orchestrator;
pub mod participant;
pub mod registry;
pub mod sink;
pub mod thing;

#[cfg(test)]
mod testing;

pub use cancel::ScanCancellation;
pub use controller::{ParticipantOutcome, ParticipantRun, ScanController, SessionReport, SessionState};
pub use endpoint::DiscoveryEndpoint;
pub use error::{DiscoveryError, Result};
pub use orchestrator::{FinishReason, ScanEvent, ScanOrchestrator, ScanStart, ScanStatus};
pub use participant::{DiscoveryListener, DiscoveryParticipant};
pub use sink::{ChannelSink, ResultSink};
pub use thing::{DiscoveryResult, DiscoveryResultBuilder, ThingTypeUid, ThingUid};

/// bridgescan discovery crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
