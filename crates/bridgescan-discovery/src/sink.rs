/*!
 * Result sinks.
 *
 * The sink is the registry discovered things are reported into. The
 * orchestrator forwards every result unchanged and never retries or
 * deduplicates; that is left to the sink.
 */
use std::fmt::Debug;

use tokio::sync::mpsc;
use tracing::debug;

use crate::thing::DiscoveryResult;

/// Receiver of discovery results
pub trait ResultSink: Send + Sync + Debug {
    /// Accept a result. Must not block the caller.
    fn report(&self, result: DiscoveryResult);
}

/// A sink that forwards results into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<DiscoveryResult>,
}

impl ChannelSink {
    /// Create a sink and the receiver its results arrive on
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiscoveryResult>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ResultSink for ChannelSink {
    fn report(&self, result: DiscoveryResult) {
        if let Err(e) = self.sender.send(result) {
            debug!(thing = %e.0.thing_uid(), "Result receiver dropped, discarding result");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thing::{ThingTypeUid, ThingUid};

    fn result(id: &str) -> DiscoveryResult {
        let thing_type = ThingTypeUid::new("modbus", "widget").unwrap();
        DiscoveryResult::builder(ThingUid::new(&thing_type, id).unwrap()).build()
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::new();
        sink.report(result("A1"));
        sink.report(result("A2"));

        assert_eq!(rx.recv().await.unwrap().thing_uid().id(), "A1");
        assert_eq!(rx.recv().await.unwrap().thing_uid().id(), "A2");
    }

    #[test]
    fn test_channel_sink_tolerates_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.report(result("A1"));
    }
}
