/*!
 * Discovery participants and the listener they report through.
 *
 * A participant knows how to find one family of devices behind an
 * endpoint. The scan controller hands it a [`DiscoveryListener`] for each
 * run; the participant reports every device it finds through
 * [`DiscoveryListener::thing_discovered`] and then calls
 * [`DiscoveryListener::discovery_finished`] once.
 */
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use bridgescan_core::types::Id;

use crate::cancel::ScanCancellation;
use crate::endpoint::DiscoveryEndpoint;
use crate::error::Result;
use crate::sink::ResultSink;
use crate::thing::{DiscoveryResult, ThingTypeUid};

/// A probe for one family of devices
///
/// The same instance is reused across endpoints and scans, but is never run
/// twice at once against the same endpoint.
#[async_trait]
pub trait DiscoveryParticipant: Send + Sync + Debug {
    /// Stable identity, used as the registry key
    fn id(&self) -> &Id;

    /// Thing types this participant may report
    fn supported_thing_types(&self) -> HashSet<ThingTypeUid>;

    /// Probe `endpoint` for devices
    ///
    /// The participant may finish its work inside this call or hand the
    /// listener to a task of its own and return early; the run is over once
    /// `discovery_finished` is called, every clone of the listener is dropped,
    /// or this call returns an error.
    async fn start_discovery(
        &self,
        endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()>;
}

/// Shared between a listener and the controller that created it
#[derive(Debug, Default)]
pub(crate) struct ListenerGate {
    closed: AtomicBool,
    results: AtomicUsize,
}

impl ListenerGate {
    /// Stop forwarding results from the listener
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Number of results forwarded so far
    pub(crate) fn results(&self) -> usize {
        self.results.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct ListenerInner {
    endpoint: Id,
    participant: Id,
    sink: Arc<dyn ResultSink>,
    gate: Arc<ListenerGate>,
    finished: Mutex<Option<oneshot::Sender<()>>>,
    cancellation: ScanCancellation,
}

/// Callback surface for one participant run against one endpoint
#[derive(Debug, Clone)]
pub struct DiscoveryListener {
    inner: Arc<ListenerInner>,
}

impl DiscoveryListener {
    pub(crate) fn new(
        endpoint: Id,
        participant: Id,
        sink: Arc<dyn ResultSink>,
        cancellation: ScanCancellation,
    ) -> (Self, Arc<ListenerGate>, oneshot::Receiver<()>) {
        let (finished_tx, finished_rx) = oneshot::channel();
        let gate = Arc::new(ListenerGate::default());
        let listener = Self {
            inner: Arc::new(ListenerInner {
                endpoint,
                participant,
                sink,
                gate: gate.clone(),
                finished: Mutex::new(Some(finished_tx)),
                cancellation,
            }),
        };
        (listener, gate, finished_rx)
    }

    /// Report a discovered device
    ///
    /// Returns `false` when the run has already been closed (timed out,
    /// cancelled by endpoint removal) and the result was discarded.
    pub fn thing_discovered(&self, result: DiscoveryResult) -> bool {
        let inner = &self.inner;
        if inner.gate.closed.load(Ordering::SeqCst) {
            debug!(
                endpoint = %inner.endpoint,
                participant = %inner.participant,
                thing = %result.thing_uid(),
                "Discarding result from closed discovery run"
            );
            return false;
        }

        trace!(
            endpoint = %inner.endpoint,
            participant = %inner.participant,
            thing = %result.thing_uid(),
            "Thing discovered"
        );
        inner.gate.results.fetch_add(1, Ordering::SeqCst);
        inner.sink.report(result);
        true
    }

    /// Signal that the participant is done with this endpoint
    ///
    /// Only the first call has an effect.
    pub fn discovery_finished(&self) {
        match self.inner.finished.lock().take() {
            Some(sender) => {
                let _ = sender.send(());
            }
            None => debug!(
                endpoint = %self.inner.endpoint,
                participant = %self.inner.participant,
                "Ignoring repeated discovery_finished"
            ),
        }
    }

    /// Whether the scan this run belongs to has been stopped
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Resolve once the scan this run belongs to is stopped
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await
    }

    /// The endpoint being probed
    pub fn endpoint_id(&self) -> &Id {
        &self.inner.endpoint
    }

    /// The participant this listener was created for
    pub fn participant_id(&self) -> &Id {
        &self.inner.participant
    }
}
