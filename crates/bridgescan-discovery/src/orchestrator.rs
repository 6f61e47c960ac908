/*!
 * Scan orchestrator.
 *
 * The orchestrator is the public face of discovery. It owns the participant
 * and endpoint registries, fans a scan request out to every endpoint's
 * controller, and folds the per-endpoint completions back into a single
 * logical "scan finished".
 */
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use bridgescan_core::config::DiscoveryConfig;
use bridgescan_core::types::Id;

use crate::cancel::ScanCancellation;
use crate::controller::SessionReport;
use crate::endpoint::DiscoveryEndpoint;
use crate::error::{DiscoveryError, Result};
use crate::participant::DiscoveryParticipant;
use crate::registry::{EndpointRegistry, ParticipantRegistry};
use crate::sink::ResultSink;
use crate::thing::ThingTypeUid;

/// Why a scan round ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every endpoint finished its session
    Completed,
    /// `stop_scan` was called
    Stopped,
    /// The scan timeout elapsed
    TimedOut,
    /// No participant was registered
    NoParticipants,
    /// No endpoint could start a session
    NoEligibleEndpoints,
}

/// Events published by the orchestrator
#[derive(Debug, Clone)]
pub enum ScanEvent {
    /// A new scan round started on at least one endpoint
    ScanStarted {
        /// Round identifier
        round: Id,
        /// Endpoints that started a session
        endpoints: usize,
    },
    /// One endpoint finished its session
    EndpointFinished(SessionReport),
    /// The scan round is over; emitted once per round
    ScanFinished {
        /// Round identifier
        round: Id,
        /// Why it ended
        reason: FinishReason,
    },
    /// The union of supported thing types changed
    SupportedTypesChanged(HashSet<ThingTypeUid>),
}

/// Whether a logical scan is in progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// No scan round active
    NotScanning,
    /// A scan round is active
    Scanning {
        /// Round identifier
        round: Id,
        /// When the round started
        since: DateTime<Utc>,
    },
}

impl ScanStatus {
    /// Whether a round is active
    pub fn is_scanning(&self) -> bool {
        matches!(self, ScanStatus::Scanning { .. })
    }
}

/// What a call to [`ScanOrchestrator::start_scan`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStart {
    /// Sessions were started on `endpoints` endpoints
    Started {
        /// Round the sessions belong to
        round: Id,
        /// Number of endpoints that started a session
        endpoints: usize,
    },
    /// No endpoint could start, but sessions of the active round are still running
    AlreadyRunning {
        /// The active round
        round: Id,
    },
    /// Nothing to do: no participant registered
    NoParticipants,
    /// Nothing to do: no endpoint could start a session
    NoEligibleEndpoints,
}

#[derive(Debug)]
struct ScanRound {
    id: Id,
    started_at: DateTime<Utc>,
    cancellation: ScanCancellation,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug)]
struct OrchestratorInner {
    participants: Arc<ParticipantRegistry>,
    endpoints: EndpointRegistry,
    sink: Arc<dyn ResultSink>,
    scan_timeout: Option<Duration>,
    round: Mutex<Option<ScanRound>>,
    status: watch::Sender<ScanStatus>,
    events: broadcast::Sender<ScanEvent>,
}

/// Runs discovery scans across all registered endpoints
#[derive(Debug, Clone)]
pub struct ScanOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl ScanOrchestrator {
    /// Create an orchestrator with default discovery settings
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self::build(sink, &DiscoveryConfig::default())
    }

    /// Create an orchestrator from the `[discovery]` configuration section
    pub fn with_config(sink: Arc<dyn ResultSink>, config: &DiscoveryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(sink, config))
    }

    fn build(sink: Arc<dyn ResultSink>, config: &DiscoveryConfig) -> Self {
        let participants = Arc::new(ParticipantRegistry::new());
        let endpoints = EndpointRegistry::new(participants.clone(), config.participant_timeout());
        let (status, _) = watch::channel(ScanStatus::NotScanning);
        let (events, _) = broadcast::channel(config.event_capacity);

        Self {
            inner: Arc::new(OrchestratorInner {
                participants,
                endpoints,
                sink,
                scan_timeout: config.scan_timeout(),
                round: Mutex::new(None),
                status,
                events,
            }),
        }
    }

    /// Subscribe to scan events
    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.inner.events.subscribe()
    }

    /// Current scan status
    pub fn status(&self) -> ScanStatus {
        self.inner.status.borrow().clone()
    }

    /// Whether a scan round is active
    pub fn is_scanning(&self) -> bool {
        self.inner.status.borrow().is_scanning()
    }

    /// Wait until no scan round is active
    pub async fn wait_until_finished(&self) {
        let mut status = self.inner.status.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait
        let _ = status.wait_for(|status| !status.is_scanning()).await;
    }

    /// Thing types any registered participant can discover
    pub fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        self.inner.participants.supported_thing_types()
    }

    /// Number of registered participants
    pub fn participant_count(&self) -> usize {
        self.inner.participants.len()
    }

    /// Number of registered endpoints
    pub fn endpoint_count(&self) -> usize {
        self.inner.endpoints.len()
    }

    /// Register a discovery participant
    ///
    /// It takes part in every scan session started from now on.
    pub fn register_participant(&self, participant: Arc<dyn DiscoveryParticipant>) -> bool {
        let before = self.supported_thing_types();
        let added = self.inner.participants.register(participant);
        if added {
            self.publish_type_change(before);
        }
        added
    }

    /// Deregister a discovery participant
    ///
    /// Running sessions will not invoke it again; a run already in flight
    /// is left to complete.
    pub fn deregister_participant(&self, id: &Id) -> bool {
        let before = self.supported_thing_types();
        let removed = self.inner.participants.deregister(id).is_some();
        if removed {
            self.publish_type_change(before);
        }
        removed
    }

    /// Register an endpoint
    pub fn register_endpoint(&self, endpoint: Arc<dyn DiscoveryEndpoint>) -> bool {
        self.inner.endpoints.register(endpoint)
    }

    /// Deregister an endpoint
    ///
    /// Its session, if any, is interrupted, and the active round finishes if
    /// this was the last endpoint still scanning.
    pub fn deregister_endpoint(&self, id: &Id) -> bool {
        let removed = self.inner.endpoints.deregister(id).is_some();
        if removed {
            self.check_all_finished();
        }
        removed
    }

    /// Whether the given endpoint has a session running
    pub fn endpoint_scan_in_progress(&self, id: &Id) -> Result<bool> {
        self.inner
            .endpoints
            .get(id)
            .map(|entry| entry.controller().is_scan_in_progress())
            .ok_or_else(|| DiscoveryError::EndpointNotFound(id.clone()))
    }

    /// Start a scan on every registered endpoint
    ///
    /// Endpoints already scanning keep their session; idle endpoints get a
    /// fresh one. Must be called from within a Tokio runtime for any session
    /// to start.
    pub fn start_scan(&self) -> ScanStart {
        if self.inner.participants.is_empty() {
            info!("No discovery participants registered, nothing to scan");
            self.finish_now(FinishReason::NoParticipants);
            return ScanStart::NoParticipants;
        }

        let mut round_slot = self.inner.round.lock();
        let fresh = round_slot.is_none();
        let round = round_slot.get_or_insert_with(|| ScanRound {
            id: Id::random(),
            started_at: Utc::now(),
            cancellation: ScanCancellation::new(),
            timer: None,
        });
        let round_id = round.id.clone();
        let cancellation = round.cancellation.clone();

        // The round lock is held while fanning out so a fast session cannot
        // observe a half-started round as complete.
        let mut started = 0;
        for entry in self.inner.endpoints.all_endpoints() {
            let weak = Arc::downgrade(&self.inner);
            let accepted = entry.controller().start_scan(
                self.inner.sink.clone(),
                cancellation.clone(),
                move |report| session_finished(weak, report),
            );
            if accepted {
                started += 1;
            }
        }

        if started == 0 {
            let still_running = self
                .inner
                .endpoints
                .all_endpoints()
                .iter()
                .any(|entry| entry.controller().is_scan_in_progress());
            if !fresh && still_running {
                debug!(round = %round_id, "No idle endpoint to start, round still running");
                return ScanStart::AlreadyRunning { round: round_id };
            }

            info!("No endpoint could start a discovery session");
            if let Some(round) = round_slot.take() {
                drop(round_slot);
                self.complete(round, FinishReason::NoEligibleEndpoints);
            }
            return ScanStart::NoEligibleEndpoints;
        }

        if fresh {
            let started_at = round.started_at;
            round.timer = self.arm_scan_timeout(&round_id);
            self.inner.status.send_replace(ScanStatus::Scanning {
                round: round_id.clone(),
                since: started_at,
            });
            self.publish(ScanEvent::ScanStarted {
                round: round_id.clone(),
                endpoints: started,
            });
            info!(round = %round_id, endpoints = started, "Discovery scan started");
        } else {
            info!(round = %round_id, endpoints = started, "Added sessions to running discovery scan");
        }

        ScanStart::Started {
            round: round_id,
            endpoints: started,
        }
    }

    /// Stop the active scan round
    ///
    /// The round is reported finished immediately and its cancellation is
    /// fired. Sessions are not aborted: participants in flight are expected
    /// to observe the cancellation and finish, and no further participant is
    /// started. Returns `false` if no round was active.
    pub fn stop_scan(&self) -> bool {
        let round = self.inner.round.lock().take();
        match round {
            Some(round) => {
                round.cancellation.cancel();
                self.complete(round, FinishReason::Stopped);
                true
            }
            None => {
                trace!("stop_scan without an active round");
                false
            }
        }
    }

    /// Finish the active round if no endpoint is still scanning
    ///
    /// Safe to call at any time and any number of times. Returns `true` only
    /// for the call that actually finished the round.
    pub fn check_all_finished(&self) -> bool {
        let mut round_slot = self.inner.round.lock();
        if round_slot.is_none() {
            trace!("No active round to finish");
            return false;
        }

        let pending = self
            .inner
            .endpoints
            .all_endpoints()
            .iter()
            .filter(|entry| entry.controller().is_scan_in_progress())
            .count();
        if pending > 0 {
            trace!(pending, "Endpoints still scanning");
            return false;
        }

        match round_slot.take() {
            Some(round) => {
                drop(round_slot);
                self.complete(round, FinishReason::Completed);
                true
            }
            None => false,
        }
    }

    fn finish_now(&self, reason: FinishReason) {
        let round = self.inner.round.lock().take();
        match round {
            Some(round) => {
                // Running sessions stop advancing once their round is over
                round.cancellation.cancel();
                self.complete(round, reason);
            }
            None => self.publish(ScanEvent::ScanFinished {
                round: Id::random(),
                reason,
            }),
        }
    }

    fn complete(&self, round: ScanRound, reason: FinishReason) {
        if let Some(timer) = round.timer {
            timer.abort();
        }
        let elapsed = Utc::now() - round.started_at;
        // Published before the status flips so waiters always find the event queued
        self.publish(ScanEvent::ScanFinished {
            round: round.id.clone(),
            reason,
        });
        self.inner.status.send_replace(ScanStatus::NotScanning);
        info!(
            round = %round.id,
            reason = ?reason,
            elapsed_ms = elapsed.num_milliseconds(),
            "Discovery scan finished"
        );
    }

    fn arm_scan_timeout(&self, round_id: &Id) -> Option<JoinHandle<()>> {
        let timeout = self.inner.scan_timeout?;
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let weak = Arc::downgrade(&self.inner);
        let round_id = round_id.clone();

        Some(handle.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(inner) = weak.upgrade() {
                ScanOrchestrator { inner }.expire_round(&round_id);
            }
        }))
    }

    fn expire_round(&self, round_id: &Id) {
        let mut round_slot = self.inner.round.lock();
        let current = round_slot.as_ref().map(|round| &round.id == round_id);
        if current != Some(true) {
            return;
        }
        if let Some(mut round) = round_slot.take() {
            drop(round_slot);
            warn!(round = %round_id, "Discovery scan timed out, stopping");
            round.cancellation.cancel();
            // The timer is the task running this code
            round.timer = None;
            self.complete(round, FinishReason::TimedOut);
        }
    }

    fn publish_type_change(&self, before: HashSet<ThingTypeUid>) {
        let after = self.supported_thing_types();
        if after != before {
            debug!(types = after.len(), "Supported thing types changed");
            self.publish(ScanEvent::SupportedTypesChanged(after));
        }
    }

    fn publish(&self, event: ScanEvent) {
        // No receivers is the normal case when nobody is watching
        let _ = self.inner.events.send(event);
    }
}

fn session_finished(inner: Weak<OrchestratorInner>, report: SessionReport) {
    let Some(inner) = inner.upgrade() else {
        debug!(endpoint = %report.endpoint, "Orchestrator gone, dropping session report");
        return;
    };
    let orchestrator = ScanOrchestrator { inner };
    orchestrator.publish(ScanEvent::EndpointFinished(report));
    orchestrator.check_all_finished();
}
