/*!
 * Per-endpoint scan controller.
 *
 * A controller runs at most one scan session for its endpoint. A session
 * takes a snapshot of the registered participants and runs them strictly one
 * after another: each participant is started, its results are forwarded to
 * the sink as they arrive, and the next participant only starts once the
 * current one has finished, failed, panicked or timed out.
 */
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::runtime::Handle;
use tracing::{debug, info, warn, Instrument};

use bridgescan_core::logging::component_span;
use bridgescan_core::types::Id;
use bridgescan_core::utils::with_timeout;

use crate::cancel::ScanCancellation;
use crate::endpoint::DiscoveryEndpoint;
use crate::error::DiscoveryError;
use crate::participant::{DiscoveryListener, DiscoveryParticipant};
use crate::registry::ParticipantRegistry;
use crate::sink::ResultSink;

/// What a controller is doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No session; a new scan may start
    Idle,
    /// A session is working through its worklist
    Running {
        /// Session identifier
        session: Id,
        /// Participant currently in flight, if one has been started
        current: Option<Id>,
        /// Participants still waiting in the worklist
        remaining: usize,
    },
}

impl SessionState {
    /// Whether a session is active
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running { .. })
    }
}

/// How a single participant run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum ParticipantOutcome {
    /// The participant called `discovery_finished`
    Finished,
    /// The participant returned without signalling and dropped its listener
    Abandoned,
    /// The participant was deregistered after the session snapshot was taken
    Skipped,
    /// The participant returned an error
    Failed(String),
    /// The participant panicked
    Panicked,
    /// The participant did not finish within the participant timeout
    TimedOut,
    /// The endpoint was deregistered while the participant was running
    Interrupted,
}

/// One entry of a session report
#[derive(Debug, Clone, Serialize)]
pub struct ParticipantRun {
    /// The participant
    pub participant: Id,
    /// How the run ended
    pub outcome: ParticipantOutcome,
    /// Results forwarded to the sink during the run
    pub results: usize,
}

/// Summary of a finished session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Session identifier
    pub session: Id,
    /// The endpoint that was scanned
    pub endpoint: Id,
    /// Participant runs, in the order they happened
    pub runs: Vec<ParticipantRun>,
    /// Participants left in the worklist when the scan was cancelled
    pub not_run: usize,
    /// Whether the session stopped early because the scan was cancelled
    pub cancelled: bool,
    /// Whether the session stopped early because the endpoint went away
    pub interrupted: bool,
    /// Wall time of the session
    pub elapsed: Duration,
}

impl SessionReport {
    /// Total results forwarded during the session
    pub fn results(&self) -> usize {
        self.runs.iter().map(|run| run.results).sum()
    }
}

/// Drives scan sessions for one endpoint
#[derive(Debug)]
pub struct ScanController {
    endpoint: Arc<dyn DiscoveryEndpoint>,
    participants: Arc<ParticipantRegistry>,
    participant_timeout: Option<Duration>,
    state: Arc<Mutex<SessionState>>,
    shutdown: ScanCancellation,
}

impl ScanController {
    /// Create a controller for `endpoint`
    pub fn new(
        endpoint: Arc<dyn DiscoveryEndpoint>,
        participants: Arc<ParticipantRegistry>,
        participant_timeout: Option<Duration>,
    ) -> Self {
        Self {
            endpoint,
            participants,
            participant_timeout,
            state: Arc::new(Mutex::new(SessionState::Idle)),
            shutdown: ScanCancellation::new(),
        }
    }

    /// Start a session on the current runtime
    ///
    /// Returns `false` without doing anything if the endpoint has discovery
    /// disabled, a session is already running, the controller was shut down,
    /// or there is no Tokio runtime to run on. Otherwise the session runs in
    /// the background and `on_finished` is called exactly once with its
    /// report.
    pub fn start_scan<F>(
        &self,
        sink: Arc<dyn ResultSink>,
        cancellation: ScanCancellation,
        on_finished: F,
    ) -> bool
    where
        F: FnOnce(SessionReport) + Send + 'static,
    {
        let endpoint_id = self.endpoint.id().clone();

        if !self.endpoint.is_discovery_enabled() {
            debug!(endpoint = %endpoint_id, "Discovery disabled on endpoint, not scanning");
            return false;
        }
        if self.shutdown.is_cancelled() {
            debug!(endpoint = %endpoint_id, "Controller shut down, not scanning");
            return false;
        }
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                warn!(endpoint = %endpoint_id, "Cannot start scan outside a Tokio runtime: {}", e);
                return false;
            }
        };

        let session_id = Id::random();
        let worklist: VecDeque<Arc<dyn DiscoveryParticipant>> = {
            let mut state = self.state.lock();
            if state.is_running() {
                debug!(endpoint = %endpoint_id, "Scan already in progress on endpoint");
                return false;
            }
            let worklist: VecDeque<_> = self.participants.snapshot().into();
            *state = SessionState::Running {
                session: session_id.clone(),
                current: None,
                remaining: worklist.len(),
            };
            worklist
        };

        info!(
            endpoint = %endpoint_id,
            session = %session_id,
            participants = worklist.len(),
            "Starting discovery on {}",
            self.endpoint.label()
        );

        let session = Session {
            id: session_id,
            endpoint: self.endpoint.clone(),
            participants: self.participants.clone(),
            participant_timeout: self.participant_timeout,
            state: self.state.clone(),
            shutdown: self.shutdown.clone(),
            cancellation,
            sink,
            worklist,
        };
        let span = component_span("scan-session", Some(endpoint_id.as_str()));
        handle.spawn(session.run(on_finished).instrument(span));
        true
    }

    /// Whether a session is currently running
    pub fn is_scan_in_progress(&self) -> bool {
        self.state.lock().is_running()
    }

    /// The participant currently in flight, if any
    pub fn current_participant(&self) -> Option<Id> {
        match &*self.state.lock() {
            SessionState::Running { current, .. } => current.clone(),
            SessionState::Idle => None,
        }
    }

    /// Current state of the controller
    pub fn state(&self) -> SessionState {
        self.state.lock().clone()
    }

    /// The endpoint this controller scans
    pub fn endpoint(&self) -> &Arc<dyn DiscoveryEndpoint> {
        &self.endpoint
    }

    /// Stop the controller for good
    ///
    /// A running session stops waiting on its in-flight participant, closes
    /// that participant's listener and reports as interrupted. No new session
    /// can be started afterwards.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Whether [`ScanController::shutdown`] has been called
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

struct Session {
    id: Id,
    endpoint: Arc<dyn DiscoveryEndpoint>,
    participants: Arc<ParticipantRegistry>,
    participant_timeout: Option<Duration>,
    state: Arc<Mutex<SessionState>>,
    shutdown: ScanCancellation,
    cancellation: ScanCancellation,
    sink: Arc<dyn ResultSink>,
    worklist: VecDeque<Arc<dyn DiscoveryParticipant>>,
}

impl Session {
    async fn run<F>(mut self, on_finished: F)
    where
        F: FnOnce(SessionReport) + Send + 'static,
    {
        let started = Instant::now();
        let mut report = SessionReport {
            session: self.id.clone(),
            endpoint: self.endpoint.id().clone(),
            runs: Vec::new(),
            not_run: 0,
            cancelled: false,
            interrupted: false,
            elapsed: Duration::ZERO,
        };

        while let Some(participant) = self.worklist.pop_front() {
            if self.shutdown.is_cancelled() {
                report.interrupted = true;
                report.not_run = self.worklist.len() + 1;
                break;
            }
            if self.cancellation.is_cancelled() {
                debug!(session = %self.id, "Scan cancelled, not starting further participants");
                report.cancelled = true;
                report.not_run = self.worklist.len() + 1;
                break;
            }

            let participant_id = participant.id().clone();
            if !self.participants.contains(&participant_id) {
                debug!(participant = %participant_id, "Participant deregistered since scan start, skipping");
                report.runs.push(ParticipantRun {
                    participant: participant_id,
                    outcome: ParticipantOutcome::Skipped,
                    results: 0,
                });
                continue;
            }

            self.set_current(Some(participant_id.clone()));
            let run = self.invoke(participant).await;
            if run.outcome == ParticipantOutcome::Interrupted {
                report.interrupted = true;
            }
            report.runs.push(run);
            self.set_current(None);
        }

        report.elapsed = started.elapsed();
        *self.state.lock() = SessionState::Idle;

        info!(
            endpoint = %report.endpoint,
            session = %report.session,
            results = report.results(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Discovery on endpoint finished"
        );
        on_finished(report);
    }

    fn set_current(&self, current: Option<Id>) {
        let remaining = self.worklist.len();
        let mut state = self.state.lock();
        if let SessionState::Running {
            current: slot,
            remaining: left,
            ..
        } = &mut *state
        {
            *slot = current;
            *left = remaining;
        }
    }

    async fn invoke(&self, participant: Arc<dyn DiscoveryParticipant>) -> ParticipantRun {
        let participant_id = participant.id().clone();
        let endpoint_id = self.endpoint.id().clone();
        let (listener, gate, mut finished) = DiscoveryListener::new(
            endpoint_id.clone(),
            participant_id.clone(),
            self.sink.clone(),
            self.cancellation.clone(),
        );

        debug!(participant = %participant_id, "Starting participant");
        let endpoint = self.endpoint.clone();
        let mut call = tokio::spawn(async move { participant.start_discovery(endpoint, listener).await });

        let completion = async {
            tokio::select! {
                signal = &mut finished => match signal {
                    Ok(()) => ParticipantOutcome::Finished,
                    // Every listener clone is gone; the call's own result decides
                    Err(_) => call_outcome((&mut call).await),
                },
                joined = &mut call => match joined {
                    Ok(Ok(())) => match (&mut finished).await {
                        Ok(()) => ParticipantOutcome::Finished,
                        Err(_) => ParticipantOutcome::Abandoned,
                    },
                    other => call_outcome(other),
                },
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => ParticipantOutcome::Interrupted,
            waited = with_timeout(self.participant_timeout, completion) => match waited {
                Ok(outcome) => outcome,
                Err(_) => ParticipantOutcome::TimedOut,
            },
        };
        gate.close();

        match &outcome {
            ParticipantOutcome::Finished => {
                debug!(participant = %participant_id, results = gate.results(), "Participant finished");
            }
            ParticipantOutcome::Abandoned => {
                debug!(participant = %participant_id, "Participant returned without signalling completion");
            }
            ParticipantOutcome::Failed(message) => {
                let error = DiscoveryError::Participant {
                    participant: participant_id.clone(),
                    endpoint: endpoint_id.clone(),
                    message: message.clone(),
                };
                warn!("{}", error);
            }
            ParticipantOutcome::Panicked => {
                let error = DiscoveryError::ParticipantPanicked {
                    participant: participant_id.clone(),
                    endpoint: endpoint_id.clone(),
                };
                warn!("{}", error);
            }
            ParticipantOutcome::TimedOut => {
                call.abort();
                if let Some(timeout) = self.participant_timeout {
                    let error = DiscoveryError::ParticipantTimeout {
                        participant: participant_id.clone(),
                        endpoint: endpoint_id.clone(),
                        timeout,
                    };
                    warn!("{}", error);
                }
            }
            ParticipantOutcome::Interrupted => {
                call.abort();
                debug!(participant = %participant_id, "Endpoint removed while participant was running");
            }
            ParticipantOutcome::Skipped => {}
        }

        ParticipantRun {
            participant: participant_id,
            outcome,
            results: gate.results(),
        }
    }
}

/// Classify a participant call whose listener can no longer signal completion
fn call_outcome(
    joined: std::result::Result<crate::error::Result<()>, tokio::task::JoinError>,
) -> ParticipantOutcome {
    match joined {
        Ok(Ok(())) => ParticipantOutcome::Abandoned,
        Ok(Err(e)) => ParticipantOutcome::Failed(e.to_string()),
        Err(e) if e.is_panic() => ParticipantOutcome::Panicked,
        Err(e) => ParticipantOutcome::Failed(e.to_string()),
    }
}
