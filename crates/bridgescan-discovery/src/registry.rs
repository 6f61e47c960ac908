/*!
 * Participant and endpoint registries.
 *
 * Both registries are plain lock-guarded collections owned by one
 * orchestrator. Register and deregister may race with scans; scans only ever
 * work on snapshots.
 */
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::debug;

use bridgescan_core::types::Id;

use crate::controller::ScanController;
use crate::endpoint::DiscoveryEndpoint;
use crate::participant::DiscoveryParticipant;
use crate::thing::ThingTypeUid;

#[derive(Debug)]
struct RegisteredParticipant {
    participant: Arc<dyn DiscoveryParticipant>,
    /// Types claimed at registration, released again on deregistration
    claimed: HashSet<ThingTypeUid>,
}

#[derive(Debug, Default)]
struct ParticipantSet {
    participants: Vec<RegisteredParticipant>,
    claims: HashMap<ThingTypeUid, usize>,
}

/// The participants currently taking part in discovery
#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    inner: RwLock<ParticipantSet>,
}

impl ParticipantRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant
    ///
    /// Returns `false` if a participant with the same id is already registered.
    pub fn register(&self, participant: Arc<dyn DiscoveryParticipant>) -> bool {
        let mut inner = self.inner.write();
        let id = participant.id().clone();
        if inner.participants.iter().any(|p| p.participant.id() == &id) {
            debug!(participant = %id, "Participant already registered");
            return false;
        }

        let claimed = participant.supported_thing_types();
        for thing_type in &claimed {
            *inner.claims.entry(thing_type.clone()).or_insert(0) += 1;
        }
        inner.participants.push(RegisteredParticipant {
            participant,
            claimed,
        });
        debug!(participant = %id, "Registered discovery participant");
        true
    }

    /// Remove a participant, returning it if it was registered
    pub fn deregister(&self, id: &Id) -> Option<Arc<dyn DiscoveryParticipant>> {
        let mut inner = self.inner.write();
        let index = inner
            .participants
            .iter()
            .position(|p| p.participant.id() == id)?;
        let removed = inner.participants.remove(index);

        for thing_type in &removed.claimed {
            if let Some(count) = inner.claims.get_mut(thing_type) {
                *count -= 1;
                if *count == 0 {
                    inner.claims.remove(thing_type);
                }
            }
        }
        debug!(participant = %id, "Deregistered discovery participant");
        Some(removed.participant)
    }

    /// Copy of the registered participants, in registration order
    pub fn snapshot(&self) -> Vec<Arc<dyn DiscoveryParticipant>> {
        self.inner
            .read()
            .participants
            .iter()
            .map(|p| p.participant.clone())
            .collect()
    }

    /// Whether a participant with this id is registered
    pub fn contains(&self, id: &Id) -> bool {
        self.inner
            .read()
            .participants
            .iter()
            .any(|p| p.participant.id() == id)
    }

    /// Union of the thing types claimed by registered participants
    pub fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        self.inner.read().claims.keys().cloned().collect()
    }

    /// Number of registered participants
    pub fn len(&self) -> usize {
        self.inner.read().participants.len()
    }

    /// Whether no participant is registered
    pub fn is_empty(&self) -> bool {
        self.inner.read().participants.is_empty()
    }
}

/// A registered endpoint together with its scan controller
#[derive(Debug)]
pub struct EndpointEntry {
    endpoint: Arc<dyn DiscoveryEndpoint>,
    controller: ScanController,
}

impl EndpointEntry {
    /// The endpoint
    pub fn endpoint(&self) -> &Arc<dyn DiscoveryEndpoint> {
        &self.endpoint
    }

    /// The controller that scans this endpoint
    pub fn controller(&self) -> &ScanController {
        &self.controller
    }
}

/// The endpoints currently available for scanning
#[derive(Debug)]
pub struct EndpointRegistry {
    participants: Arc<ParticipantRegistry>,
    participant_timeout: Option<Duration>,
    endpoints: RwLock<BTreeMap<Id, Arc<EndpointEntry>>>,
}

impl EndpointRegistry {
    /// Create an empty registry whose controllers draw on `participants`
    pub fn new(participants: Arc<ParticipantRegistry>, participant_timeout: Option<Duration>) -> Self {
        Self {
            participants,
            participant_timeout,
            endpoints: RwLock::new(BTreeMap::new()),
        }
    }

    /// Add an endpoint and create its scan controller
    ///
    /// Returns `false` if an endpoint with the same id is already registered.
    pub fn register(&self, endpoint: Arc<dyn DiscoveryEndpoint>) -> bool {
        let mut endpoints = self.endpoints.write();
        let id = endpoint.id().clone();
        if endpoints.contains_key(&id) {
            debug!(endpoint = %id, "Endpoint already registered");
            return false;
        }

        let controller = ScanController::new(
            endpoint.clone(),
            self.participants.clone(),
            self.participant_timeout,
        );
        endpoints.insert(id.clone(), Arc::new(EndpointEntry { endpoint, controller }));
        debug!(endpoint = %id, "Registered discovery endpoint");
        true
    }

    /// Remove an endpoint and shut its controller down
    pub fn deregister(&self, id: &Id) -> Option<Arc<EndpointEntry>> {
        let removed = self.endpoints.write().remove(id)?;
        removed.controller.shutdown();
        debug!(endpoint = %id, "Deregistered discovery endpoint");
        Some(removed)
    }

    /// Look up a registered endpoint
    pub fn get(&self, id: &Id) -> Option<Arc<EndpointEntry>> {
        self.endpoints.read().get(id).cloned()
    }

    /// Copy of the registered endpoints, ordered by id
    pub fn all_endpoints(&self) -> Vec<Arc<EndpointEntry>> {
        self.endpoints.read().values().cloned().collect()
    }

    /// Number of registered endpoints
    pub fn len(&self) -> usize {
        self.endpoints.read().len()
    }

    /// Whether no endpoint is registered
    pub fn is_empty(&self) -> bool {
        self.endpoints.read().is_empty()
    }
}
