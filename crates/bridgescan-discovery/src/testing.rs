//! Participants, endpoints and sinks shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use bridgescan_core::types::Id;

use crate::endpoint::DiscoveryEndpoint;
use crate::error::{DiscoveryError, Result};
use crate::participant::{DiscoveryListener, DiscoveryParticipant};
use crate::sink::ResultSink;
use crate::thing::{DiscoveryResult, ThingTypeUid, ThingUid};

pub fn thing_type(name: &str) -> ThingTypeUid {
    ThingTypeUid::new("test", name).unwrap()
}

fn thing_types(names: &[&str]) -> HashSet<ThingTypeUid> {
    names.iter().map(|name| thing_type(name)).collect()
}

pub fn result_for(type_name: &str, endpoint: &str, id: &str) -> DiscoveryResult {
    let bridge = Id::from(endpoint);
    let uid = ThingUid::with_bridge(&thing_type(type_name), &bridge, id).unwrap();
    DiscoveryResult::builder(uid).with_bridge(bridge).build()
}

pub fn widget_result(endpoint: &str, id: &str) -> DiscoveryResult {
    result_for("widget", endpoint, id)
}

fn notify_for(map: &Mutex<HashMap<Id, Arc<Notify>>>, id: &Id) -> Arc<Notify> {
    map.lock().entry(id.clone()).or_default().clone()
}

#[derive(Debug)]
pub struct TestEndpoint {
    id: Id,
    enabled: bool,
}

impl TestEndpoint {
    pub fn new(id: &str) -> Self {
        Self {
            id: Id::from(id),
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl DiscoveryEndpoint for TestEndpoint {
    fn id(&self) -> &Id {
        &self.id
    }

    fn is_discovery_enabled(&self) -> bool {
        self.enabled
    }
}

#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<Vec<DiscoveryResult>>,
}

impl CollectingSink {
    pub fn results(&self) -> Vec<DiscoveryResult> {
        self.results.lock().clone()
    }

    pub fn ids(&self) -> Vec<String> {
        self.results
            .lock()
            .iter()
            .map(|r| r.thing_uid().id().to_string())
            .collect()
    }
}

impl ResultSink for CollectingSink {
    fn report(&self, result: DiscoveryResult) {
        self.results.lock().push(result);
    }
}

/// Reports a fixed list of things on every endpoint and finishes
#[derive(Debug)]
pub struct StaticParticipant {
    id: Id,
    types: Vec<String>,
    results: Vec<String>,
    invocations: AtomicUsize,
}

impl StaticParticipant {
    pub fn new(id: &str, types: &[&str]) -> Self {
        Self {
            id: Id::from(id),
            types: types.iter().map(|t| t.to_string()).collect(),
            results: Vec::new(),
            invocations: AtomicUsize::new(0),
        }
    }

    pub fn with_results(mut self, ids: &[&str]) -> Self {
        self.results = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DiscoveryParticipant for StaticParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        self.types.iter().map(|t| thing_type(t)).collect()
    }

    async fn start_discovery(
        &self,
        endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let type_name = self.types.first().map(String::as_str).unwrap_or("widget");
        for id in &self.results {
            listener.thing_discovered(result_for(type_name, endpoint.id().as_str(), id));
        }
        listener.discovery_finished();
        Ok(())
    }
}

/// Blocks on each endpoint until the test releases it
#[derive(Debug)]
pub struct GatedParticipant {
    id: Id,
    types: HashSet<ThingTypeUid>,
    results: HashMap<Id, String>,
    gates: Mutex<HashMap<Id, Arc<Notify>>>,
    started: Mutex<HashMap<Id, Arc<Notify>>>,
}

impl GatedParticipant {
    pub fn new(id: &str, types: &[&str]) -> Self {
        Self {
            id: Id::from(id),
            types: thing_types(types),
            results: HashMap::new(),
            gates: Mutex::new(HashMap::new()),
            started: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_result(mut self, endpoint: &str, thing: &str) -> Self {
        self.results.insert(Id::from(endpoint), thing.to_string());
        self
    }

    pub fn release(&self, endpoint: &Id) {
        notify_for(&self.gates, endpoint).notify_one();
    }

    pub async fn wait_started(&self, endpoint: &Id) {
        notify_for(&self.started, endpoint).notified().await;
    }
}

#[async_trait]
impl DiscoveryParticipant for GatedParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        self.types.clone()
    }

    async fn start_discovery(
        &self,
        endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        let endpoint_id = endpoint.id().clone();
        notify_for(&self.started, &endpoint_id).notify_one();
        notify_for(&self.gates, &endpoint_id).notified().await;

        if let Some(thing) = self.results.get(&endpoint_id) {
            listener.thing_discovered(widget_result(endpoint_id.as_str(), thing));
        }
        listener.discovery_finished();
        Ok(())
    }
}

/// Shared counters for participants that record how many run at once
#[derive(Debug, Clone, Default)]
pub struct ConcurrencyProbe {
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
    log: Arc<Mutex<Vec<String>>>,
}

impl ConcurrencyProbe {
    pub fn participant(&self, id: &str) -> ProbeParticipant {
        ProbeParticipant {
            id: Id::from(id),
            probe: self.clone(),
        }
    }

    pub fn order(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}

#[derive(Debug)]
pub struct ProbeParticipant {
    id: Id,
    probe: ConcurrencyProbe,
}

#[async_trait]
impl DiscoveryParticipant for ProbeParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        _endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        let running = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(running, Ordering::SeqCst);
        self.probe.log.lock().push(self.id.to_string());

        // Finish from a separate task to exercise handed-off listeners
        let in_flight = self.probe.in_flight.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            in_flight.fetch_sub(1, Ordering::SeqCst);
            listener.discovery_finished();
        });
        Ok(())
    }
}

/// Never finishes; holds its listener until the run is torn down
#[derive(Debug)]
pub struct SilentParticipant {
    id: Id,
    started: Notify,
}

impl SilentParticipant {
    pub fn new(id: &str) -> Self {
        Self {
            id: Id::from(id),
            started: Notify::new(),
        }
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl DiscoveryParticipant for SilentParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        _endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        self.started.notify_one();
        let _held = listener;
        std::future::pending::<()>().await;
        Ok(())
    }
}

/// Waits for the scan to be stopped, then finishes
#[derive(Debug)]
pub struct CooperativeParticipant {
    id: Id,
    started: Notify,
}

impl CooperativeParticipant {
    pub fn new(id: &str) -> Self {
        Self {
            id: Id::from(id),
            started: Notify::new(),
        }
    }

    pub async fn wait_started(&self) {
        self.started.notified().await;
    }
}

#[async_trait]
impl DiscoveryParticipant for CooperativeParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        _endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        self.started.notify_one();
        listener.cancelled().await;
        listener.discovery_finished();
        Ok(())
    }
}

#[derive(Debug)]
pub struct FailingParticipant {
    id: Id,
}

impl FailingParticipant {
    pub fn new(id: &str) -> Self {
        Self { id: Id::from(id) }
    }
}

#[async_trait]
impl DiscoveryParticipant for FailingParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        endpoint: Arc<dyn DiscoveryEndpoint>,
        _listener: DiscoveryListener,
    ) -> Result<()> {
        Err(DiscoveryError::communication(format!(
            "no response from {}",
            endpoint.id()
        )))
    }
}

#[derive(Debug)]
pub struct PanickingParticipant {
    id: Id,
}

impl PanickingParticipant {
    pub fn new(id: &str) -> Self {
        Self { id: Id::from(id) }
    }
}

#[async_trait]
impl DiscoveryParticipant for PanickingParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        _endpoint: Arc<dyn DiscoveryEndpoint>,
        _listener: DiscoveryListener,
    ) -> Result<()> {
        panic!("register map decoding bug");
    }
}

/// Returns without ever calling `discovery_finished`
#[derive(Debug)]
pub struct AbandoningParticipant {
    id: Id,
}

impl AbandoningParticipant {
    pub fn new(id: &str) -> Self {
        Self { id: Id::from(id) }
    }
}

#[async_trait]
impl DiscoveryParticipant for AbandoningParticipant {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        thing_types(&["widget"])
    }

    async fn start_discovery(
        &self,
        _endpoint: Arc<dyn DiscoveryEndpoint>,
        _listener: DiscoveryListener,
    ) -> Result<()> {
        Ok(())
    }
}
