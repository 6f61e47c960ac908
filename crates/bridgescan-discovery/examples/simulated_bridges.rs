//! Scans two simulated Modbus bridges with two device families.
//!
//! Run with `RUST_LOG=debug cargo run --example simulated_bridges` to watch
//! the per-endpoint sessions interleave.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use bridgescan_core::config::ConfigBuilder;
use bridgescan_core::types::Id;
use bridgescan_discovery::{
    ChannelSink, DiscoveryEndpoint, DiscoveryListener, DiscoveryParticipant, DiscoveryResult,
    Result, ScanEvent, ScanOrchestrator, ThingTypeUid, ThingUid,
};

/// A bridge with a fixed map of unit id to device family
#[derive(Debug)]
struct SimulatedBridge {
    id: Id,
    label: String,
    units: BTreeMap<u8, &'static str>,
}

impl SimulatedBridge {
    fn new(id: &str, label: &str, units: &[(u8, &'static str)]) -> Self {
        Self {
            id: Id::from(id),
            label: label.to_string(),
            units: units.iter().copied().collect(),
        }
    }
}

impl DiscoveryEndpoint for SimulatedBridge {
    fn id(&self) -> &Id {
        &self.id
    }

    fn is_discovery_enabled(&self) -> bool {
        true
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

/// Polls every unit id on a bridge and reports the ones of its family
#[derive(Debug)]
struct UnitProbe {
    id: Id,
    family: &'static str,
    thing_type: ThingTypeUid,
    poll_delay: Duration,
    units: BTreeMap<Id, BTreeMap<u8, &'static str>>,
}

impl UnitProbe {
    fn new(family: &'static str, poll_delay: Duration, bridges: &[&SimulatedBridge]) -> Result<Self> {
        Ok(Self {
            id: Id::from(format!("{}-probe", family)),
            family,
            thing_type: ThingTypeUid::new("modbus", family)?,
            poll_delay,
            units: bridges
                .iter()
                .map(|bridge| (bridge.id.clone(), bridge.units.clone()))
                .collect(),
        })
    }

    fn result(&self, bridge: &Id, unit: u8) -> Result<DiscoveryResult> {
        let uid = ThingUid::with_bridge(&self.thing_type, bridge, &format!("unit{}", unit))?;
        Ok(DiscoveryResult::builder(uid)
            .with_bridge(bridge.clone())
            .with_label(format!("{} (unit {})", self.family, unit))
            .with_property("unitId", i32::from(unit))
            .with_representation_property("unitId")
            .build())
    }
}

#[async_trait]
impl DiscoveryParticipant for UnitProbe {
    fn id(&self) -> &Id {
        &self.id
    }

    fn supported_thing_types(&self) -> HashSet<ThingTypeUid> {
        HashSet::from([self.thing_type.clone()])
    }

    async fn start_discovery(
        &self,
        endpoint: Arc<dyn DiscoveryEndpoint>,
        listener: DiscoveryListener,
    ) -> Result<()> {
        let units = self.units.get(endpoint.id()).cloned().unwrap_or_default();
        for (unit, family) in units {
            if listener.is_cancelled() {
                break;
            }
            tokio::time::sleep(self.poll_delay).await;
            if family == self.family {
                listener.thing_discovered(self.result(endpoint.id(), unit)?);
            }
        }
        listener.discovery_finished();
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // BRIDGESCAN__DISCOVERY__PARTICIPANT_TIMEOUT_MS and friends override the file
    let config = ConfigBuilder::new()
        .with_config_file("bridgescan.toml")
        .with_environment_prefix("BRIDGESCAN")
        .build()?;
    bridgescan_core::init_with_config(&config)?;

    let gateway = SimulatedBridge::new(
        "tcp-gateway",
        "TCP gateway 192.168.1.50:502",
        &[(1, "meter"), (2, "inverter"), (3, "meter")],
    );
    let serial = SimulatedBridge::new("rtu-line", "RS-485 line /dev/ttyUSB0", &[(7, "inverter")]);

    let (sink, mut results) = ChannelSink::new();
    let orchestrator = ScanOrchestrator::with_config(Arc::new(sink), &config.discovery)?;

    orchestrator.register_participant(Arc::new(UnitProbe::new(
        "meter",
        Duration::from_millis(40),
        &[&gateway, &serial],
    )?));
    orchestrator.register_participant(Arc::new(UnitProbe::new(
        "inverter",
        Duration::from_millis(25),
        &[&gateway, &serial],
    )?));
    orchestrator.register_endpoint(Arc::new(gateway));
    orchestrator.register_endpoint(Arc::new(serial));

    let mut events = orchestrator.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ScanEvent::EndpointFinished(report) => match serde_json::to_string(&report) {
                    Ok(json) => info!("Session report: {}", json),
                    Err(e) => info!("Unserializable session report: {}", e),
                },
                ScanEvent::ScanFinished { round, reason } => {
                    info!(round = %round, reason = ?reason, "Scan finished");
                }
                _ => {}
            }
        }
    });

    info!("Supported thing types: {:?}", orchestrator.supported_thing_types());
    let start = orchestrator.start_scan();
    info!("Scan start: {:?}", start);
    orchestrator.wait_until_finished().await;

    // The orchestrator holds the sink; drop it so the receiver drains and ends
    drop(orchestrator);
    while let Some(result) = results.recv().await {
        info!(
            thing = %result.thing_uid(),
            label = result.label(),
            "Discovered"
        );
    }

    Ok(())
}
