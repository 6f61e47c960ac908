/*!
 * Thing identifiers and discovery results.
 *
 * A discovery result is the immutable description of a device found by a
 * participant. It is built once through [`DiscoveryResultBuilder`] and then
 * handed, unchanged, to the result sink.
 */
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use bridgescan_core::types::{Id, Metadata, Value};

use crate::error::{DiscoveryError, Result};

const SEPARATOR: char = ':';

fn validate_segment(segment: &str, uid: &str) -> Result<()> {
    let valid = !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DiscoveryError::invalid_uid(format!(
            "segment '{}' of '{}' must be non-empty and contain only [A-Za-z0-9_-]",
            segment, uid
        )))
    }
}

/// Identifies a kind of thing, as `binding:type`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingTypeUid {
    binding_id: String,
    type_id: String,
}

impl ThingTypeUid {
    /// Create a thing-type UID from its binding and type segments
    pub fn new(binding_id: &str, type_id: &str) -> Result<Self> {
        let uid = format!("{}{}{}", binding_id, SEPARATOR, type_id);
        validate_segment(binding_id, &uid)?;
        validate_segment(type_id, &uid)?;
        Ok(Self {
            binding_id: binding_id.to_string(),
            type_id: type_id.to_string(),
        })
    }

    /// The binding segment
    pub fn binding_id(&self) -> &str {
        &self.binding_id
    }

    /// The type segment
    pub fn type_id(&self) -> &str {
        &self.type_id
    }
}

impl fmt::Display for ThingTypeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.binding_id, SEPARATOR, self.type_id)
    }
}

impl FromStr for ThingTypeUid {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split(SEPARATOR).collect::<Vec<_>>().as_slice() {
            [binding_id, type_id] => Self::new(binding_id, type_id),
            _ => Err(DiscoveryError::invalid_uid(format!(
                "thing type '{}' must have the form binding:type",
                s
            ))),
        }
    }
}

impl TryFrom<String> for ThingTypeUid {
    type Error = DiscoveryError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ThingTypeUid> for String {
    fn from(uid: ThingTypeUid) -> Self {
        uid.to_string()
    }
}

/// Identifies a single thing, as `binding:type[:bridge...]:id`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ThingUid {
    thing_type: ThingTypeUid,
    bridge_path: Vec<String>,
    id: String,
}

impl ThingUid {
    /// Create a UID for a thing that is not attached to a bridge
    pub fn new(thing_type: &ThingTypeUid, id: &str) -> Result<Self> {
        validate_segment(id, id)?;
        Ok(Self {
            thing_type: thing_type.clone(),
            bridge_path: Vec::new(),
            id: id.to_string(),
        })
    }

    /// Create a UID for a thing reached through a bridge
    pub fn with_bridge(thing_type: &ThingTypeUid, bridge: &Id, id: &str) -> Result<Self> {
        let mut uid = Self::new(thing_type, id)?;
        for segment in bridge.as_str().split(SEPARATOR) {
            validate_segment(segment, bridge.as_str())?;
            uid.bridge_path.push(segment.to_string());
        }
        Ok(uid)
    }

    /// The thing type this UID belongs to
    pub fn thing_type_uid(&self) -> &ThingTypeUid {
        &self.thing_type
    }

    /// The bridge segments between the type and the id
    pub fn bridge_path(&self) -> &[String] {
        &self.bridge_path
    }

    /// The last segment, unique among things of the same type and bridge
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ThingUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.thing_type)?;
        for segment in &self.bridge_path {
            write!(f, "{}{}", SEPARATOR, segment)?;
        }
        write!(f, "{}{}", SEPARATOR, self.id)
    }
}

impl FromStr for ThingUid {
    type Err = DiscoveryError;

    fn from_str(s: &str) -> Result<Self> {
        let segments: Vec<&str> = s.split(SEPARATOR).collect();
        if segments.len() < 3 {
            return Err(DiscoveryError::invalid_uid(format!(
                "thing '{}' must have at least binding:type:id",
                s
            )));
        }
        let thing_type = ThingTypeUid::new(segments[0], segments[1])?;
        let last = segments.len() - 1;
        let mut uid = Self::new(&thing_type, segments[last])?;
        for segment in &segments[2..last] {
            validate_segment(segment, s)?;
            uid.bridge_path.push(segment.to_string());
        }
        Ok(uid)
    }
}

impl TryFrom<String> for ThingUid {
    type Error = DiscoveryError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<ThingUid> for String {
    fn from(uid: ThingUid) -> Self {
        uid.to_string()
    }
}

/// An immutable description of a discovered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    thing_uid: ThingUid,
    bridge: Option<Id>,
    label: String,
    properties: Metadata,
    representation_property: Option<String>,
    ttl: Option<Duration>,
    discovered_at: DateTime<Utc>,
}

impl DiscoveryResult {
    /// Start building a result for the given thing
    pub fn builder(thing_uid: ThingUid) -> DiscoveryResultBuilder {
        DiscoveryResultBuilder::new(thing_uid)
    }

    /// The discovered thing
    pub fn thing_uid(&self) -> &ThingUid {
        &self.thing_uid
    }

    /// The type of the discovered thing
    pub fn thing_type_uid(&self) -> &ThingTypeUid {
        self.thing_uid.thing_type_uid()
    }

    /// The endpoint the thing was found behind, if any
    pub fn bridge(&self) -> Option<&Id> {
        self.bridge.as_ref()
    }

    /// Human readable label
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Properties reported by the participant
    pub fn properties(&self) -> &Metadata {
        &self.properties
    }

    /// Name of the property that uniquely identifies the device
    pub fn representation_property(&self) -> Option<&str> {
        self.representation_property.as_deref()
    }

    /// How long the result stays valid without being rediscovered
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// When the participant produced this result
    pub fn discovered_at(&self) -> DateTime<Utc> {
        self.discovered_at
    }
}

/// Builder for [`DiscoveryResult`]
#[derive(Debug, Clone)]
pub struct DiscoveryResultBuilder {
    thing_uid: ThingUid,
    bridge: Option<Id>,
    label: Option<String>,
    properties: Metadata,
    representation_property: Option<String>,
    ttl: Option<Duration>,
}

impl DiscoveryResultBuilder {
    fn new(thing_uid: ThingUid) -> Self {
        Self {
            thing_uid,
            bridge: None,
            label: None,
            properties: Metadata::new(),
            representation_property: None,
            ttl: None,
        }
    }

    /// Set the endpoint the thing is reached through
    pub fn with_bridge(mut self, bridge: Id) -> Self {
        self.bridge = Some(bridge);
        self
    }

    /// Set the label
    pub fn with_label<S: Into<String>>(mut self, label: S) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Add a single property
    pub fn with_property<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Add several properties
    pub fn with_properties(mut self, properties: Metadata) -> Self {
        self.properties.extend(properties);
        self
    }

    /// Set the property that uniquely identifies the device
    pub fn with_representation_property<S: Into<String>>(mut self, property: S) -> Self {
        self.representation_property = Some(property.into());
        self
    }

    /// Set the time-to-live
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Finish the result, stamping the discovery time
    pub fn build(self) -> DiscoveryResult {
        if let Some(property) = &self.representation_property {
            if !self.properties.contains_key(property) {
                warn!(
                    thing = %self.thing_uid,
                    "Representation property '{}' is not among the result properties",
                    property
                );
            }
        }

        let label = self
            .label
            .unwrap_or_else(|| self.thing_uid.id().to_string());

        DiscoveryResult {
            thing_uid: self.thing_uid,
            bridge: self.bridge,
            label,
            properties: self.properties,
            representation_property: self.representation_property,
            ttl: self.ttl,
            discovered_at: Utc::now(),
        }
    }
}
