//! Carrier registry.
//!
//! Every carrier is one [`CarrierMapping`] value: its layouts, how to tell them
//! apart, and how its records aggregate. New carriers are added by registering
//! a mapping, never by branching on carrier names.

mod builtin;

use crate::aggregation::AggregationProfile;
use crate::error::{IngestError, Result};
use crate::schema::{ColumnSelector, MappingDescriptor};
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tie-break between layouts whose signatures all match: the first sample row
/// whose `column` contains `contains` selects `descriptor`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
pub struct TieBreak {
    pub column: ColumnSelector,
    pub contains: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct CarrierMapping {
    #[schemars(description = "Carrier id used by the record and aggregation stores.")]
    pub id: i64,

    pub name: String,

    #[serde(default)]
    pub name_local: String,

    #[serde(default)]
    #[schemars(description = "Other spellings accepted when looking the carrier up by name.")]
    pub aliases: Vec<String>,

    pub descriptors: Vec<MappingDescriptor>,

    #[serde(default)]
    #[schemars(description = "Descriptor id used when no signature matches. Defaults to the first descriptor.")]
    pub default_descriptor: Option<String>,

    #[serde(default)]
    pub tie_breaks: Vec<TieBreak>,

    #[serde(default)]
    pub aggregation: AggregationProfile,
}

impl CarrierMapping {
    pub fn new(
        id: i64,
        name: impl Into<String>,
        name_local: impl Into<String>,
        aggregation: AggregationProfile,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            name_local: name_local.into(),
            aliases: Vec::new(),
            descriptors: Vec::new(),
            default_descriptor: None,
            tie_breaks: Vec::new(),
            aggregation,
        }
    }

    pub fn with_descriptor(mut self, descriptor: MappingDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn with_aliases<S: Into<String>>(mut self, aliases: impl IntoIterator<Item = S>) -> Self {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_default(mut self, descriptor_id: impl Into<String>) -> Self {
        self.default_descriptor = Some(descriptor_id.into());
        self
    }

    pub fn with_tie_break(mut self, tie_break: TieBreak) -> Self {
        self.tie_breaks.push(tie_break);
        self
    }

    /// Canonical name, local name or alias, compared trimmed and case-insensitively.
    pub fn answers_to(&self, name: &str) -> bool {
        let wanted = name.trim().to_lowercase();
        std::iter::once(&self.name)
            .chain(std::iter::once(&self.name_local))
            .chain(self.aliases.iter())
            .any(|candidate| !candidate.is_empty() && candidate.trim().to_lowercase() == wanted)
    }

    pub fn descriptor(&self, id: &str) -> Option<&MappingDescriptor> {
        self.descriptors.iter().find(|d| d.id == id)
    }

    /// The layout used when detection finds nothing.
    pub fn default_layout(&self) -> Option<&MappingDescriptor> {
        match &self.default_descriptor {
            Some(id) => self.descriptor(id),
            None => self.descriptors.first(),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.descriptors.is_empty() {
            return Err(IngestError::configuration(
                &self.name,
                "carrier has no mapping descriptors",
            ));
        }
        for (idx, descriptor) in self.descriptors.iter().enumerate() {
            descriptor.validate()?;
            if self.descriptors[..idx].iter().any(|d| d.id == descriptor.id) {
                return Err(IngestError::configuration(
                    &self.name,
                    format!("duplicate descriptor id '{}'", descriptor.id),
                ));
            }
        }
        if let Some(id) = &self.default_descriptor {
            if self.descriptor(id).is_none() {
                return Err(IngestError::configuration(
                    &self.name,
                    format!("default descriptor '{}' is not registered", id),
                ));
            }
        }
        for tie_break in &self.tie_breaks {
            if self.descriptor(&tie_break.descriptor).is_none() {
                return Err(IngestError::configuration(
                    &self.name,
                    format!("tie-break names unknown descriptor '{}'", tie_break.descriptor),
                ));
            }
        }
        Ok(())
    }
}

/// JSON form of a registry, loadable at process start.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct RegistryConfig {
    pub carriers: Vec<CarrierMapping>,
}

impl RegistryConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(RegistryConfig)
    }

    pub fn schema_as_json() -> Result<String> {
        Ok(serde_json::to_string_pretty(&Self::generate_json_schema())?)
    }
}

/// Validated, immutable set of carrier mappings.
#[derive(Debug, Clone)]
pub struct MappingRegistry {
    carriers: Vec<CarrierMapping>,
}

impl MappingRegistry {
    /// Validates every descriptor and stamps carrier names onto them.
    pub fn new(carriers: Vec<CarrierMapping>) -> Result<Self> {
        let mut carriers = carriers;
        for carrier in carriers.iter_mut() {
            for descriptor in carrier.descriptors.iter_mut() {
                if descriptor.carrier_name.is_empty() {
                    descriptor.carrier_name = carrier.name.clone();
                }
                if descriptor.carrier_name_local.is_empty() {
                    descriptor.carrier_name_local = carrier.name_local.clone();
                }
            }
            carrier.validate()?;
        }

        for (idx, carrier) in carriers.iter().enumerate() {
            if carriers[..idx].iter().any(|c| c.id == carrier.id) {
                return Err(IngestError::configuration(
                    &carrier.name,
                    format!("carrier id {} registered twice", carrier.id),
                ));
            }
        }

        debug!("Mapping registry built with {} carriers", carriers.len());
        Ok(Self { carriers })
    }

    pub fn from_config(config: RegistryConfig) -> Result<Self> {
        Self::new(config.carriers)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(RegistryConfig::from_json_file(path)?)
    }

    /// Registry of every carrier layout this crate knows about.
    pub fn builtin() -> Result<Self> {
        Self::new(builtin::carriers())
    }

    pub fn carrier(&self, name: &str) -> Result<&CarrierMapping> {
        self.carriers
            .iter()
            .find(|c| c.answers_to(name))
            .ok_or_else(|| IngestError::UnknownCarrier(name.to_string()))
    }

    pub fn carrier_by_id(&self, id: i64) -> Result<&CarrierMapping> {
        self.carriers
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| IngestError::UnknownCarrier(format!("id {}", id)))
    }

    pub fn carriers(&self) -> &[CarrierMapping] {
        &self.carriers
    }

    pub fn to_config(&self) -> RegistryConfig {
        RegistryConfig {
            carriers: self.carriers.clone(),
        }
    }
}
