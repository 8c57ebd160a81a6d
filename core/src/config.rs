use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::ConfigError,
    filter::FilterDefinition,
    model::{AliasDefinition, AliasId, FilterId},
};

/// Page size used for multi-entity datasources which do not carry their own page link
pub const DEFAULT_PAGE_SIZE: i32 = 1024;

/// Display labels for datasources that have no entity to name them after
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatasourceLabels {
    pub function: String,
    pub entity_count: String,
    pub alarm_count: String,
    /// Shown for datasources whose alias could not be bound to an entity
    pub unresolved: String,
}

impl Default for DatasourceLabels {
    fn default() -> Self {
        Self {
            function: "Function".to_owned(),
            entity_count: "Count".to_owned(),
            alarm_count: "Alarm count".to_owned(),
            unresolved: "Unresolved".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerConfig {
    pub default_page_size: i32,
    pub labels: DatasourceLabels,
}

impl Default for ControllerConfig {
    fn default() -> Self { Self { default_page_size: DEFAULT_PAGE_SIZE, labels: DatasourceLabels::default() } }
}

impl ControllerConfig {
    /// The configured page size, or [`DEFAULT_PAGE_SIZE`] when it is not positive
    pub fn page_size(&self, requested: Option<i32>) -> i32 {
        match requested {
            Some(size) if size > 0 => size,
            _ if self.default_page_size > 0 => self.default_page_size,
            _ => DEFAULT_PAGE_SIZE,
        }
    }
}

/// The alias and filter tables of a stored dashboard
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfiguration {
    pub entity_aliases: BTreeMap<AliasId, AliasDefinition>,
    pub filters: BTreeMap<FilterId, FilterDefinition>,
}

impl DashboardConfiguration {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some((key, alias)) = self.entity_aliases.iter().find(|(key, alias)| **key != alias.id) {
            return Err(ConfigError::MismatchedId { table: "entityAliases", key: key.to_string(), id: alias.id.to_string() });
        }
        if let Some((key, filter)) = self.filters.iter().find(|(key, filter)| **key != filter.id) {
            return Err(ConfigError::MismatchedId { table: "filters", key: key.to_string(), id: filter.id.to_string() });
        }
        Ok(())
    }
}
