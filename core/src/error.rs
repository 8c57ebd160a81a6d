use std::sync::Arc;

use thiserror::Error;

use crate::{
    datasource::DatasourceKind,
    model::{AliasId, EntityId},
};

/// Error type for alias and datasource resolution.
///
/// Cloneable so that a single failed resolution can be handed to every caller joined on it.
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    /// The alias id is absent from the current definition table
    #[error("alias not found: {0}")]
    AliasNotFound(AliasId),

    #[error("entity not found: {0}")]
    EntityNotFound(EntityId),

    /// A datasource declaration which references neither an alias nor an entity
    #[error("{0:?} datasource references no entity")]
    IncompleteDatasource(DatasourceKind),

    /// The entity resolver failed. Never cached; the next request retries.
    #[error("failed to resolve alias {alias}: {cause:#}")]
    Resolver { alias: AliasId, cause: Arc<anyhow::Error> },
}

impl ResolutionError {
    pub fn resolver(alias: &AliasId, cause: anyhow::Error) -> Self { ResolutionError::Resolver { alias: alias.clone(), cause: Arc::new(cause) } }

    /// The alias this error concerns, if any
    pub fn alias_id(&self) -> Option<&AliasId> {
        match self {
            ResolutionError::AliasNotFound(alias) | ResolutionError::Resolver { alias, .. } => Some(alias),
            _ => None,
        }
    }
}

/// Error type for loading dashboard configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid dashboard configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// A table entry is stored under a key that differs from its own id
    #[error("{table} entry keyed {key} has id {id}")]
    MismatchedId { table: &'static str, key: String, id: String },
}
