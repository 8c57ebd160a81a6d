use async_trait::async_trait;

use crate::{
    datasource::{AlarmFilter, AlarmFilterConfig},
    model::{AliasDefinition, AliasFilter, EntityFilter, EntityId, EntityInfo, ResolvedAlias, StateParams},
};

/// Options for [`EntityResolver::resolve_entity_by_filter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupOptions {
    /// Do not surface a loading indicator for this lookup
    pub ignore_loading: bool,
    /// Report lookup failures as "no entity" rather than as an error
    pub ignore_errors: bool,
}

impl LookupOptions {
    pub fn quiet() -> Self { Self { ignore_loading: true, ignore_errors: true } }
}

/// The backend which turns alias filters into concrete entity references.
///
/// Implementations own all I/O, timeouts and retry policy. The resolution cache never retries on
/// its own; it simply does not remember failures.
#[async_trait]
pub trait EntityResolver: Send + Sync {
    /// Resolve an alias against the given state parameters
    async fn resolve_alias(&self, alias: &AliasDefinition, params: &StateParams) -> anyhow::Result<ResolvedAlias>;

    /// Find one entity matching `filter`, or `None` when nothing matches
    async fn resolve_entity_by_filter(&self, filter: &EntityFilter, opts: LookupOptions) -> anyhow::Result<Option<EntityInfo>>;

    /// The entity a state-bound filter points at under `params`
    fn state_entity_id(&self, filter: &AliasFilter, params: &StateParams) -> Option<EntityId> { filter.state_entity_id(params) }

    /// Normalize an alarm filter configuration. Synchronous, no I/O.
    fn resolve_alarm_filter(&self, config: &AlarmFilterConfig, strict: bool) -> AlarmFilter { AlarmFilter::from_config(config, strict) }
}
