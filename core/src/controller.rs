use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    action_debug, action_info,
    broadcast::{ChangeBroadcast, IntoListener, ListenerGuard},
    cache::{AliasSource, ResolutionCache},
    config::{ControllerConfig, DashboardConfiguration},
    datasource::{DatasourceDeclaration, DatasourceExpander, ResolvedDatasource},
    equivalence::diff_tables,
    error::ResolutionError,
    filter::{FilterDefinition, KeyFilter},
    model::{AliasDefinition, AliasId, EntityInfo, FilterId, ResolvedAlias, StateParams},
    resolver::{EntityResolver, LookupOptions},
};

/// The alias and filter tables of a dashboard, plus its current state parameters
#[derive(Default)]
struct Definitions {
    aliases: RwLock<HashMap<AliasId, AliasDefinition>>,
    filters: RwLock<HashMap<FilterId, FilterDefinition>>,
    /// Runtime overrides of `filters`, keyed by the filter they replace
    user_filters: DashMap<FilterId, FilterDefinition>,
    params: RwLock<StateParams>,
}

impl Definitions {
    fn filter(&self, id: &FilterId) -> Option<FilterDefinition> {
        if let Some(filter) = self.user_filters.get(id) {
            return Some(filter.value().clone());
        }
        self.filters.read().expect("Failed to lock filters").get(id).cloned()
    }
}

impl AliasSource for Definitions {
    fn alias(&self, id: &AliasId) -> Option<AliasDefinition> { self.aliases.read().expect("Failed to lock aliases").get(id).cloned() }

    fn state_params(&self) -> StateParams { self.params.read().expect("Failed to lock state params").clone() }
}

/// Per-dashboard façade over alias and filter definitions.
///
/// Widgets ask the controller for resolved aliases and datasources, and listen for
/// [`AliasController::on_aliases_changed`] / [`AliasController::on_filters_changed`] to know when
/// to ask again. Resolution is delegated to a [`ResolutionCache`] shared by all widgets.
pub struct AliasController {
    definitions: Arc<Definitions>,
    cache: ResolutionCache,
    config: ControllerConfig,
    aliases_changed: ChangeBroadcast<Vec<AliasId>>,
    filters_changed: ChangeBroadcast<Vec<FilterId>>,
}

impl std::fmt::Display for AliasController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "AliasController") }
}

impl AliasController {
    pub fn new(resolver: Arc<dyn EntityResolver>, config: ControllerConfig) -> Self {
        let definitions = Arc::new(Definitions::default());
        let cache = ResolutionCache::new(resolver, definitions.clone());
        Self { definitions, cache, config, aliases_changed: ChangeBroadcast::new(), filters_changed: ChangeBroadcast::new() }
    }

    /// Create a controller with the stored alias and filter tables of a dashboard
    pub fn from_configuration(resolver: Arc<dyn EntityResolver>, dashboard: &DashboardConfiguration, config: ControllerConfig) -> Self {
        Self::new(resolver, config).with_aliases(dashboard.entity_aliases.values().cloned()).with_filters(dashboard.filters.values().cloned())
    }

    /// Load alias definitions without notifying anyone. Meant for construction.
    pub fn with_aliases(self, aliases: impl IntoIterator<Item = AliasDefinition>) -> Self {
        *self.definitions.aliases.write().expect("Failed to lock aliases") = aliases.into_iter().map(|a| (a.id.clone(), a)).collect();
        self
    }

    /// Load filter definitions without notifying anyone. Meant for construction.
    pub fn with_filters(self, filters: impl IntoIterator<Item = FilterDefinition>) -> Self {
        *self.definitions.filters.write().expect("Failed to lock filters") = filters.into_iter().map(|f| (f.id.clone(), f)).collect();
        self
    }

    pub fn with_state_params(self, params: StateParams) -> Self {
        *self.definitions.params.write().expect("Failed to lock state params") = params;
        self
    }

    pub fn config(&self) -> &ControllerConfig { &self.config }

    pub fn resolver(&self) -> &Arc<dyn EntityResolver> { self.cache.resolver() }

    pub fn cache(&self) -> &ResolutionCache { &self.cache }

    pub fn entity_aliases(&self) -> HashMap<AliasId, AliasDefinition> { self.definitions.aliases.read().expect("Failed to lock aliases").clone() }

    pub fn filters(&self) -> HashMap<FilterId, FilterDefinition> { self.definitions.filters.read().expect("Failed to lock filters").clone() }

    pub fn user_filters(&self) -> HashMap<FilterId, FilterDefinition> {
        self.definitions.user_filters.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    pub fn state_params(&self) -> StateParams { self.definitions.state_params() }

    /// Find an alias by its display name. The lowest id wins if several aliases share the name.
    pub fn entity_alias_id(&self, alias_name: &str) -> Option<AliasId> {
        let aliases = self.definitions.aliases.read().expect("Failed to lock aliases");
        aliases.values().filter(|alias| alias.alias == alias_name).map(|alias| alias.id.clone()).min()
    }

    /// The effective filter: the user override when present, else the dashboard definition
    pub fn filter_info(&self, filter_id: &FilterId) -> Option<FilterDefinition> { self.definitions.filter(filter_id) }

    /// The key filters of the effective filter, empty when the filter is unknown
    pub fn key_filters(&self, filter_id: &FilterId) -> Vec<KeyFilter> { self.filter_info(filter_id).map(|f| f.key_filters).unwrap_or_default() }

    /// Resolve an alias, sharing the in-flight resolution with any concurrent callers
    pub async fn alias_info(&self, alias_id: &AliasId) -> Result<ResolvedAlias, ResolutionError> {
        if self.definitions.alias(alias_id).is_none() {
            return Err(ResolutionError::AliasNotFound(alias_id.clone()));
        }
        self.cache.get(alias_id).await
    }

    /// The cached resolution, if any. Never triggers a resolution.
    pub fn instant_alias_info(&self, alias_id: &AliasId) -> Option<ResolvedAlias> { self.cache.peek(alias_id) }

    /// Forget the resolution of one alias so that the next lookup resolves it again
    pub fn set_alias_unresolved(&self, alias_id: &AliasId) { self.cache.invalidate(alias_id); }

    /// Replace the alias table. Aliases which were added, removed or modified have their cached
    /// resolutions discarded and are announced in a single notification.
    pub fn update_entity_aliases(&self, aliases: impl IntoIterator<Item = AliasDefinition>) -> Vec<AliasId> {
        let new: HashMap<AliasId, AliasDefinition> = aliases.into_iter().map(|a| (a.id.clone(), a)).collect();
        let changed = {
            let mut table = self.definitions.aliases.write().expect("Failed to lock aliases");
            let diff = diff_tables(&*table, &new);
            *table = new;
            diff.changed()
        };

        for alias_id in &changed {
            self.cache.reset(alias_id);
        }
        if !changed.is_empty() {
            action_info!(self, "aliases changed", "{:?}", changed);
            self.aliases_changed.send(changed.clone());
        }
        changed
    }

    /// Replace the filter table. User overrides of changed filters are dropped.
    pub fn update_filters(&self, filters: impl IntoIterator<Item = FilterDefinition>) -> Vec<FilterId> {
        let new: HashMap<FilterId, FilterDefinition> = filters.into_iter().map(|f| (f.id.clone(), f)).collect();
        let changed = {
            let mut table = self.definitions.filters.write().expect("Failed to lock filters");
            let diff = diff_tables(&*table, &new);
            *table = new;
            diff.changed()
        };

        for filter_id in &changed {
            self.definitions.user_filters.remove(filter_id);
        }
        if !changed.is_empty() {
            action_info!(self, "filters changed", "{:?}", changed);
            self.filters_changed.send(changed.clone());
        }
        changed
    }

    /// Override a filter at runtime. Returns false, without notifying, when the override is
    /// identical to the filter currently in effect.
    pub fn update_user_filter(&self, filter: FilterDefinition) -> bool {
        if self.filter_info(&filter.id).as_ref() == Some(&filter) {
            debug!("AliasController.update_user_filter: {} unchanged", filter.id);
            return false;
        }
        let filter_id = filter.id.clone();
        self.definitions.user_filters.insert(filter_id.clone(), filter);
        action_info!(self, "user filter", "{}", filter_id);
        self.filters_changed.send(vec![filter_id]);
        true
    }

    /// Re-resolve aliases, superseding any resolutions in flight for them.
    ///
    /// Without an explicit list every alias currently holding a resolved value is refreshed, and
    /// memoized device lookups are forgotten. Listeners are notified once, after all refreshes
    /// settled, unless nothing was refreshed.
    pub async fn refresh(&self, alias_ids: Option<Vec<AliasId>>) -> Vec<(AliasId, Result<ResolvedAlias, ResolutionError>)> {
        let alias_ids = alias_ids.unwrap_or_else(|| self.cache.invalidate_all());
        if alias_ids.is_empty() {
            return Vec::new();
        }
        let results = self.cache.refresh(&alias_ids).await;
        for (alias_id, result) in &results {
            if let Err(e) = result {
                warn!("AliasController.refresh: {} failed: {}", alias_id, e);
            }
        }
        action_info!(self, "refreshed", "{:?}", alias_ids);
        self.aliases_changed.send(alias_ids);
        results
    }

    /// Record new dashboard state parameters. State-bound aliases whose entity changed are reset
    /// and announced in a single notification.
    pub fn on_dashboard_state_changed(&self, params: StateParams) -> Vec<AliasId> {
        *self.definitions.params.write().expect("Failed to lock state params") = params.clone();
        let changed = self.cache.on_state_transition(&params);
        if !changed.is_empty() {
            action_info!(self, "state changed", "{:?}", changed);
            self.aliases_changed.send(changed.clone());
        }
        changed
    }

    /// Pin the current entity of a single-entity alias, for widgets that let the user pick one.
    /// Returns true, and notifies, only if the entity actually changed.
    pub fn update_current_alias_entity(&self, alias_id: &AliasId, entity: EntityInfo) -> bool {
        if !self.cache.set_current_entity(alias_id, entity) {
            return false;
        }
        action_debug!(self, "current entity", "{}", alias_id);
        self.aliases_changed.send(vec![alias_id.clone()]);
        true
    }

    /// The single entity an alias currently stands for
    pub async fn resolve_single_entity_info(&self, alias_id: &AliasId) -> Result<Option<EntityInfo>, ResolutionError> {
        let alias = self.alias_info(alias_id).await?;
        if let Some(entity) = alias.current_entity {
            return Ok(Some(entity));
        }
        let Some(filter) = alias.entity_filter else { return Ok(None) };
        self.resolver().resolve_entity_by_filter(&filter, LookupOptions::quiet()).await.map_err(|e| ResolutionError::resolver(alias_id, e))
    }

    /// Look up a device by id. Missing devices and lookup failures both yield `None`.
    pub async fn resolve_single_entity_info_for_device_id(&self, device_id: &str) -> Option<EntityInfo> { self.cache.get_device(device_id).await }

    pub async fn resolve_datasources(&self, declarations: &[DatasourceDeclaration], single_entity: bool, page_size: Option<i32>) -> Vec<ResolvedDatasource> {
        DatasourceExpander::new(self).resolve_datasources(declarations, single_entity, page_size).await
    }

    pub async fn resolve_alarm_source(&self, declaration: &DatasourceDeclaration) -> ResolvedDatasource {
        DatasourceExpander::new(self).resolve_alarm_source(declaration).await
    }

    /// Receive the ids of aliases whose resolution may have changed
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn on_aliases_changed(&self, listener: impl IntoListener<Vec<AliasId>>) -> ListenerGuard<Vec<AliasId>> { self.aliases_changed.listen(listener) }

    /// Receive the ids of filters whose effective definition may have changed
    #[must_use = "the listener is removed when the guard is dropped"]
    pub fn on_filters_changed(&self, listener: impl IntoListener<Vec<FilterId>>) -> ListenerGuard<Vec<FilterId>> { self.filters_changed.listen(listener) }
}
