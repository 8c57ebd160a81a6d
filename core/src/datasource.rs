//! Datasource declarations and their expansion into resolved datasources.

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::{
    action_debug, action_warn,
    controller::AliasController,
    error::ResolutionError,
    filter::{EntityKey, KeyFilter},
    model::{AliasId, EntityFilter, EntityId, EntityInfo, FilterId},
    resolver::LookupOptions,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOrder {
    pub key: EntityKey,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageLink {
    pub page_size: i32,
    pub page: i32,
    #[serde(default)]
    pub text_search: Option<String>,
    #[serde(default)]
    pub sort_order: Option<SortOrder>,
}

impl PageLink {
    pub fn new(page_size: i32) -> Self { Self { page_size, page: 0, text_search: None, sort_order: None } }

    /// The page link of a datasource bound to exactly one entity
    pub fn single_entity() -> Self { Self::new(1) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSearchStatus {
    Any,
    Active,
    Cleared,
    Ack,
    Unack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    Critical,
    Major,
    Minor,
    Warning,
    Indeterminate,
}

/// Alarm filter as authored in a widget
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AlarmFilterConfig {
    pub status_list: Vec<AlarmSearchStatus>,
    pub severity_list: Vec<AlarmSeverity>,
    pub type_list: Vec<String>,
    pub search_propagated_alarms: bool,
}

/// Normalized alarm filter. Empty lists match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmFilter {
    pub status_list: Vec<AlarmSearchStatus>,
    pub severity_list: Vec<AlarmSeverity>,
    pub type_list: Vec<String>,
    pub search_propagated_alarms: bool,
}

fn unique<T: PartialEq + Clone>(items: impl IntoIterator<Item = T>) -> Vec<T> {
    let mut out: Vec<T> = Vec::new();
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

impl AlarmFilter {
    /// Lists are de-duplicated and blank alarm types dropped. Outside of `strict` mode a status
    /// list containing `ANY` collapses to the empty (match all) list.
    pub fn from_config(config: &AlarmFilterConfig, strict: bool) -> Self {
        let mut status_list = unique(config.status_list.iter().copied());
        if !strict && status_list.contains(&AlarmSearchStatus::Any) {
            status_list.clear();
        }
        Self {
            status_list,
            severity_list: unique(config.severity_list.iter().copied()),
            type_list: unique(config.type_list.iter().map(|t| t.trim()).filter(|t| !t.is_empty()).map(str::to_owned)),
            search_propagated_alarms: config.search_propagated_alarms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DatasourceKind {
    Function,
    Device,
    Entity,
    EntityCount,
    AlarmCount,
}

impl DatasourceKind {
    /// Kinds which reference no entity and are named after their type
    pub fn is_function_like(&self) -> bool { matches!(self, DatasourceKind::Function | DatasourceKind::EntityCount | DatasourceKind::AlarmCount) }
}

/// A widget's declared data source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceDeclaration {
    #[serde(rename = "type")]
    pub kind: DatasourceKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub entity_alias_id: Option<AliasId>,
    #[serde(default)]
    pub filter_id: Option<FilterId>,
    #[serde(default)]
    pub device_id: Option<String>,
    /// Static binding to a concrete entity, for datasources that predate aliases
    #[serde(default)]
    pub entity_id: Option<EntityId>,
    #[serde(default)]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub page_link: Option<PageLink>,
    #[serde(default)]
    pub alarm_filter_config: Option<AlarmFilterConfig>,
}

impl DatasourceDeclaration {
    pub fn new(kind: DatasourceKind) -> Self {
        Self {
            kind,
            name: None,
            entity_alias_id: None,
            filter_id: None,
            device_id: None,
            entity_id: None,
            entity_name: None,
            page_link: None,
            alarm_filter_config: None,
        }
    }

    pub fn function() -> Self { Self::new(DatasourceKind::Function) }
    pub fn entity_count() -> Self { Self::new(DatasourceKind::EntityCount) }
    pub fn alarm_count() -> Self { Self::new(DatasourceKind::AlarmCount) }

    pub fn alias(alias_id: impl Into<AliasId>) -> Self { Self { entity_alias_id: Some(alias_id.into()), ..Self::new(DatasourceKind::Entity) } }

    pub fn device(device_id: impl Into<String>) -> Self { Self { device_id: Some(device_id.into()), ..Self::new(DatasourceKind::Device) } }

    pub fn entity(entity_id: EntityId) -> Self { Self { entity_id: Some(entity_id), ..Self::new(DatasourceKind::Entity) } }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_filter(mut self, filter_id: impl Into<FilterId>) -> Self {
        self.filter_id = Some(filter_id.into());
        self
    }

    pub fn with_page_link(mut self, page_link: PageLink) -> Self {
        self.page_link = Some(page_link);
        self
    }

    pub fn with_alarm_filter(mut self, config: AlarmFilterConfig) -> Self {
        self.alarm_filter_config = Some(config);
        self
    }

    fn explicit_name(&self) -> Option<&str> { self.name.as_deref().filter(|name| !name.is_empty()) }
}

/// A declaration with its alias, filter and display names resolved
#[derive(Debug, Clone)]
pub struct ResolvedDatasource {
    pub declaration: DatasourceDeclaration,
    pub name: String,
    pub alias_name: Option<String>,
    pub entity_id: Option<EntityId>,
    pub entity_name: Option<String>,
    pub entity_label: Option<String>,
    pub entity_filter: Option<EntityFilter>,
    pub key_filters: Vec<KeyFilter>,
    pub page_link: Option<PageLink>,
    pub alarm_filter: Option<AlarmFilter>,
    /// The alias is state bound and its state parameter is currently unset
    pub unresolved_state_entity: bool,
    /// Set when resolving the declaration failed. Meant to be surfaced as a transient, widget
    /// scoped notification; the datasource itself renders as unresolved.
    pub resolution_error: Option<ResolutionError>,
}

impl ResolvedDatasource {
    fn new(declaration: DatasourceDeclaration) -> Self {
        Self {
            name: declaration.explicit_name().unwrap_or_default().to_owned(),
            entity_name: declaration.entity_name.clone(),
            declaration,
            alias_name: None,
            entity_id: None,
            entity_label: None,
            entity_filter: None,
            key_filters: Vec::new(),
            page_link: None,
            alarm_filter: None,
            unresolved_state_entity: false,
            resolution_error: None,
        }
    }

    pub fn kind(&self) -> DatasourceKind { self.declaration.kind }

    pub fn is_resolved(&self) -> bool { self.entity_filter.is_some() }

    fn apply_entity(&mut self, entity: &EntityInfo) {
        self.entity_id = Some(entity.id.clone());
        self.entity_name = Some(entity.name.clone());
        self.entity_label = entity.label.clone();
        self.entity_filter = Some(EntityFilter::single(entity.id.clone()));
        if self.declaration.explicit_name().is_none() {
            self.name = entity.name.clone();
        }
    }

    fn name_if_unset(&mut self, name: &str) {
        if self.name.is_empty() {
            self.name = name.to_owned();
        }
    }
}

/// Expands datasource declarations against an [`AliasController`]
pub struct DatasourceExpander<'a> {
    controller: &'a AliasController,
}

impl<'a> DatasourceExpander<'a> {
    pub fn new(controller: &'a AliasController) -> Self { Self { controller } }

    /// Resolve every declaration concurrently (only the first when `single_entity`).
    ///
    /// A declaration that fails to resolve is returned marked unresolved with its error attached;
    /// it never drops its siblings. Function-like declarations without a name are named after
    /// their type, with a per-kind counter suffix from the second one on. All other declarations
    /// get a page link.
    pub async fn resolve_datasources(&self, declarations: &[DatasourceDeclaration], single_entity: bool, page_size: Option<i32>) -> Vec<ResolvedDatasource> {
        let declarations = match single_entity {
            true => &declarations[..declarations.len().min(1)],
            false => declarations,
        };
        let mut resolved = join_all(declarations.iter().map(|d| self.resolve_datasource(d, false, true))).await;

        let config = self.controller.config();
        let mut counters: HashMap<DatasourceKind, usize> = HashMap::new();
        for datasource in resolved.iter_mut() {
            let kind = datasource.kind();
            if kind.is_function_like() {
                if datasource.declaration.explicit_name().is_none() {
                    let counter = counters.entry(kind).or_insert(0);
                    *counter += 1;
                    let label = self.type_label(kind);
                    datasource.name = match *counter {
                        1 => label.to_owned(),
                        n => format!("{label} {n}"),
                    };
                }
            } else if single_entity {
                datasource.page_link = Some(PageLink::single_entity());
            } else {
                let page_link = datasource.declaration.page_link.clone();
                datasource.page_link = Some(page_link.unwrap_or_else(|| PageLink::new(config.page_size(page_size))));
            }
        }

        action_debug!("DatasourceExpander", "resolved", "{} datasources", resolved.len());
        resolved
    }

    /// Resolve the single declaration of an alarm widget. Entities are looked up eagerly.
    pub async fn resolve_alarm_source(&self, declaration: &DatasourceDeclaration) -> ResolvedDatasource {
        let mut datasource = self.resolve_datasource(declaration, true, false).await;
        if datasource.kind() == DatasourceKind::Function && datasource.declaration.explicit_name().is_none() {
            datasource.name = self.controller.config().labels.function.clone();
        }
        datasource
    }

    async fn resolve_datasource(&self, declaration: &DatasourceDeclaration, force_filter: bool, strict_alarms: bool) -> ResolvedDatasource {
        let mut datasource = ResolvedDatasource::new(declaration.clone());
        if let Some(filter_id) = &declaration.filter_id {
            datasource.key_filters = self.controller.key_filters(filter_id);
        }
        if let Some(config) = &declaration.alarm_filter_config {
            datasource.alarm_filter = Some(self.controller.resolver().resolve_alarm_filter(config, strict_alarms));
        }

        let outcome = match declaration.kind {
            DatasourceKind::Device => self.bind_device(&mut datasource, force_filter).await,
            DatasourceKind::Entity => match (&declaration.entity_alias_id, &declaration.entity_id) {
                (Some(alias_id), _) => self.bind_alias(&mut datasource, alias_id, force_filter).await,
                (None, Some(entity_id)) => {
                    self.bind_entity(&mut datasource, entity_id.clone());
                    Ok(())
                }
                (None, None) => Err(ResolutionError::IncompleteDatasource(declaration.kind)),
            },
            DatasourceKind::Function | DatasourceKind::EntityCount | DatasourceKind::AlarmCount => Ok(()),
        };

        if let Err(error) = outcome {
            action_warn!("DatasourceExpander", "unresolved", "{:?}: {}", declaration.kind, error);
            self.mark_unresolved(&mut datasource);
            datasource.resolution_error = Some(error);
        }
        datasource
    }

    async fn bind_alias(&self, datasource: &mut ResolvedDatasource, alias_id: &AliasId, force_filter: bool) -> Result<(), ResolutionError> {
        let alias = self.controller.alias_info(alias_id).await?;
        datasource.alias_name = Some(alias.alias.clone());

        let Some(filter) = alias.entity_filter.clone() else {
            // state entity whose parameter is not bound yet
            self.mark_unresolved(datasource);
            datasource.unresolved_state_entity = true;
            return Ok(());
        };

        if alias.resolve_multiple {
            datasource.entity_filter = Some(filter.clone());
            datasource.name_if_unset(&alias.alias);
            if force_filter {
                let entity = self.controller.resolver().resolve_entity_by_filter(&filter, LookupOptions::quiet()).await;
                match entity.map_err(|e| ResolutionError::resolver(alias_id, e))? {
                    Some(entity) => datasource.apply_entity(&entity),
                    None => action_debug!("DatasourceExpander", "no entity", "alias {} matched nothing", alias_id),
                }
            }
        } else {
            match &alias.current_entity {
                Some(entity) => datasource.apply_entity(entity),
                None => {
                    datasource.entity_filter = Some(filter);
                    datasource.name_if_unset(&alias.alias);
                }
            }
        }
        Ok(())
    }

    async fn bind_device(&self, datasource: &mut ResolvedDatasource, force_filter: bool) -> Result<(), ResolutionError> {
        let Some(device_id) = datasource.declaration.device_id.clone() else {
            return Err(ResolutionError::IncompleteDatasource(DatasourceKind::Device));
        };
        let entity_id = EntityId::device(device_id.clone());
        datasource.entity_id = Some(entity_id.clone());
        datasource.entity_filter = Some(EntityFilter::single(entity_id.clone()));

        if force_filter {
            if let Some(entity) = self.controller.resolve_single_entity_info_for_device_id(&device_id).await {
                datasource.apply_entity(&entity);
            }
        }
        let fallback = datasource.entity_name.clone().unwrap_or(device_id);
        datasource.name_if_unset(&fallback);
        Ok(())
    }

    fn bind_entity(&self, datasource: &mut ResolvedDatasource, entity_id: EntityId) {
        datasource.entity_filter = Some(EntityFilter::single(entity_id.clone()));
        let fallback = datasource.entity_name.clone().unwrap_or_else(|| entity_id.id.clone());
        datasource.entity_id = Some(entity_id);
        datasource.name_if_unset(&fallback);
    }

    fn mark_unresolved(&self, datasource: &mut ResolvedDatasource) {
        let label = &self.controller.config().labels.unresolved;
        datasource.entity_filter = None;
        datasource.name = label.clone();
        datasource.entity_name = Some(label.clone());
    }

    fn type_label(&self, kind: DatasourceKind) -> &str {
        let labels = &self.controller.config().labels;
        match kind {
            DatasourceKind::Function => &labels.function,
            DatasourceKind::EntityCount => &labels.entity_count,
            DatasourceKind::AlarmCount => &labels.alarm_count,
            DatasourceKind::Device | DatasourceKind::Entity => "",
        }
    }
}
