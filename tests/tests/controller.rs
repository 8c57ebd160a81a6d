use anyhow::Result;
use common::*;
use dashlink_core::{
    datasource::DatasourceDeclaration,
    filter::{EntityKey, EntityKeyValueType, FilterDefinition, KeyFilter, KeyFilterPredicate, StringOperation},
    model::{AliasId, EntityId, FilterId},
    AliasController, ControllerConfig, DashboardConfiguration,
};
use std::sync::Arc;

fn status_filter(id: &str, status: &str) -> FilterDefinition {
    let key_filter = KeyFilter {
        key: EntityKey::attribute("status"),
        value_type: EntityKeyValueType::String,
        predicate: KeyFilterPredicate::String { operation: StringOperation::Equal, value: status.into(), ignore_case: false },
    };
    FilterDefinition::new(id, format!("Status {status}"), vec![key_filter])
}

#[tokio::test]
async fn test_only_changed_aliases_are_invalidated() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1"), device_alias("b", "dev-2")]);
    let (seen, listener) = recorder::<Vec<AliasId>>();
    let _guard = controller.on_aliases_changed(listener);

    controller.alias_info(&"a".into()).await?;
    controller.alias_info(&"b".into()).await?;

    let changed = controller.update_entity_aliases(vec![device_alias("a", "dev-1"), device_alias("b", "dev-3")]);
    assert_eq!(changed, ids(&["b"]));
    assert!(controller.instant_alias_info(&"a".into()).is_some());
    assert!(controller.instant_alias_info(&"b".into()).is_none());

    controller.alias_info(&"a".into()).await?;
    let b = controller.alias_info(&"b".into()).await?;
    assert_eq!(b.current_entity.map(|e| e.id), Some(EntityId::device("dev-3")));
    assert_eq!(resolver.calls("a"), 1);
    assert_eq!(resolver.calls("b"), 2);

    // an identical table is not a change
    assert!(controller.update_entity_aliases(vec![device_alias("a", "dev-1"), device_alias("b", "dev-3")]).is_empty());
    assert_eq!(*seen.lock().unwrap(), vec![ids(&["b"])]);
    Ok(())
}

#[tokio::test]
async fn test_added_and_removed_aliases_share_one_notification() -> Result<()> {
    let (controller, _resolver) = setup(vec![device_alias("a", "dev-1"), device_alias("b", "dev-2")]);
    let (seen, listener) = recorder::<Vec<AliasId>>();
    let _guard = controller.on_aliases_changed(listener);

    let changed = controller.update_entity_aliases(vec![device_alias("b", "dev-2"), device_alias("c", "dev-3")]);
    assert_eq!(changed, ids(&["a", "c"]));
    assert_eq!(*seen.lock().unwrap(), vec![ids(&["a", "c"])]);
    assert!(controller.entity_aliases().contains_key("c"));
    Ok(())
}

#[tokio::test]
async fn test_definition_edit_supersedes_in_flight_resolution() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    resolver.hold();

    let stale = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.alias_info(&"a".into()).await })
    };
    resolver.wait_for_calls("a", 1).await;

    controller.update_entity_aliases(vec![device_alias("a", "dev-2")]);
    resolver.open();
    let stale = stale.await??;
    assert_eq!(stale.current_entity.map(|e| e.id), Some(EntityId::device("dev-1")));

    assert!(controller.instant_alias_info(&"a".into()).is_none());
    let fresh = controller.alias_info(&"a".into()).await?;
    assert_eq!(fresh.current_entity.map(|e| e.id), Some(EntityId::device("dev-2")));
    Ok(())
}

#[tokio::test]
async fn test_refresh_notifies_once_after_all_settled() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1"), device_alias("b", "dev-2"), device_alias("c", "dev-3")]);
    resolver.fail("b");

    // record which aliases were cached at the moment of notification
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let _guard = {
        let seen = seen.clone();
        let cache = controller.cache().clone();
        controller.on_aliases_changed(move |changed: &Vec<AliasId>| {
            let cached: Vec<bool> = changed.iter().map(|id| cache.peek(id).is_some()).collect();
            seen.lock().unwrap().push((changed.clone(), cached));
        })
    };

    let results = controller.refresh(Some(ids(&["a", "b", "c"]))).await;
    assert_eq!(results.len(), 3);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());
    assert!(results[2].1.is_ok());

    assert_eq!(*seen.lock().unwrap(), vec![(ids(&["a", "b", "c"]), vec![true, false, true])]);
    Ok(())
}

#[tokio::test]
async fn test_user_filter_lifetime() {
    let resolver = Arc::new(InstrumentedResolver::new(sensors()));
    let controller = AliasController::new(resolver, ControllerConfig::default()).with_filters([status_filter("f", "active")]);
    let (seen, listener) = recorder::<Vec<FilterId>>();
    let _guard = controller.on_filters_changed(listener);

    assert!(controller.update_user_filter(status_filter("f", "cleared")));
    assert_eq!(controller.filter_info(&"f".into()), Some(status_filter("f", "cleared")));
    assert_eq!(controller.key_filters(&"f".into()), status_filter("f", "cleared").key_filters);

    // unrelated filter edits keep the override
    controller.update_filters([status_filter("f", "active"), status_filter("g", "any")]);
    assert_eq!(controller.filter_info(&"f".into()), Some(status_filter("f", "cleared")));

    controller.update_filters([status_filter("f", "acknowledged"), status_filter("g", "any")]);
    assert_eq!(controller.filter_info(&"f".into()), Some(status_filter("f", "acknowledged")));
    assert!(controller.user_filters().is_empty());

    assert_eq!(*seen.lock().unwrap(), vec![vec![FilterId::new("f")], vec![FilterId::new("g")], vec![FilterId::new("f")]]);
}

#[tokio::test]
async fn test_update_current_alias_entity() -> Result<()> {
    let (controller, _resolver) = setup(vec![device_alias("a", "dev-1"), all_sensors_alias("all")]);
    let (seen, listener) = recorder::<Vec<AliasId>>();
    let _guard = controller.on_aliases_changed(listener);

    // nothing cached yet
    assert!(!controller.update_current_alias_entity(&"a".into(), room_sensor("dev-2", "Room 2 Sensor")));

    controller.alias_info(&"a".into()).await?;
    controller.alias_info(&"all".into()).await?;
    assert!(controller.update_current_alias_entity(&"a".into(), room_sensor("dev-2", "Room 2 Sensor")));
    assert!(!controller.update_current_alias_entity(&"a".into(), room_sensor("dev-2", "Room 2 Sensor")));
    assert!(!controller.update_current_alias_entity(&"all".into(), room_sensor("dev-2", "Room 2 Sensor")));

    let a = controller.instant_alias_info(&"a".into()).unwrap();
    assert_eq!(a.current_entity.map(|e| e.name), Some("Room 2 Sensor".to_owned()));
    assert_eq!(controller.resolve_single_entity_info(&"a".into()).await?.map(|e| e.id), Some(EntityId::device("dev-2")));
    assert_eq!(*seen.lock().unwrap(), vec![ids(&["a"])]);
    Ok(())
}

#[tokio::test]
async fn test_single_entity_lookups() -> Result<()> {
    let (controller, _resolver) = setup(vec![all_sensors_alias("all")]);

    let first = controller.resolve_single_entity_info(&"all".into()).await?;
    assert_eq!(first.map(|e| e.name), Some("Room 1 Sensor".to_owned()));

    assert_eq!(controller.resolve_single_entity_info_for_device_id("dev-3").await.map(|e| e.name), Some("Room 3 Sensor".to_owned()));
    assert!(controller.resolve_single_entity_info_for_device_id("dev-404").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_from_configuration() -> Result<()> {
    let json = r#"{
        "entityAliases": {
            "lobby": {
                "id": "lobby",
                "alias": "Lobby sensor",
                "filter": { "type": "singleEntity", "singleEntity": { "entityType": "DEVICE", "id": "dev-1" } }
            },
            "selected": {
                "id": "selected",
                "alias": "Selected room",
                "filter": { "type": "stateEntity", "stateEntityParamName": "roomId", "defaultStateEntity": { "entityType": "DEVICE", "id": "dev-2" } }
            }
        },
        "filters": {
            "active": {
                "id": "active",
                "filter": "Active",
                "keyFilters": [{
                    "key": { "type": "ATTRIBUTE", "key": "active" },
                    "valueType": "BOOLEAN",
                    "predicate": { "type": "BOOLEAN", "operation": "EQUAL", "value": true }
                }]
            }
        }
    }"#;
    let dashboard = DashboardConfiguration::from_json(json)?;
    let resolver = Arc::new(InstrumentedResolver::new(sensors()));
    let controller = AliasController::from_configuration(resolver.clone(), &dashboard, ControllerConfig::default());

    assert_eq!(controller.entity_alias_id("Selected room"), Some(AliasId::new("selected")));
    assert_eq!(controller.key_filters(&"active".into()).len(), 1);

    let lobby = controller.alias_info(&"lobby".into()).await?;
    assert_eq!(lobby.current_entity.map(|e| e.name), Some("Room 1 Sensor".to_owned()));

    // no state parameter set, so the default state entity applies
    let selected = controller.alias_info(&"selected".into()).await?;
    assert_eq!(selected.current_entity.map(|e| e.name), Some("Room 2 Sensor".to_owned()));
    Ok(())
}

#[tokio::test]
async fn test_full_refresh_forgets_device_lookups() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    let device_name = |entity: Option<dashlink_core::model::EntityInfo>| entity.map(|e| e.name);

    assert_eq!(device_name(controller.resolve_single_entity_info_for_device_id("dev-2").await), Some("Room 2 Sensor".to_owned()));
    resolver.inner.insert_entity(room_sensor("dev-2", "Renamed sensor"));
    assert_eq!(device_name(controller.resolve_single_entity_info_for_device_id("dev-2").await), Some("Room 2 Sensor".to_owned()));

    // no alias is resolved yet, the device lookup is forgotten all the same
    assert!(controller.refresh(None).await.is_empty());
    assert_eq!(device_name(controller.resolve_single_entity_info_for_device_id("dev-2").await), Some("Renamed sensor".to_owned()));

    controller.alias_info(&"a".into()).await?;
    resolver.inner.insert_entity(room_sensor("dev-2", "Lobby sensor"));
    assert_eq!(controller.refresh(None).await.len(), 1);
    let source = controller.resolve_alarm_source(&DatasourceDeclaration::device("dev-2")).await;
    assert_eq!(source.name, "Lobby sensor");
    Ok(())
}
