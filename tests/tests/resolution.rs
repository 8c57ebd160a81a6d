use anyhow::Result;
use common::*;
use dashlink_core::{
    error::ResolutionError,
    model::{AliasId, EntityId, StateParams},
};
use std::time::Duration;

fn name_of(alias: &dashlink_core::model::ResolvedAlias) -> Option<&str> { alias.current_entity.as_ref().map(|e| e.name.as_str()) }

#[tokio::test]
async fn test_concurrent_lookups_resolve_once() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    resolver.hold();

    let lookups: Vec<_> = (0..5)
        .map(|_| {
            let controller = controller.clone();
            tokio::spawn(async move { controller.alias_info(&"a".into()).await })
        })
        .collect();

    resolver.wait_for_calls("a", 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(controller.cache().is_pending(&"a".into()));
    resolver.open();

    let mut results = Vec::new();
    for lookup in lookups {
        results.push(lookup.await??);
    }
    assert_eq!(resolver.calls("a"), 1);
    assert!(results.iter().all(|r| r == &results[0]));
    assert_eq!(name_of(&results[0]), Some("Room 1 Sensor"));
    Ok(())
}

#[tokio::test]
async fn test_invalidated_alias_is_resolved_again() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    assert_eq!(name_of(&controller.alias_info(&"a".into()).await?), Some("Room 1 Sensor"));

    resolver.inner.insert_entity(room_sensor("dev-1", "Renamed sensor"));
    // still served from the cache
    assert_eq!(name_of(&controller.alias_info(&"a".into()).await?), Some("Room 1 Sensor"));
    assert_eq!(resolver.calls("a"), 1);

    controller.set_alias_unresolved(&"a".into());
    assert!(controller.instant_alias_info(&"a".into()).is_none());
    assert_eq!(name_of(&controller.alias_info(&"a".into()).await?), Some("Renamed sensor"));
    assert_eq!(resolver.calls("a"), 2);
    Ok(())
}

#[tokio::test]
async fn test_failure_is_not_cached() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    resolver.fail("a");

    let error = controller.alias_info(&"a".into()).await.unwrap_err();
    assert!(matches!(error, ResolutionError::Resolver { .. }));
    assert_eq!(error.alias_id(), Some(&AliasId::new("a")));
    assert!(controller.instant_alias_info(&"a".into()).is_none());
    assert!(!controller.cache().is_pending(&"a".into()));

    resolver.recover("a");
    assert!(controller.alias_info(&"a".into()).await.is_ok());
    assert_eq!(resolver.calls("a"), 2);
    Ok(())
}

#[tokio::test]
async fn test_unknown_alias() {
    let (controller, resolver) = setup(vec![]);
    assert!(matches!(controller.alias_info(&"nope".into()).await, Err(ResolutionError::AliasNotFound(_))));
    assert_eq!(resolver.total_calls(), 0);
}

#[tokio::test]
async fn test_refresh_supersedes_in_flight_resolution() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1")]);
    resolver.hold();

    let stale = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.alias_info(&"a".into()).await })
    };
    resolver.wait_for_calls("a", 1).await;

    resolver.inner.insert_entity(room_sensor("dev-1", "Renamed sensor"));
    let fresh = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.refresh(Some(ids(&["a"]))).await })
    };
    resolver.wait_for_calls("a", 2).await;

    // the first resolution settles first, but it no longer owns the cache entry
    resolver.release(1);
    assert_eq!(name_of(&stale.await??), Some("Room 1 Sensor"));
    assert!(controller.instant_alias_info(&"a".into()).is_none());

    resolver.release(1);
    let refreshed = fresh.await?;
    assert_eq!(refreshed.len(), 1);
    assert_eq!(name_of(refreshed[0].1.as_ref().unwrap()), Some("Renamed sensor"));
    assert_eq!(controller.instant_alias_info(&"a".into()).as_ref().and_then(name_of), Some("Renamed sensor"));
    Ok(())
}

#[tokio::test]
async fn test_state_entity_follows_dashboard_state() -> Result<()> {
    let params = StateParams::new().with_param("roomId", EntityId::device("dev-1"));
    let (controller, resolver) = setup_with_params(vec![state_alias("room1", "roomId")], params);
    let (seen, listener) = recorder::<Vec<AliasId>>();
    let _guard = controller.on_aliases_changed(listener);

    let room = controller.alias_info(&"room1".into()).await?;
    assert!(!room.resolve_multiple);
    assert!(room.is_state_entity);
    assert_eq!(room.current_entity.as_ref().map(|e| e.id.clone()), Some(EntityId::device("dev-1")));
    assert_eq!(name_of(&room), Some("Room 1 Sensor"));
    controller.alias_info(&"room1".into()).await?;
    assert_eq!(resolver.calls("room1"), 1);
    assert_eq!(controller.cache().binding(&"room1".into()).and_then(|b| b.last_known_entity_id), Some(EntityId::device("dev-1")));

    let changed = controller.on_dashboard_state_changed(StateParams::new().with_param("roomId", EntityId::device("dev-2")));
    assert_eq!(changed, ids(&["room1"]));
    assert!(controller.instant_alias_info(&"room1".into()).is_none());

    let room = controller.alias_info(&"room1".into()).await?;
    assert_eq!(name_of(&room), Some("Room 2 Sensor"));
    assert_eq!(resolver.calls("room1"), 2);

    // unrelated state changes do not disturb the binding
    let changed = controller.on_dashboard_state_changed(
        StateParams::new().with_param("roomId", EntityId::device("dev-2")).with_param("floor", EntityId::asset("f1")),
    );
    assert!(changed.is_empty());
    assert!(controller.instant_alias_info(&"room1".into()).is_some());

    assert_eq!(*seen.lock().unwrap(), vec![ids(&["room1"])]);
    Ok(())
}

#[tokio::test]
async fn test_unset_state_param_is_unresolved_until_set() -> Result<()> {
    let (controller, resolver) = setup(vec![state_alias("room1", "roomId")]);

    let room = controller.alias_info(&"room1".into()).await?;
    assert!(room.is_unresolved());
    assert_eq!(room.state_param_name.as_deref(), Some("roomId"));

    let changed = controller.on_dashboard_state_changed(StateParams::new().with_param("roomId", EntityId::device("dev-3")));
    assert_eq!(changed, ids(&["room1"]));
    assert_eq!(name_of(&controller.alias_info(&"room1".into()).await?), Some("Room 3 Sensor"));
    assert_eq!(resolver.seen_params("room1").len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_state_change_during_resolution() -> Result<()> {
    let (controller, resolver) = setup(vec![state_alias("room1", "roomId")]);
    controller.on_dashboard_state_changed(StateParams::new().with_param("roomId", EntityId::device("dev-1")));
    resolver.hold();

    let stale = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.alias_info(&"room1".into()).await })
    };
    resolver.wait_for_calls("room1", 1).await;

    // the in-flight resolution was started against dev-1 and is superseded
    let changed = controller.on_dashboard_state_changed(StateParams::new().with_param("roomId", EntityId::device("dev-2")));
    assert_eq!(changed, ids(&["room1"]));
    resolver.open();
    stale.await??;

    assert!(controller.instant_alias_info(&"room1".into()).is_none());
    assert_eq!(name_of(&controller.alias_info(&"room1".into()).await?), Some("Room 2 Sensor"));
    Ok(())
}

/// A parameterless refresh only covers aliases which currently hold a resolved value. An alias
/// that was defined but never looked up is not refreshed.
#[tokio::test]
async fn test_refresh_without_ids_covers_resolved_aliases_only() -> Result<()> {
    let (controller, resolver) = setup(vec![device_alias("a", "dev-1"), device_alias("b", "dev-2")]);
    let (seen, listener) = recorder::<Vec<AliasId>>();
    let _guard = controller.on_aliases_changed(listener);

    controller.alias_info(&"a".into()).await?;
    let refreshed = controller.refresh(None).await;

    assert_eq!(refreshed.iter().map(|(id, _)| id.clone()).collect::<Vec<_>>(), ids(&["a"]));
    assert_eq!(resolver.calls("a"), 2);
    assert_eq!(resolver.calls("b"), 0);
    assert_eq!(*seen.lock().unwrap(), vec![ids(&["a"])]);
    Ok(())
}
