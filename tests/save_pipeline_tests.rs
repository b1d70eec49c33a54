/// Save pipeline tests
///
/// End-to-end saves through the orchestrator against the in-memory store:
/// key mapping, optimistic concurrency, relationship fixup and atomicity.
/// Run with: cargo test --test save_pipeline_tests

mod common;

use common::*;
use saveset::{
    ChangeSet, DbError, Entity, EntityErrorKind, EntityKey, EntityRecord, EntityState,
    SaveConfig, SaveOrchestrator, StoreSession, TransactionSettings, Value,
};
use std::time::Duration;

fn save(store: &saveset::InMemoryStore, change_set: ChangeSet) -> saveset::Result<saveset::SaveResult> {
    let mut session = store.session();
    SaveOrchestrator::new(SaveConfig::default()).save(&mut session, change_set)
}

#[test]
fn test_temporary_keys_are_mapped() {
    let store = store();

    // Child first: flush order must come from the links, not the list
    let mut cs = ChangeSet::new();
    cs.add(todo_item(-5, -1, "Milk"));
    cs.add(todo_list(-1, "Groceries"));

    let result = save(&store, cs).unwrap();
    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.key_mappings.len(), 2);

    let list = result.key_mapping("TodoList", &Value::Integer(-1)).unwrap();
    let item = result.key_mapping("TodoItem", &Value::Integer(-5)).unwrap();
    assert_eq!(list.real_value, Value::Integer(1));
    assert_eq!(item.real_value, Value::Integer(1));

    let stored = store.get("TodoItem", &EntityKey::single(1)).unwrap().unwrap();
    assert_eq!(stored.get("list_id"), &Value::Integer(1));

    // Returned entities carry real keys and rewritten foreign keys
    let returned_item = &result.entities[0];
    assert_eq!(returned_item.type_name(), "TodoItem");
    assert_eq!(returned_item.get("id"), &Value::Integer(1));
    assert_eq!(returned_item.get("list_id"), &Value::Integer(1));
    assert!(result.entities.iter().all(|e| !e.has_links()));
}

#[test]
fn test_child_of_persisted_parent() {
    let store = store();
    store.seed(todo_list(10, "Existing")).unwrap();

    let mut cs = ChangeSet::new();
    cs.add(todo_item(-1, 10, "Bread"));
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.key_mappings[0].real_value, Value::Integer(1));
    let stored = store.get("TodoItem", &EntityKey::single(1)).unwrap().unwrap();
    assert_eq!(stored.get("list_id"), &Value::Integer(10));
}

#[test]
fn test_version_is_restored_and_incremented() {
    let store = store();
    seed_customer(&store, 3);

    let mut cs = ChangeSet::new();
    cs.push(
        EntityRecord::new(
            Entity::new("Customer")
                .with("id", 42)
                .with("name", "Ada Lovelace")
                .with("version", 4),
            EntityState::Modified,
        )
        .with_original("version", 3),
    );
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.entities[0].get("version"), &Value::Integer(4));
    let stored = store.get("Customer", &EntityKey::single(42)).unwrap().unwrap();
    assert_eq!(stored.get("version"), &Value::Integer(4));
    assert_eq!(stored.get("name"), &Value::from("Ada Lovelace"));
}

#[test]
fn test_version_returned_without_full_refresh() {
    let store = store();
    seed_customer(&store, 3);

    let mut cs = ChangeSet::new();
    cs.push(
        EntityRecord::new(
            Entity::new("Customer")
                .with("id", 42)
                .with("name", "Ada Lovelace")
                .with("version", 4),
            EntityState::Modified,
        )
        .with_original("version", 3),
    );
    let orchestrator = SaveOrchestrator::new(SaveConfig::new().refresh_after_save(false));
    let result = orchestrator.save(&mut store.session(), cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    let stored = store.get("Customer", &EntityKey::single(42)).unwrap().unwrap();
    assert_eq!(stored.get("version"), &Value::Integer(4));
    assert_eq!(result.entities[0].get("version"), stored.get("version"));
    assert_eq!(result.entities[0].get("name"), &Value::from("Ada Lovelace"));
}

#[test]
fn test_stale_version_is_a_conflict() {
    let store = store();
    seed_customer(&store, 4);

    let mut cs = ChangeSet::new();
    cs.push(
        EntityRecord::new(
            Entity::new("Customer")
                .with("id", 42)
                .with("name", "Stale")
                .with("version", 4),
            EntityState::Modified,
        )
        .with_original("version", 3),
    );
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::ConcurrencyConflict);
    assert_eq!(result.errors[0].key_values, vec![Value::Integer(42)]);
    assert!(result.entities.is_empty());

    let stored = store.get("Customer", &EntityKey::single(42)).unwrap().unwrap();
    assert_eq!(stored.get("name"), &Value::from("Ada"));
    assert_eq!(stored.get("version"), &Value::Integer(4));
}

#[test]
fn test_reference_to_deleted_order() {
    let store = store();
    seed_order(&store);

    let mut cs = ChangeSet::new();
    cs.delete(Entity::new("Order").with("id", 7));
    cs.modify(
        Entity::new("OrderLine")
            .with("id", 99)
            .with("order_id", 7)
            .with("quantity", 2),
    );
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.error_name, EntityErrorKind::UnresolvedReference);
    assert_eq!(error.entity_type_name, "OrderLine");
    assert_eq!(error.key_values, vec![Value::Integer(99)]);

    assert!(store.get("Order", &EntityKey::single(7)).unwrap().is_some());
    let line = store.get("OrderLine", &EntityKey::single(99)).unwrap().unwrap();
    assert_eq!(line.get("quantity"), &Value::Integer(1));
}

#[test]
fn test_delete_children_before_parent() {
    let store = store();
    seed_order(&store);

    // The client nulled the line's foreign key; its original still links it
    let mut cs = ChangeSet::new();
    cs.delete(Entity::new("Order").with("id", 7));
    cs.push(
        EntityRecord::new(
            Entity::new("OrderLine")
                .with("id", 99)
                .with("order_id", Value::Null),
            EntityState::Deleted,
        )
        .with_original("order_id", 7),
    );
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(store.count("Order").unwrap(), 0);
    assert_eq!(store.count("OrderLine").unwrap(), 0);
}

#[test]
fn test_delete_of_referenced_row_is_rejected() {
    let store = store();
    seed_order(&store);

    let mut cs = ChangeSet::new();
    cs.delete(Entity::new("Order").with("id", 7));
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::ForeignKeyViolation);
    assert_eq!(store.count("Order").unwrap(), 1);
}

#[test]
fn test_one_invalid_entity_rolls_back_everything() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, "Fine"));
    cs.add(todo_list(-2, &"x".repeat(41)));
    cs.add(todo_item(-3, -1, "Depends on the fine list"));
    let result = save(&store, cs).unwrap();

    assert!(!result.is_success());
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::ValidationError);
    assert_eq!(result.errors[0].key_values, vec![Value::Integer(-2)]);
    assert_eq!(result.errors[0].property_name.as_deref(), Some("title"));
    assert!(result.key_mappings.is_empty());

    assert_eq!(store.count("TodoList").unwrap(), 0);
    assert_eq!(store.count("TodoItem").unwrap(), 0);
}

#[test]
fn test_unresolvable_reference_writes_nothing() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, "Unrelated"));
    cs.add(todo_item(-2, -9, "Orphan"));
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1);
    let error = &result.errors[0];
    assert_eq!(error.error_name, EntityErrorKind::UnresolvedReference);
    assert_eq!(error.entity_type_name, "TodoItem");
    assert_eq!(error.property_name.as_deref(), Some("list_id"));
    assert_eq!(store.count("TodoList").unwrap(), 0);
    assert_eq!(store.count("TodoItem").unwrap(), 0);
}

#[test]
fn test_mistyped_reference_reports_one_error() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(
        Entity::new("TodoItem")
            .with("id", -2)
            .with("list_id", "abc")
            .with("description", "Milk"),
    );
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1, "{:?}", result.errors);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::ValidationError);
    assert_eq!(result.errors[0].property_name.as_deref(), Some("list_id"));
    assert_eq!(store.count("TodoItem").unwrap(), 0);
}

#[test]
fn test_errors_from_every_record_are_collected() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, &"x".repeat(50)));
    cs.add(Entity::new("Customer").with("id", 1).with("name", "Eve").with("email", "not-an-email"));
    cs.modify(Entity::new("Customer").with("id", 404).with("name", "Ghost"));
    let result = save(&store, cs).unwrap();

    let kinds: Vec<_> = result.errors.iter().map(|e| e.error_name).collect();
    assert_eq!(
        kinds,
        vec![EntityErrorKind::ValidationError, EntityErrorKind::ValidationError]
    );
    assert_eq!(store.count("Customer").unwrap(), 0);
}

#[test]
fn test_replayed_change_set_is_rejected() {
    let store = store();
    let mut cs = ChangeSet::new();
    cs.add(tag("a"));
    let replay = cs.clone();

    assert!(save(&store, cs).unwrap().is_success());
    assert!(store.change_set_committed(replay.id()).unwrap());

    let err = save(&store, replay.clone()).unwrap_err();
    assert_eq!(err, DbError::ChangeSetReplayed(replay.id()));
    assert_eq!(store.count("Tag").unwrap(), 1);
}

#[test]
fn test_replay_without_guard_fails_per_entity() {
    let store = store();
    let mut cs = ChangeSet::new();
    cs.add(tag("a"));
    let replay = cs.clone();
    assert!(save(&store, cs).unwrap().is_success());

    let orchestrator =
        SaveOrchestrator::new(SaveConfig::new().reject_replayed_change_sets(false));
    let result = orchestrator.save(&mut store.session(), replay).unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::DuplicateKey);
    assert_eq!(store.count("Tag").unwrap(), 1);
}

#[test]
fn test_replay_without_guard_never_duplicates_generated_keys() {
    let store = store();
    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, "Groceries"));
    let replay = cs.clone();
    assert!(save(&store, cs).unwrap().is_success());

    let orchestrator =
        SaveOrchestrator::new(SaveConfig::new().reject_replayed_change_sets(false));
    let result = orchestrator.save(&mut store.session(), replay).unwrap();

    assert!(!result.is_success());
    assert_eq!(result.errors[0].error_name, EntityErrorKind::DuplicateKey);
    assert_eq!(result.errors[0].entity_type_name, "TodoList");
    assert!(result.key_mappings.is_empty());
    assert_eq!(store.count("TodoList").unwrap(), 1);
}

#[test]
fn test_timeout_is_fatal_and_rolls_back() {
    let store = store();
    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, "Groceries"));
    cs.add(todo_item(-5, -1, "Milk"));

    let config = SaveConfig::new().transaction(TransactionSettings::default().timeout(Duration::ZERO));
    let mut session = store.session();
    let err = SaveOrchestrator::new(config).save(&mut session, cs).unwrap_err();

    assert!(matches!(err, DbError::Timeout(_)));
    assert!(!session.in_transaction());
    assert_eq!(store.count("TodoList").unwrap(), 0);
    assert_eq!(store.count("TodoItem").unwrap(), 0);
}

#[test]
fn test_ambient_transaction_is_not_committed() {
    let store = store();
    let mut session = store.session();
    session.begin(&Default::default()).unwrap();

    let orchestrator = SaveOrchestrator::new(SaveConfig::default());
    let mut cs = ChangeSet::new();
    cs.add(tag("kept"));
    assert!(orchestrator.save(&mut session, cs).unwrap().is_success());
    assert!(session.in_transaction());
    assert_eq!(store.count("Tag").unwrap(), 0);

    // A failing save only undoes its own work
    let mut cs = ChangeSet::new();
    cs.add(tag("other"));
    cs.add(tag("kept"));
    let result = orchestrator.save(&mut session, cs).unwrap();
    assert_eq!(result.errors.len(), 1);
    assert!(session.in_transaction());

    session.commit().unwrap();
    let codes: Vec<_> = store
        .entities("Tag")
        .unwrap()
        .iter()
        .map(|t| t.get("code").clone())
        .collect();
    assert_eq!(codes, vec![Value::from("kept")]);
}

#[test]
fn test_fatal_error_propagates_after_rollback() {
    let store = store();
    let mut session = store.session();

    let mut cs = ChangeSet::new();
    cs.add(tag("a"));
    cs.add(Entity::new("Ghost").with("id", 1));
    let err = SaveOrchestrator::new(SaveConfig::default()).save(&mut session, cs).unwrap_err();

    assert_eq!(err, DbError::EntityTypeNotFound("Ghost".into()));
    assert!(!session.in_transaction());
    assert_eq!(store.count("Tag").unwrap(), 0);
}

#[test]
fn test_closed_session_is_fatal() {
    let store = store();
    let mut session = store.session();
    session.close();

    let mut cs = ChangeSet::new();
    cs.add(tag("a"));
    let err = SaveOrchestrator::new(SaveConfig::default()).save(&mut session, cs).unwrap_err();
    assert_eq!(err, DbError::SessionClosed);
}

#[test]
fn test_unchanged_entity_is_reattached() {
    let store = store();
    seed_customer(&store, 1);

    let mut cs = ChangeSet::new();
    cs.unchanged(Entity::new("Customer").with("id", 42).with("name", "Ada").with("version", 1));
    cs.add(Entity::new("Order").with("id", -1).with("customer_id", 42));
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    let order = store.get("Order", &EntityKey::single(1)).unwrap().unwrap();
    assert_eq!(order.get("customer_id"), &Value::Integer(42));

    // Re-attaching does not write
    let customer = store.get("Customer", &EntityKey::single(42)).unwrap().unwrap();
    assert_eq!(customer.get("version"), &Value::Integer(1));
}

#[test]
fn test_unchanged_missing_entity_is_not_found() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.unchanged(Entity::new("Customer").with("id", 404).with("name", "Nobody"));
    let result = save(&store, cs).unwrap();

    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::NotFound);
}

#[test]
fn test_computed_timestamps_are_returned() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(Entity::new("Customer").with("id", 1).with("name", "Bob"));
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    let created = result.entities[0].get("created_at").clone();
    assert!(matches!(created, Value::Timestamp(_)));
    assert_eq!(result.entities[0].get("version"), &Value::Integer(1));

    let mut cs = ChangeSet::new();
    cs.push(
        EntityRecord::new(
            Entity::new("Customer")
                .with("id", 1)
                .with("name", "Bobby")
                .with("version", 1),
            EntityState::Modified,
        )
        .with_original("version", 1),
    );
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    let entity = &result.entities[0];
    assert_eq!(entity.get("created_at"), &created);
    assert!(entity.get("updated_at") >= &created);
    assert_eq!(entity.get("version"), &Value::Integer(2));
}

#[test]
fn test_uuid_keys_from_generator() {
    let store = uuid_store();

    let mut cs = ChangeSet::new();
    cs.add(Entity::new("Note").with("id", "temp-1").with("body", "first"));
    cs.add(Entity::new("Note").with("id", "temp-2").with("body", "second"));
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    assert_eq!(result.key_mappings.len(), 2);
    let first = result.key_mapping("Note", &Value::from("temp-1")).unwrap();
    let second = result.key_mapping("Note", &Value::from("temp-2")).unwrap();
    assert!(matches!(first.real_value, Value::Uuid(_)));
    assert_ne!(first.real_value, second.real_value);
    assert_eq!(store.count("Note").unwrap(), 2);
}

#[test]
fn test_client_keys_are_not_mapped() {
    let store = store();

    let mut cs = ChangeSet::new();
    cs.add(tag("rust"));
    cs.add(Entity::new("Customer").with("id", 5).with("name", "Cy"));
    let result = save(&store, cs).unwrap();

    assert!(result.is_success(), "{:?}", result.errors);
    assert!(result.key_mappings.is_empty());
}

#[test]
fn test_change_set_from_json() {
    let store = store();
    seed_customer(&store, 3);

    let cs: ChangeSet = serde_json::from_value(serde_json::json!({
        "entities": [
            {
                "entityType": "Customer",
                "state": "Modified",
                "fields": {"id": 42, "name": "Ada", "version": 4},
                "originalValues": {"version": 3}
            },
            {
                "entityType": "Order",
                "state": "Added",
                "fields": {"id": -1, "customer_id": 42}
            },
            {
                "entityType": "OrderLine",
                "state": "Added",
                "fields": {"id": -2, "order_id": -1, "quantity": 70000}
            }
        ]
    }))
    .unwrap();
    let result = save(&store, cs).unwrap();

    // quantity does not fit a small integer
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].error_name, EntityErrorKind::ValidationError);
    assert_eq!(result.errors[0].property_name.as_deref(), Some("quantity"));
    assert_eq!(store.count("Order").unwrap(), 0);
}

#[test]
fn test_save_result_serialization() {
    let store = store();
    let mut cs = ChangeSet::new();
    cs.add(todo_list(-1, "Groceries"));
    let result = save(&store, cs).unwrap();

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["changeSetId"], serde_json::json!(result.change_set_id));
    assert_eq!(
        json["keyMappings"],
        serde_json::json!([{"entityTypeName": "TodoList", "tempValue": -1, "realValue": 1}])
    );
    assert_eq!(json["entities"][0]["entityType"], "TodoList");
    assert_eq!(json["errors"], serde_json::json!([]));
}
