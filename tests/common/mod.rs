#![allow(dead_code)]

use saveset::core::ComputedValue;
use saveset::storage::UuidKeyGenerator;
use saveset::{
    DataType, Entity, EntityTypeDescriptor, FieldDescriptor, InMemoryStore, KeyGeneration,
    Metadata, StoreConfig,
};
use std::sync::Arc;

/// Catalog shared by the integration suites
pub fn metadata() -> Metadata {
    Metadata::new()
        .with_type(
            EntityTypeDescriptor::new("TodoList")
                .field(FieldDescriptor::new("id", DataType::Integer))
                .field(FieldDescriptor::new("title", DataType::Text).not_null().max_length(40))
                .key("id")
                .generated_by(KeyGeneration::Identity),
        )
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("TodoItem")
                    .field(FieldDescriptor::new("id", DataType::Integer))
                    .field(FieldDescriptor::new("list_id", DataType::Integer).not_null())
                    .field(FieldDescriptor::new("description", DataType::Text).not_null())
                    .field(FieldDescriptor::new("done", DataType::Boolean))
                    .key("id")
                    .generated_by(KeyGeneration::Identity)
                    .foreign_key("list", "list_id", "TodoList"),
            )
        })
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("Customer")
                    .field(FieldDescriptor::new("id", DataType::Integer))
                    .field(FieldDescriptor::new("name", DataType::Text).not_null())
                    .field(FieldDescriptor::new("email", DataType::Text).email())
                    .field(FieldDescriptor::new("version", DataType::SmallInt))
                    .field(
                        FieldDescriptor::new("created_at", DataType::Timestamp)
                            .not_null()
                            .computed(ComputedValue::CreatedAt),
                    )
                    .field(
                        FieldDescriptor::new("updated_at", DataType::Timestamp)
                            .computed(ComputedValue::UpdatedAt),
                    )
                    .key("id")
                    .version("version"),
            )
        })
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("Order")
                    .field(FieldDescriptor::new("id", DataType::Integer))
                    .field(FieldDescriptor::new("customer_id", DataType::Integer))
                    .key("id")
                    .generated_by(KeyGeneration::Identity)
                    .foreign_key("customer", "customer_id", "Customer"),
            )
        })
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("OrderLine")
                    .field(FieldDescriptor::new("id", DataType::Integer))
                    .field(FieldDescriptor::new("order_id", DataType::Integer))
                    .field(FieldDescriptor::new("quantity", DataType::SmallInt))
                    .key("id")
                    .generated_by(KeyGeneration::Identity)
                    .foreign_key("order", "order_id", "Order"),
            )
        })
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("Tag")
                    .field(FieldDescriptor::new("code", DataType::Text))
                    .field(FieldDescriptor::new("label", DataType::Text))
                    .key("code"),
            )
        })
        .and_then(|m| {
            m.with_type(
                EntityTypeDescriptor::new("Note")
                    .field(FieldDescriptor::new("id", DataType::Uuid))
                    .field(FieldDescriptor::new("body", DataType::Text))
                    .key("id")
                    .generated_by(KeyGeneration::KeyGenerator),
            )
        })
        .unwrap()
}

pub fn store() -> InMemoryStore {
    InMemoryStore::new(metadata()).unwrap()
}

pub fn uuid_store() -> InMemoryStore {
    InMemoryStore::with_key_generator(metadata(), StoreConfig::default(), Arc::new(UuidKeyGenerator))
        .unwrap()
}

pub fn todo_list(id: i64, title: &str) -> Entity {
    Entity::new("TodoList").with("id", id).with("title", title)
}

pub fn todo_item(id: i64, list_id: i64, description: &str) -> Entity {
    Entity::new("TodoItem")
        .with("id", id)
        .with("list_id", list_id)
        .with("description", description)
}

pub fn tag(code: &str) -> Entity {
    Entity::new("Tag").with("code", code)
}

/// Committed customer 42 at `version`
pub fn seed_customer(store: &InMemoryStore, version: i64) {
    store
        .seed(
            Entity::new("Customer")
                .with("id", 42)
                .with("name", "Ada")
                .with("version", version),
        )
        .unwrap();
}

/// Committed order 7 with line 99
pub fn seed_order(store: &InMemoryStore) {
    store.seed(Entity::new("Order").with("id", 7)).unwrap();
    store
        .seed(
            Entity::new("OrderLine")
                .with("id", 99)
                .with("order_id", 7)
                .with("quantity", 1),
        )
        .unwrap();
}
