//! Query, update and sequence tests against the in-memory backend

use std::sync::Arc;

use bson::{doc, oid::ObjectId, Bson};
use bsonform_mongodb::{
    ConnectionManager, DocumentSchema, MemoryBackend, Model, OdmError, SequenceGenerator,
};
use futures::{StreamExt, TryStreamExt};

fn task_schema() -> Arc<DocumentSchema> {
    let owner = DocumentSchema::builder("Owner")
        .field("name", "str")
        .short_name("name", "n")
        .build()
        .unwrap();
    DocumentSchema::builder("Task")
        .nested(&owner)
        .database("work")
        .collection("tasks")
        .field("title", "str")
        .field("priority", "int")
        .field("owner", "Owner")
        .field("labels", "[str]")
        .required("title")
        .short_name("title", "t")
        .short_name("priority", "p")
        .short_name("owner", "o")
        .build()
        .unwrap()
}

async fn seeded() -> (MemoryBackend, Model) {
    let memory = MemoryBackend::new();
    let manager = Arc::new(ConnectionManager::new());
    manager.add_connection(Arc::new(memory.clone()), None);
    let tasks = Model::new(task_schema()).with_manager(manager);

    for (i, owner) in ["ann", "bob", "ann", "cy", "bob"].iter().enumerate() {
        let mut task = tasks.new_document();
        task.set_field("title", format!("task-{}", i)).unwrap();
        task.set_field("priority", i as i64).unwrap();
        task.set_field("owner", doc! { "name": *owner }).unwrap();
        task.save().await.unwrap();
    }
    (memory, tasks)
}

fn titles(docs: &[bsonform_mongodb::Document]) -> Vec<String> {
    docs.iter()
        .map(|d| d.get_as::<String>("title").unwrap())
        .collect()
}

// ============================================================================
// Finding
// ============================================================================

#[tokio::test]
async fn test_stored_form_uses_short_keys() {
    let (memory, _tasks) = seeded().await;
    let stored = memory.documents("work", "tasks");
    assert_eq!(stored.len(), 5);
    assert_eq!(stored[0].get_str("t").unwrap(), "task-0");
    assert_eq!(stored[0].get_document("o").unwrap(), &doc! { "n": "ann" });
}

#[tokio::test]
async fn test_find_with_sort_and_filter() {
    let (_memory, tasks) = seeded().await;
    let found = tasks
        .find(doc! { "priority": { "$gte": 2 } })
        .sort(doc! { "priority": -1 })
        .to_vec()
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["task-4", "task-3", "task-2"]);
}

#[tokio::test]
async fn test_find_through_nested_schema() {
    let (_memory, tasks) = seeded().await;
    let found = tasks
        .find(doc! { "owner.name": "ann" })
        .sort(doc! { "title": 1 })
        .to_vec()
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["task-0", "task-2"]);

    let found = tasks
        .find(doc! { "$or": [ { "owner": { "name": "cy" } }, { "priority": 0 } ] })
        .to_vec()
        .await
        .unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn test_skip_limit_and_projection() {
    let (_memory, tasks) = seeded().await;
    let found = tasks
        .find(doc! {})
        .sort(doc! { "priority": 1 })
        .skip(1)
        .limit(2)
        .projection(doc! { "title": 1 })
        .to_vec()
        .await
        .unwrap();
    assert_eq!(titles(&found), vec!["task-1", "task-2"]);
    assert!(found[0].id().is_some());
    assert!(!found[0].contains("priority"));
}

#[tokio::test]
async fn test_cursor_streams_documents() {
    let (_memory, tasks) = seeded().await;
    let mut cursor = tasks
        .find(doc! { "owner.name": "bob" })
        .cursor()
        .await
        .unwrap();

    let mut seen = 0;
    while let Some(task) = cursor.next().await {
        let task = task.unwrap();
        assert_eq!(task.get_field("owner").unwrap(), Bson::Document(doc! { "name": "bob" }));
        seen += 1;
    }
    assert_eq!(seen, 2);

    let count = tasks
        .find(doc! {})
        .cursor()
        .await
        .unwrap()
        .try_fold(0, |n, _| async move { Ok(n + 1) })
        .await
        .unwrap();
    assert_eq!(count, 5);
}

#[tokio::test]
async fn test_find_one_and_lookups_by_id() {
    let (_memory, tasks) = seeded().await;
    let first = tasks
        .find(doc! {})
        .sort(doc! { "priority": -1 })
        .first()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.get_as::<String>("title").unwrap(), "task-4");

    let id = first.id().unwrap();
    assert_eq!(tasks.find_one(id).await.unwrap(), Some(first.clone()));
    assert_eq!(tasks.get_by_id(id).await.unwrap(), Some(first.clone()));
    assert_eq!(
        tasks.get_by_id_str(&id.to_hex()).await.unwrap(),
        Some(first.clone())
    );
    assert_eq!(tasks.get_by_id_str("not-an-id").await.unwrap(), None);
    assert_eq!(tasks.get_by_id(ObjectId::new()).await.unwrap(), None);
    assert!(tasks.find_one(Bson::Null).await.unwrap().is_some());
    assert!(tasks.find_one(None::<ObjectId>).await.unwrap().is_some());
    assert!(tasks
        .find_one(doc! { "title": "missing" })
        .await
        .unwrap()
        .is_none());
}

// ============================================================================
// Updating
// ============================================================================

#[tokio::test]
async fn test_model_update_maps_operator_bodies() {
    let (memory, tasks) = seeded().await;
    let modified = tasks
        .update(
            doc! { "owner.name": "bob" },
            doc! { "$inc": { "priority": 10 }, "$set": { "owner.name": "dan" } },
        )
        .await
        .unwrap();
    assert_eq!(modified, 2);

    let moved = tasks
        .find(doc! { "owner.name": "dan", "priority": { "$gt": 10 } })
        .to_vec()
        .await
        .unwrap();
    assert_eq!(moved.len(), 2);
    assert!(memory
        .documents("work", "tasks")
        .iter()
        .all(|d| !d.contains_key("priority")));
}

#[tokio::test]
async fn test_connection_errors() {
    let unregistered = Model::new(task_schema()).with_manager(Arc::new(ConnectionManager::new()));
    let err = unregistered.find(doc! {}).to_vec().await.unwrap_err();
    assert!(matches!(err, OdmError::Connection(_)));
}

#[tokio::test]
async fn test_named_connection_routing() {
    let main = MemoryBackend::new();
    let reports = MemoryBackend::new();
    let manager = Arc::new(ConnectionManager::new());
    manager.add_connection(Arc::new(main.clone()), None);
    manager.add_connection(Arc::new(reports.clone()), Some("reports"));

    let schema = DocumentSchema::builder("Report")
        .database("analytics")
        .connection("reports")
        .field("name", "str")
        .build()
        .unwrap();
    let model = Model::new(schema).with_manager(Arc::clone(&manager));
    let mut report = model.new_document();
    report.set_field("name", "weekly").unwrap();
    report.save().await.unwrap();

    assert_eq!(reports.documents("analytics", "report").len(), 1);
    assert!(main.collection_names("analytics").is_empty());

    // an unknown connection name falls back to the default connection
    manager.remove_connection(Some("reports"));
    let mut fallback = model.new_document();
    fallback.set_field("name", "daily").unwrap();
    fallback.save().await.unwrap();
    assert_eq!(main.documents("analytics", "report").len(), 1);
}

// ============================================================================
// Sequences
// ============================================================================

#[tokio::test]
async fn test_sequence_numbers_documents() {
    let (memory, tasks) = seeded().await;
    let sequences = SequenceGenerator::new(Arc::clone(tasks.manager()));

    let mut numbers = Vec::new();
    for _ in 0..3 {
        numbers.push(
            sequences
                .next_index("task_number", "work", "counters", None)
                .await
                .unwrap(),
        );
    }
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(
        memory.documents("work", "counters")[0].get("seq"),
        Some(&Bson::Int64(3))
    );
}
