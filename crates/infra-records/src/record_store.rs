// In-memory record store executing queue tasks

use async_trait::async_trait;
use deferq_core::domain::{Operation, Task};
use deferq_core::port::{ExecutionError, TaskExecutor};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

type Row = Map<String, Value>;

#[derive(Default)]
struct Table {
    next_id: u64,
    rows: BTreeMap<u64, Row>,
}

impl Table {
    fn insert(&mut self, mut row: Row) -> Row {
        self.next_id += 1;
        row.insert("id".to_string(), json!(self.next_id));
        self.rows.insert(self.next_id, row.clone());
        row
    }

    fn matching_ids(&self, filter: &Row) -> Vec<u64> {
        self.rows
            .iter()
            .filter(|(_, row)| filter.iter().all(|(key, value)| row.get(key) == Some(value)))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Reference record store: named entity tables held in memory.
///
/// Failure classification follows what a database-backed store would report:
/// unknown entities, missing ids and malformed payloads are permanent, an
/// unreachable store is transient.
pub struct InMemoryRecordStore {
    tables: Mutex<HashMap<String, Table>>,
    available: AtomicBool,
    latency: Option<Duration>,
}

impl InMemoryRecordStore {
    pub fn new<I, S>(entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tables = entities
            .into_iter()
            .map(|entity| (entity.into(), Table::default()))
            .collect();
        Self {
            tables: Mutex::new(tables),
            available: AtomicBool::new(true),
            latency: None,
        }
    }

    /// Simulated round-trip time added to every operation
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// While unavailable every operation fails with a transient error
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        info!(available, "Record store availability changed");
    }

    pub async fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rows of an entity in id order; empty for unknown entities
    pub async fn rows(&self, entity: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(entity)
            .map(|table| table.rows.values().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, entity: &str) -> usize {
        self.tables
            .lock()
            .await
            .get(entity)
            .map_or(0, |table| table.rows.len())
    }

    fn apply(table: &mut Table, operation: Operation, payload: &Value) -> Result<Value, ExecutionError> {
        match operation {
            Operation::Create => {
                let row = table.insert(object(payload, "payload")?.clone());
                Ok(json!({ "id": row["id"], "created": true, "data": row }))
            }
            Operation::Update => {
                let id = record_id(payload)?;
                let data = object(field(payload, "data")?, "data")?;
                let row = table
                    .rows
                    .get_mut(&id)
                    .ok_or_else(|| not_found(id))?;
                for (key, value) in data.iter().filter(|(key, _)| key.as_str() != "id") {
                    row.insert(key.clone(), value.clone());
                }
                Ok(json!({ "id": id, "updated": true, "data": row }))
            }
            Operation::Delete => {
                let id = record_id(payload)?;
                table.rows.remove(&id).ok_or_else(|| not_found(id))?;
                Ok(json!({ "id": id, "deleted": true }))
            }
            Operation::BulkCreate => {
                let records = field(payload, "records")?
                    .as_array()
                    .ok_or_else(|| invalid("records must be an array"))?;
                // Validate everything before inserting anything
                let rows = records
                    .iter()
                    .map(|record| object(record, "record").cloned())
                    .collect::<Result<Vec<Row>, _>>()?;
                let created: Vec<Row> = rows.into_iter().map(|row| table.insert(row)).collect();
                Ok(json!({ "created": created.len(), "records": created }))
            }
            Operation::BulkUpdate => {
                let filter = object(field(payload, "where")?, "where")?;
                let data = object(field(payload, "data")?, "data")?;
                let ids = table.matching_ids(filter);
                for id in &ids {
                    if let Some(row) = table.rows.get_mut(id) {
                        for (key, value) in data.iter().filter(|(key, _)| key.as_str() != "id") {
                            row.insert(key.clone(), value.clone());
                        }
                    }
                }
                Ok(json!({ "updated": ids.len(), "where": filter, "data": data }))
            }
            Operation::BulkDelete => {
                let filter = object(field(payload, "where")?, "where")?;
                let ids = table.matching_ids(filter);
                for id in &ids {
                    table.rows.remove(id);
                }
                Ok(json!({ "deleted": ids.len(), "where": filter }))
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for InMemoryRecordStore {
    async fn execute(&self, task: &Task) -> Result<Value, ExecutionError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.available.load(Ordering::SeqCst) {
            return Err(ExecutionError::Transient(
                "record store connection unavailable".to_string(),
            ));
        }

        let mut tables = self.tables.lock().await;
        let table = tables.get_mut(&task.entity_kind).ok_or_else(|| {
            ExecutionError::Permanent(format!("entity {} not found", task.entity_kind))
        })?;

        let result = Self::apply(table, task.operation, &task.payload)?;
        debug!(
            task_id = %task.id,
            entity = %task.entity_kind,
            operation = %task.operation,
            "Record operation applied"
        );
        Ok(json!({
            "success": true,
            "operation": task.operation.as_str(),
            "entity": task.entity_kind,
            "result": result,
        }))
    }
}

fn invalid(message: &str) -> ExecutionError {
    ExecutionError::Permanent(format!("invalid payload: {}", message))
}

fn not_found(id: u64) -> ExecutionError {
    ExecutionError::Permanent(format!("record with id {} not found", id))
}

fn field<'a>(payload: &'a Value, name: &str) -> Result<&'a Value, ExecutionError> {
    payload
        .get(name)
        .ok_or_else(|| ExecutionError::Permanent(format!("invalid payload: missing {}", name)))
}

fn object<'a>(value: &'a Value, what: &str) -> Result<&'a Row, ExecutionError> {
    value
        .as_object()
        .ok_or_else(|| ExecutionError::Permanent(format!("invalid payload: {} must be an object", what)))
}

fn record_id(payload: &Value) -> Result<u64, ExecutionError> {
    let id = field(payload, "id")?;
    id.as_u64()
        .or_else(|| id.as_str().and_then(|s| s.parse().ok()))
        .ok_or_else(|| invalid("id must be a positive integer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn task(entity: &str, operation: Operation, payload: Value) -> Task {
        Task::new("t-1", 0, "q1", entity, operation, payload, Map::new())
    }

    async fn run(store: &InMemoryRecordStore, operation: Operation, payload: Value) -> Result<Value, ExecutionError> {
        store.execute(&task("Widget", operation, payload)).await
    }

    #[tokio::test]
    async fn test_create_assigns_ids() {
        let store = InMemoryRecordStore::new(["Widget"]);

        let first = run(&store, Operation::Create, json!({"name": "a"})).await.unwrap();
        let second = run(&store, Operation::Create, json!({"name": "b"})).await.unwrap();

        assert_eq!(first["result"]["id"], 1);
        assert_eq!(second["result"]["data"], json!({"id": 2, "name": "b"}));
        assert_eq!(first["operation"], "create");
        assert_eq!(store.count("Widget").await, 2);
    }

    #[tokio::test]
    async fn test_update_merges_fields() {
        let store = InMemoryRecordStore::new(["Widget"]);
        run(&store, Operation::Create, json!({"name": "a", "color": "red"})).await.unwrap();

        let outcome = run(
            &store,
            Operation::Update,
            json!({"id": 1, "data": {"color": "blue", "id": 99}}),
        )
        .await
        .unwrap();

        assert_eq!(
            outcome["result"]["data"],
            json!({"id": 1, "name": "a", "color": "blue"})
        );
    }

    #[tokio::test]
    async fn test_missing_record_is_permanent() {
        let store = InMemoryRecordStore::new(["Widget"]);

        let err = run(&store, Operation::Delete, json!({"id": 5})).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not found"));

        let err = run(&store, Operation::Update, json!({"id": 5, "data": {"a": 1}}))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unknown_entity_is_permanent() {
        let store = InMemoryRecordStore::new(["Widget"]);
        let err = store
            .execute(&task("Gadget", Operation::Create, json!({"a": 1})))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::Permanent("entity Gadget not found".into()));
    }

    #[tokio::test]
    async fn test_unavailable_is_transient() {
        let store = InMemoryRecordStore::new(["Widget"]);
        store.set_available(false);

        let err = run(&store, Operation::Create, json!({"a": 1})).await.unwrap_err();
        assert!(err.is_retryable());

        store.set_available(true);
        assert_ok!(run(&store, Operation::Create, json!({"a": 1})).await);
    }

    #[tokio::test]
    async fn test_bulk_operations_use_equality_filters() {
        let store = InMemoryRecordStore::new(["Widget"]);
        let created = run(
            &store,
            Operation::BulkCreate,
            json!({"records": [
                {"color": "red"}, {"color": "red"}, {"color": "green"}
            ]}),
        )
        .await
        .unwrap();
        assert_eq!(created["result"]["created"], 3);

        let updated = run(
            &store,
            Operation::BulkUpdate,
            json!({"where": {"color": "red"}, "data": {"size": "L"}}),
        )
        .await
        .unwrap();
        assert_eq!(updated["result"]["updated"], 2);

        let deleted = run(
            &store,
            Operation::BulkDelete,
            json!({"where": {"size": "L"}}),
        )
        .await
        .unwrap();
        assert_eq!(deleted["result"]["deleted"], 2);
        assert_eq!(store.rows("Widget").await, vec![json!({"id": 3, "color": "green"})]);
    }

    #[tokio::test]
    async fn test_bulk_create_is_all_or_nothing() {
        let store = InMemoryRecordStore::new(["Widget"]);
        let err = run(
            &store,
            Operation::BulkCreate,
            json!({"records": [{"ok": true}, "not an object"]}),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ExecutionError::Permanent(_)));
        assert_eq!(store.count("Widget").await, 0);
    }
}
