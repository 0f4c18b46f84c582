// Enqueue request and boundary validation


use crate::domain::{Operation, Task};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Queue names double as file names under the persistence root
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Deeper payloads are rejected before they reach the queue
pub const MAX_PAYLOAD_DEPTH: usize = 32;

/// Enqueue request as received from the submission interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub entity_kind: String,
    pub operation: String,
    pub payload: Value,

    #[serde(default)]
    pub options: Map<String, Value>,
}

impl EnqueueRequest {
    pub fn new(entity_kind: impl Into<String>, operation: impl Into<String>, payload: Value) -> Self {
        Self {
            entity_kind: entity_kind.into(),
            operation: operation.into(),
            payload,
            options: Map::new(),
        }
    }

    pub fn with_options(mut self, options: Map<String, Value>) -> Self {
        self.options = options;
        self
    }

    /// Build the pending task for this request (call `validate_request` first)
    pub(crate) fn into_task(
        self,
        id: String,
        created_at: i64,
        queue_name: &str,
        operation: Operation,
    ) -> Task {
        Task::new(
            id,
            created_at,
            queue_name,
            self.entity_kind.trim(),
            operation,
            self.payload,
            self.options,
        )
    }
}

/// Validate a queue name: 1-64 chars of ASCII alphanumerics, `_` or `-`
pub fn validate_queue_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(AppError::Validation("Queue name cannot be empty".to_string()));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(AppError::Validation(format!(
            "Queue name too long: {} chars (max {})",
            name.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(AppError::Validation(format!(
            "Queue name must be alphanumeric with '_' or '-': {}",
            name
        )));
    }
    Ok(())
}

/// Validate an enqueue request, returning the parsed operation.
///
/// Nothing is persisted for a rejected request.
pub fn validate_request(req: &EnqueueRequest) -> Result<Operation> {
    if req.entity_kind.trim().is_empty() {
        return Err(AppError::Validation("Entity kind is required".to_string()));
    }
    if req.operation.trim().is_empty() {
        return Err(AppError::Validation("Operation is required".to_string()));
    }
    let operation: Operation = req
        .operation
        .parse()
        .map_err(|_| AppError::UnsupportedOperation(req.operation.clone()))?;

    if is_empty_payload(&req.payload) {
        return Err(AppError::Validation("Task payload is required".to_string()));
    }
    let depth = json_depth(&req.payload);
    if depth > MAX_PAYLOAD_DEPTH {
        return Err(AppError::Validation(format!(
            "Payload too deeply nested: depth {} (max {})",
            depth, MAX_PAYLOAD_DEPTH
        )));
    }
    Ok(operation)
}

fn is_empty_payload(payload: &Value) -> bool {
    match payload {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(fields) => 1 + fields.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}
