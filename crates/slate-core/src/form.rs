use std::collections::BTreeMap;

use serde_json::{Number, Value};
use tracing::debug;

use crate::fields::{CustomField, FieldRegistry, FieldType};
use crate::task::{Priority, Status, Task};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AssignmentError {
    #[error("expected NAME=VALUE, got: {0}")]
    Malformed(String),
    #[error("unknown field: {0} (declare it with `slate field add`)")]
    UnknownField(String),
    #[error("field '{field}' expects a number, got: {value}")]
    NotANumber { field: String, value: String },
    #[error("field '{field}' expects yes or no, got: {value}")]
    NotACheckbox { field: String, value: String },
    #[error("title cannot be empty")]
    EmptyTitle,
}

/// Editable copy of a task, bound to the declared custom fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub priority: Priority,
    pub status: Status,
    pub fields: BTreeMap<String, Value>,
}

impl TaskDraft {
    /// A blank draft with every declared field at its type default.
    pub fn new(title: impl Into<String>, fields: &[CustomField]) -> Self {
        Self {
            title: title.into(),
            priority: Priority::None,
            status: Status::NotStarted,
            fields: fields
                .iter()
                .map(|field| (field.name.clone(), field.kind.default_value()))
                .collect(),
        }
    }

    pub fn from_task(task: &Task) -> Self {
        Self {
            title: task.title.clone(),
            priority: task.priority,
            status: task.status,
            fields: task.fields.clone(),
        }
    }

    pub fn assign(&mut self, field: &CustomField, raw: &str) -> Result<(), AssignmentError> {
        let value = parse_field_value(field, raw)?;
        debug!(field = %field.name, value = %value, "assigned field value");
        self.fields.insert(field.name.clone(), value);
        Ok(())
    }

    /// Apply `NAME=VALUE` assignments against the declared fields.
    pub fn apply_assignments<S: AsRef<str>>(
        &mut self,
        registry: &FieldRegistry,
        assignments: &[S],
    ) -> Result<(), AssignmentError> {
        for raw in assignments {
            let raw = raw.as_ref();
            let (name, value) = raw
                .split_once('=')
                .ok_or_else(|| AssignmentError::Malformed(raw.to_string()))?;
            let field = registry
                .find(name.trim())
                .ok_or_else(|| AssignmentError::UnknownField(name.trim().to_string()))?
                .clone();
            self.assign(&field, value)?;
        }
        Ok(())
    }

    pub fn into_task(self, id: i64) -> Result<Task, AssignmentError> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err(AssignmentError::EmptyTitle);
        }
        Ok(Task {
            id,
            title,
            priority: self.priority,
            status: self.status,
            fields: self.fields,
        })
    }
}

pub fn parse_field_value(field: &CustomField, raw: &str) -> Result<Value, AssignmentError> {
    match field.kind {
        FieldType::Text => Ok(Value::String(raw.to_string())),
        FieldType::Number => {
            let trimmed = raw.trim();
            if trimmed.is_empty() {
                return Ok(Value::from(0));
            }
            if let Ok(int) = trimmed.parse::<i64>() {
                return Ok(Value::from(int));
            }
            trimmed
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| AssignmentError::NotANumber {
                    field: field.name.clone(),
                    value: raw.to_string(),
                })
        }
        FieldType::Checkbox => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "y" | "yes" | "on" | "true" => Ok(Value::Bool(true)),
            "" | "0" | "n" | "no" | "off" | "false" => Ok(Value::Bool(false)),
            _ => Err(AssignmentError::NotACheckbox {
                field: field.name.clone(),
                value: raw.to_string(),
            }),
        },
    }
}
