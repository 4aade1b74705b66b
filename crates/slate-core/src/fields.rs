use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::anyhow;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::task::Task;

static FIELD_NAME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").ok());

/// Keys every task already carries; a custom field may not shadow them.
const RESERVED_NAMES: [&str; 4] = ["id", "title", "priority", "status"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Checkbox,
}

impl FieldType {
    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Checkbox => "checkbox",
        }
    }

    pub fn default_value(self) -> Value {
        match self {
            FieldType::Text => Value::String(String::new()),
            FieldType::Number => Value::from(0),
            FieldType::Checkbox => Value::Bool(false),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(FieldType::Text),
            "number" => Ok(FieldType::Number),
            "checkbox" | "bool" => Ok(FieldType::Checkbox),
            other => Err(anyhow!(
                "unknown field type: {other} (expected text, number or checkbox)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomField {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FieldType,
}

/// Why a field name was refused. The display text is shown inline to the user.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FieldNameError {
    #[error("Field name is required")]
    Empty,
    #[error("Field name must be at least 2 characters")]
    TooShort,
    #[error("A field named \"{0}\" already exists")]
    Duplicate(String),
    #[error("\"{0}\" is a built-in task property")]
    Reserved(String),
    #[error("Field name must start with a letter and contain only letters, numbers and underscores")]
    InvalidPattern,
}

pub fn validate_field_name(name: &str, existing: &[CustomField]) -> Result<(), FieldNameError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(FieldNameError::Empty);
    }
    if name.chars().count() < 2 {
        return Err(FieldNameError::TooShort);
    }
    if let Some(taken) = existing
        .iter()
        .find(|field| field.name.eq_ignore_ascii_case(name))
    {
        return Err(FieldNameError::Duplicate(taken.name.clone()));
    }
    if RESERVED_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
    {
        return Err(FieldNameError::Reserved(name.to_string()));
    }
    if !FIELD_NAME_RE
        .as_ref()
        .is_some_and(|re| re.is_match(name))
    {
        return Err(FieldNameError::InvalidPattern);
    }
    Ok(())
}

/// The working list of field descriptors being edited.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldRegistry {
    fields: Vec<CustomField>,
}

impl FieldRegistry {
    pub fn new(fields: Vec<CustomField>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &[CustomField] {
        &self.fields
    }

    pub fn into_fields(self) -> Vec<CustomField> {
        self.fields
    }

    pub fn find(&self, name: &str) -> Option<&CustomField> {
        self.fields
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }

    #[tracing::instrument(skip(self))]
    pub fn add_field(
        &mut self,
        name: &str,
        kind: FieldType,
        id: i64,
    ) -> Result<&CustomField, FieldNameError> {
        validate_field_name(name, &self.fields)?;
        self.fields.push(CustomField {
            id,
            name: name.trim().to_string(),
            kind,
        });
        debug!(count = self.fields.len(), "added custom field");
        Ok(&self.fields[self.fields.len() - 1])
    }

    pub fn remove_field(&mut self, id: i64) -> bool {
        let before = self.fields.len();
        self.fields.retain(|field| field.id != id);
        before != self.fields.len()
    }
}

/// Give every task a default value for each field it lacks. Returns the
/// number of values written.
#[tracing::instrument(skip_all, fields(tasks = tasks.len(), fields = fields.len()))]
pub fn backfill(tasks: &mut [Task], fields: &[CustomField]) -> usize {
    let mut written = 0;
    for task in tasks.iter_mut() {
        for field in fields {
            if !task.fields.contains_key(&field.name) {
                task.fields
                    .insert(field.name.clone(), field.kind.default_value());
                written += 1;
            }
        }
    }
    if written > 0 {
        info!(written, "backfilled custom field values");
    }
    written
}
