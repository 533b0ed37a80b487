//! Payload validation
//!
//! Turns a raw Jira issue payload into a typed [`Issue`]. Either a complete
//! issue comes out or nothing does; partially parsed issues are never
//! returned.

use crate::config::validate_project_key;
use crate::model::{
    is_issue_key, parse_timestamp, project_from_key, Attributes, Comment, Issue, IssueFields,
};
use crate::telemetry::MetricsReporter;
use crate::HarvestContext;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Machine-readable category of a validation failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    MissingField,
    WrongType,
    BadTimestamp,
}

impl ValidationErrorKind {
    /// Label used in logs and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorKind::MissingField => "missing_field",
            ValidationErrorKind::WrongType => "wrong_type",
            ValidationErrorKind::BadTimestamp => "bad_timestamp",
        }
    }
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that does not match the expected issue shape
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} at '{field}': {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    /// Dotted path of the offending field
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn missing(field: impl Into<String>) -> Self {
        Self {
            kind: ValidationErrorKind::MissingField,
            field: field.into(),
            message: "required field is missing".to_string(),
        }
    }

    fn wrong_type(field: impl Into<String>, expected: &str, found: &Value) -> Self {
        Self {
            kind: ValidationErrorKind::WrongType,
            field: field.into(),
            message: format!("expected {}, found {}", expected, json_type_name(found)),
        }
    }

    fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: ValidationErrorKind::WrongType,
            field: field.into(),
            message: message.into(),
        }
    }

    fn bad_timestamp(field: impl Into<String>, raw: &str) -> Self {
        Self {
            kind: ValidationErrorKind::BadTimestamp,
            field: field.into(),
            message: format!("cannot parse timestamp '{}'", raw),
        }
    }
}

/// How validation failures are handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Return the error to the caller
    Strict,
    /// Log, count and drop the payload
    #[default]
    Lenient,
}

/// Validates raw issue payloads
pub struct Validator {
    mode: ValidationMode,
    metrics: Arc<dyn MetricsReporter>,
}

impl Validator {
    pub fn new(mode: ValidationMode, metrics: Arc<dyn MetricsReporter>) -> Self {
        Self { mode, metrics }
    }

    /// Builds a validator from `[validation] strict`
    pub fn from_context(ctx: &HarvestContext) -> Self {
        let mode = if ctx.config.validation.strict {
            ValidationMode::Strict
        } else {
            ValidationMode::Lenient
        };
        Self::new(mode, Arc::clone(&ctx.metrics))
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validates a payload
    ///
    /// # Returns
    ///
    /// * `Ok(Some(issue))` - The payload is a valid issue
    /// * `Ok(None)` - Invalid payload dropped (lenient mode)
    /// * `Err(ValidationError)` - Invalid payload (strict mode)
    pub fn validate(&self, payload: &Value) -> Result<Option<Issue>, ValidationError> {
        match parse_issue(payload) {
            Ok(issue) => Ok(Some(issue)),
            Err(err) => {
                let key = payload.get("key").and_then(Value::as_str).unwrap_or("");
                let project = payload_project(payload);

                match self.mode {
                    ValidationMode::Strict => Err(err),
                    ValidationMode::Lenient => {
                        tracing::warn!(
                            issue_key = key,
                            project = %project,
                            kind = err.kind.as_str(),
                            field = %err.field,
                            "Dropping invalid issue payload: {}",
                            err.message
                        );
                        self.metrics
                            .record_validation_error(&project, err.kind.as_str());
                        Ok(None)
                    }
                }
            }
        }
    }
}

/// Parses a Jira issue payload into an [`Issue`]
///
/// Required: `key`, `fields.summary`, `fields.created`, `fields.updated`,
/// and `created` on every comment. Nested objects that are absent or `null`
/// become empty [`Attributes`]. The key and project key end up in storage
/// paths, so both must have the Jira key shape.
pub fn parse_issue(payload: &Value) -> Result<Issue, ValidationError> {
    let key = required_str(payload, "key", "key")?;
    if key.is_empty() {
        return Err(ValidationError::missing("key"));
    }
    if !is_issue_key(key) {
        return Err(ValidationError::malformed(
            "key",
            format!("'{}' is not a Jira issue key", key),
        ));
    }

    let fields = match payload.get("fields") {
        None | Some(Value::Null) => return Err(ValidationError::missing("fields")),
        Some(v @ Value::Object(_)) => v,
        Some(other) => return Err(ValidationError::wrong_type("fields", "object", other)),
    };

    let issue_fields = IssueFields {
        summary: required_str(fields, "summary", "fields.summary")?.to_string(),
        description: optional_str(fields, "description", "fields.description")?,
        created: required_timestamp(fields, "created", "fields.created")?,
        updated: required_timestamp(fields, "updated", "fields.updated")?,
        status: attributes(fields, "status"),
        priority: attributes(fields, "priority"),
        assignee: attributes(fields, "assignee"),
        reporter: attributes(fields, "reporter"),
        issue_type: attributes(fields, "issuetype"),
        resolution: attributes(fields, "resolution"),
        resolution_date: optional_timestamp(fields, "resolutiondate", "fields.resolutiondate")?,
    };

    let project = match attributes(fields, "project").key() {
        "" => project_from_key(key).unwrap_or("").to_string(),
        explicit => {
            if validate_project_key(explicit).is_err() {
                return Err(ValidationError::malformed(
                    "fields.project.key",
                    format!("'{}' is not a Jira project key", explicit),
                ));
            }
            explicit.to_string()
        }
    };

    Ok(Issue {
        key: key.to_string(),
        project,
        fields: issue_fields,
        comments: parse_comments(fields)?,
    })
}

fn parse_comments(fields: &Value) -> Result<Vec<Comment>, ValidationError> {
    let list = match fields.get("comment").and_then(|c| c.get("comments")) {
        None | Some(Value::Null) => return Ok(Vec::new()),
        Some(Value::Array(items)) => items,
        Some(other) => {
            return Err(ValidationError::wrong_type(
                "fields.comment.comments",
                "array",
                other,
            ))
        }
    };

    let mut comments = Vec::with_capacity(list.len());
    for (i, raw) in list.iter().enumerate() {
        let path = format!("fields.comment.comments[{}]", i);
        if !raw.is_object() {
            return Err(ValidationError::wrong_type(path, "object", raw));
        }

        // Jira sends comment ids as strings, some mirrors as numbers
        let id = match raw.get("id") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(other) => {
                return Err(ValidationError::wrong_type(
                    format!("{}.id", path),
                    "string",
                    other,
                ))
            }
        };

        comments.push(Comment {
            id,
            author: attributes(raw, "author"),
            body: optional_str(raw, "body", &format!("{}.body", path))?.unwrap_or_default(),
            created: required_timestamp(raw, "created", &format!("{}.created", path))?,
            updated: optional_timestamp(raw, "updated", &format!("{}.updated", path))?,
        });
    }

    Ok(comments)
}

fn required_str<'a>(obj: &'a Value, name: &str, path: &str) -> Result<&'a str, ValidationError> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(ValidationError::missing(path)),
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(ValidationError::wrong_type(path, "string", other)),
    }
}

fn optional_str(obj: &Value, name: &str, path: &str) -> Result<Option<String>, ValidationError> {
    match obj.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(ValidationError::wrong_type(path, "string", other)),
    }
}

fn required_timestamp(
    obj: &Value,
    name: &str,
    path: &str,
) -> Result<DateTime<Utc>, ValidationError> {
    let raw = required_str(obj, name, path)?;
    parse_timestamp(raw).ok_or_else(|| ValidationError::bad_timestamp(path, raw))
}

fn optional_timestamp(
    obj: &Value,
    name: &str,
    path: &str,
) -> Result<Option<DateTime<Utc>>, ValidationError> {
    match optional_str(obj, name, path)? {
        None => Ok(None),
        Some(raw) => parse_timestamp(&raw)
            .map(Some)
            .ok_or_else(|| ValidationError::bad_timestamp(path, &raw)),
    }
}

fn attributes(obj: &Value, name: &str) -> Attributes {
    obj.get(name).map(Attributes::from_value).unwrap_or_default()
}

/// Best-effort project of a payload, for labelling errors
fn payload_project(payload: &Value) -> String {
    let explicit = payload
        .pointer("/fields/project/key")
        .and_then(Value::as_str)
        .unwrap_or("");
    if !explicit.is_empty() {
        return explicit.to_string();
    }
    payload
        .get("key")
        .and_then(Value::as_str)
        .and_then(project_from_key)
        .unwrap_or("unknown")
        .to_string()
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
