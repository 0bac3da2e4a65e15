//! Tool-call dispatch.
//!
//! Bridges the remote agent's structured invocation requests to the host's
//! commit sink: validates arguments against the declared schema, commits at
//! most once per invocation id, and acknowledges every request so the peer's
//! own flow is never left hanging. The dispatcher is peer-agnostic; it never
//! assumes a particular conversational order, so duplicate or out-of-order
//! invocations are resolved by the idempotence rule alone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::EngineError;
use crate::protocol::{
    ParameterDeclaration, ToolDeclaration, ToolInvocationRequest, ToolInvocationResponse,
};

/// Where validated records go. Idempotence is the dispatcher's
/// responsibility, not the sink's; the sink sees each unique invocation id
/// at most once.
#[async_trait]
pub trait CommitSink: Send + Sync {
    async fn commit(&self, record: CommittedRecord) -> Result<(), String>;
}

/// Fully-populated payload handed to the host. Immutable once built; the
/// engine keeps no reference after `commit` returns.
#[derive(Debug, Clone)]
pub struct CommittedRecord {
    pub tool: String,
    pub fields: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Integer,
    Flag,
}

impl FieldKind {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldKind::Text => value.is_string(),
            FieldKind::Number => value.is_number(),
            FieldKind::Integer => value.is_i64() || value.is_u64(),
            FieldKind::Flag => value.is_boolean(),
        }
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            FieldKind::Text => "string",
            FieldKind::Number => "number",
            FieldKind::Integer => "integer",
            FieldKind::Flag => "boolean",
        }
    }
}

#[derive(Debug, Clone)]
pub enum FieldRequirement {
    /// Absence (or a wrong type) rejects the whole invocation.
    Required,
    /// Absence falls back to the default, or omits the field when none is
    /// declared. Never aborts the call.
    Optional { default: Option<Value> },
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub requirement: FieldRequirement,
}

/// Declared shape of one callable tool.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ToolSchema {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            requirement: FieldRequirement::Required,
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldKind, default: Option<Value>) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            requirement: FieldRequirement::Optional { default },
        });
        self
    }

    /// Wire form, transmitted once at session open.
    pub fn declaration(&self) -> ToolDeclaration {
        ToolDeclaration {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self
                .fields
                .iter()
                .map(|f| ParameterDeclaration {
                    name: f.name.clone(),
                    kind: f.kind.wire_name().to_string(),
                })
                .collect(),
            required: self
                .fields
                .iter()
                .filter(|f| matches!(f.requirement, FieldRequirement::Required))
                .map(|f| f.name.clone())
                .collect(),
        }
    }
}

pub struct ToolDispatcher {
    schemas: HashMap<String, ToolSchema>,
    sink: Arc<dyn CommitSink>,
    /// Responses already computed this session, keyed by invocation id.
    seen: HashMap<String, ToolInvocationResponse>,
}

impl ToolDispatcher {
    pub fn new(schemas: Vec<ToolSchema>, sink: Arc<dyn CommitSink>) -> Self {
        let schemas = schemas.into_iter().map(|s| (s.name.clone(), s)).collect();
        Self {
            schemas,
            sink,
            seen: HashMap::new(),
        }
    }

    /// Handle one invocation. Every request gets exactly one response; a
    /// repeated id replays the original response without touching the sink.
    pub async fn dispatch(&mut self, request: ToolInvocationRequest) -> ToolInvocationResponse {
        if let Some(previous) = self.seen.get(&request.id) {
            log::info!("Replaying response for duplicate invocation {}", request.id);
            return previous.clone();
        }
        let response = self.process(&request).await;
        self.seen.insert(request.id.clone(), response.clone());
        response
    }

    async fn process(&self, request: &ToolInvocationRequest) -> ToolInvocationResponse {
        let Some(schema) = self.schemas.get(&request.name) else {
            log::warn!(
                "Invocation {} names unknown tool '{}'",
                request.id,
                request.name
            );
            return ToolInvocationResponse::error(
                &request.id,
                &request.name,
                &format!("unknown tool '{}'", request.name),
            );
        };

        let fields = match validate(schema, &request.arguments) {
            Ok(fields) => fields,
            Err(EngineError::ValidationFailed(reason)) => {
                log::warn!("Invocation {} rejected: {}", request.id, reason);
                return ToolInvocationResponse::error(&request.id, &request.name, &reason);
            }
            Err(other) => {
                return ToolInvocationResponse::error(
                    &request.id,
                    &request.name,
                    &other.to_string(),
                );
            }
        };

        let record = CommittedRecord {
            tool: request.name.clone(),
            fields,
        };
        // The acknowledgment waits for the sink; audio and text keep flowing
        // because dispatch runs on its own queue.
        match self.sink.commit(record).await {
            Ok(()) => {
                log::info!("Committed record for invocation {}", request.id);
                ToolInvocationResponse::ok(&request.id, &request.name)
            }
            Err(reason) => {
                log::error!("Commit sink rejected invocation {}: {}", request.id, reason);
                ToolInvocationResponse::error(&request.id, &request.name, &reason)
            }
        }
    }
}

/// Check arguments against the schema, filling documented defaults for
/// optional fields. Exhaustive over the declared field set; undeclared
/// arguments are ignored.
fn validate(schema: &ToolSchema, args: &Map<String, Value>) -> Result<Map<String, Value>, EngineError> {
    let mut fields = Map::new();
    for spec in &schema.fields {
        match args.get(&spec.name) {
            Some(value) if spec.kind.matches(value) => {
                fields.insert(spec.name.clone(), value.clone());
            }
            Some(value) => match &spec.requirement {
                FieldRequirement::Required => {
                    return Err(EngineError::ValidationFailed(format!(
                        "field '{}' must be {}, got {}",
                        spec.name,
                        spec.kind.wire_name(),
                        value
                    )));
                }
                FieldRequirement::Optional { default } => {
                    log::warn!(
                        "Tool '{}' field '{}' has the wrong type, falling back to default",
                        schema.name,
                        spec.name
                    );
                    if let Some(default) = default {
                        fields.insert(spec.name.clone(), default.clone());
                    }
                }
            },
            None => match &spec.requirement {
                FieldRequirement::Required => {
                    return Err(EngineError::ValidationFailed(format!(
                        "missing required field '{}'",
                        spec.name
                    )));
                }
                FieldRequirement::Optional { default } => {
                    if let Some(default) = default {
                        fields.insert(spec.name.clone(), default.clone());
                    }
                }
            },
        }
    }
    Ok(fields)
}
