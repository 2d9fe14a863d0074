//! Tool dispatch: JSON arguments in, engine calls out
//!
//! Unknown fields are ignored. Integer-declared fields accept any JSON
//! number and truncate. A missing required field is InvalidArgument.

use serde_json::{json, Value};

use crate::curation;
use crate::engine::MemoryEngine;
use crate::error::{PhloemError, Result};
use crate::types::BlendOptions;

use super::protocol::{
    methods, InitializeResult, McpHandler, McpRequest, McpResponse, ToolCallResult,
};
use super::tools::tool_definitions;

/// Routes MCP requests to the engine
pub struct ToolRouter {
    engine: MemoryEngine,
}

impl ToolRouter {
    pub fn new(engine: MemoryEngine) -> Self {
        Self { engine }
    }

    fn dispatch(&self, name: &str, args: &Value) -> Result<ToolCallResult> {
        match name {
            "remember" => self.tool_remember(args),
            "recall" => self.tool_recall(args),
            "forget" => {
                let id = req_str(args, "id")?;
                self.engine.forget(&id)?;
                Ok(ToolCallResult::json(&json!({ "forgotten": id })))
            }
            "list_memories" => {
                let limit = opt_usize(args, "limit").unwrap_or(20);
                let tags = opt_str_vec(args, "tags");
                let memories = self.engine.list(limit, tags.as_deref())?;
                Ok(ToolCallResult::json(&json!({
                    "count": memories.len(),
                    "memories": summaries(&memories),
                })))
            }
            "memory_stats" => Ok(ToolCallResult::json(&self.engine.stats()?)),
            "session_context" => {
                let hint = opt_str(args, "hint");
                let report = self.engine.session_context(hint.as_deref())?;
                Ok(ToolCallResult::json(&report))
            }
            "add_citation" => {
                let citation = self.engine.add_citation(
                    &req_str(args, "memory_id")?,
                    &req_str(args, "file_path")?,
                    req_u32(args, "start_line")?,
                    req_u32(args, "end_line")?,
                    opt_str(args, "commit").as_deref(),
                    opt_str(args, "snapshot").as_deref(),
                )?;
                Ok(ToolCallResult::json(&citation))
            }
            "verify_citation" => {
                let outcome = self.engine.verify_citation(&req_str(args, "id")?)?;
                Ok(ToolCallResult::json(&json!({
                    "citation": outcome.citation,
                    "valid": outcome.valid,
                    "reason": outcome.reason,
                })))
            }
            "get_citations" => {
                let citations = self.engine.get_citations(&req_str(args, "memory_id")?)?;
                Ok(ToolCallResult::json(&json!({ "citations": citations })))
            }
            "verify_memory" => {
                let memory_id = req_str(args, "memory_id")?;
                let outcomes = self.engine.verify_memory(&memory_id)?;
                let confidence = self.engine.memory_confidence(&memory_id)?;
                let results: Vec<Value> = outcomes
                    .iter()
                    .map(|o| {
                        json!({
                            "citation_id": o.citation.id,
                            "file_path": o.citation.file_path,
                            "valid": o.valid,
                            "confidence": o.citation.confidence,
                            "reason": o.reason,
                        })
                    })
                    .collect();
                Ok(ToolCallResult::json(&json!({
                    "memory_id": memory_id,
                    "confidence": confidence,
                    "citations": results,
                })))
            }
            "causal_query" => self.tool_causal_query(args),
            "compose" => {
                let queries = opt_str_vec(args, "queries").ok_or_else(|| {
                    PhloemError::InvalidArgument("missing required field: queries".to_string())
                })?;
                let limit = opt_usize(args, "limit").unwrap_or(5);
                let result = self.engine.compose(&queries, limit)?;
                Ok(ToolCallResult::json(&json!({
                    "memories": summaries(&result.memories),
                    "explanation": result.explanation,
                })))
            }
            "prefetch" | "prefetch_suggest" => {
                let context = req_str(args, "context")?;
                let limit = opt_usize(args, "limit").unwrap_or(5);
                let memories = self.engine.prefetch(&context, limit)?;
                Ok(ToolCallResult::json(&json!({
                    "count": memories.len(),
                    "memories": summaries(&memories),
                })))
            }
            "dream" => self.tool_dream(args),
            other => Err(PhloemError::InvalidArgument(format!(
                "unknown tool: {}",
                other
            ))),
        }
    }

    fn tool_remember(&self, args: &Value) -> Result<ToolCallResult> {
        let content = req_str(args, "content")?;
        let tags = opt_str_vec(args, "tags").unwrap_or_default();
        let context = opt_str(args, "context");
        let scope = opt_str(args, "scope");

        let memory = self
            .engine
            .remember(&content, &tags, context.as_deref(), scope.as_deref())?;

        let mut citations = Vec::new();
        if let Some(supplied) = args.get("citations").and_then(|v| v.as_array()) {
            for entry in supplied {
                let citation = self.engine.add_citation(
                    &memory.id,
                    &req_str(entry, "file_path")?,
                    req_u32(entry, "start_line")?,
                    req_u32(entry, "end_line")?,
                    opt_str(entry, "commit").as_deref(),
                    opt_str(entry, "snapshot").as_deref(),
                )?;
                citations.push(citation.id);
            }
        }

        Ok(ToolCallResult::json(&json!({
            "id": memory.id,
            "tags": memory.tags,
            "created_at": memory.created_at,
            "citations": citations,
        })))
    }

    fn tool_recall(&self, args: &Value) -> Result<ToolCallResult> {
        let query = req_str(args, "query")?;
        let limit = opt_usize(args, "limit").unwrap_or(5);
        let tags = opt_str_vec(args, "tags");
        let scope = opt_str(args, "scope");

        let has_filters = tags.as_deref().map(|t| !t.is_empty()).unwrap_or(false) || scope.is_some();
        let memories = if has_filters {
            self.engine
                .recall(&query, limit, tags.as_deref(), scope.as_deref())?
        } else {
            self.engine
                .recall_blended(&query, limit, &BlendOptions::default())?
        };

        Ok(ToolCallResult::json(&json!({
            "count": memories.len(),
            "memories": summaries(&memories),
        })))
    }

    fn tool_causal_query(&self, args: &Value) -> Result<ToolCallResult> {
        let id = req_str(args, "id")?;
        let query_type = opt_str(args, "type").unwrap_or_else(|| "neighbors".to_string());

        match query_type.as_str() {
            "neighbors" => {
                let neighbors = self.engine.causal_neighbors(&id)?;
                Ok(ToolCallResult::json(&json!({
                    "id": id,
                    "neighbors": summaries(&neighbors),
                })))
            }
            "affected" => {
                let affected = self.engine.affected_if_changed(&id)?;
                Ok(ToolCallResult::json(&json!({
                    "id": id,
                    "affected": affected,
                })))
            }
            other => Err(PhloemError::InvalidArgument(format!(
                "unknown causal query type: {}",
                other
            ))),
        }
    }

    fn tool_dream(&self, args: &Value) -> Result<ToolCallResult> {
        match opt_usize(args, "max_age_days") {
            Some(days) => {
                let factor = args
                    .get("factor")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(0.9) as f32;
                let decayed = curation::dream_once(
                    &self.engine,
                    chrono::Duration::days(days as i64),
                    factor,
                )?;
                Ok(ToolCallResult::json(&json!({ "decayed_citations": decayed })))
            }
            None => {
                let report = curation::run_nightly(&self.engine)?;
                Ok(ToolCallResult::json(&report))
            }
        }
    }
}

impl McpHandler for ToolRouter {
    fn handle_request(&self, request: McpRequest) -> Option<McpResponse> {
        match request.method.as_str() {
            methods::INITIALIZE => Some(McpResponse::success(
                request.id,
                serde_json::to_value(InitializeResult::default()).unwrap_or(Value::Null),
            )),
            methods::INITIALIZED => None,
            methods::LIST_TOOLS => Some(McpResponse::success(
                request.id,
                json!({ "tools": tool_definitions() }),
            )),
            methods::CALL_TOOL => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let empty = json!({});
                let args = request.params.get("arguments").unwrap_or(&empty);

                let response = match self.dispatch(&name, args) {
                    Ok(result) => McpResponse::success(
                        request.id,
                        serde_json::to_value(result).unwrap_or(Value::Null),
                    ),
                    Err(e) => McpResponse::from_error(request.id, e),
                };
                Some(response)
            }
            other => Some(McpResponse::error(
                request.id,
                -32601,
                format!("Method not found: {}", other),
            )),
        }
    }
}

/// Compact memory rendering for tool responses
fn summaries(memories: &[crate::types::Memory]) -> Vec<Value> {
    memories
        .iter()
        .map(|m| {
            json!({
                "id": m.id,
                "content": m.content,
                "tags": m.tags,
                "scope": m.scope,
                "created_at": m.created_at,
                "utility_score": m.utility_score,
                "source": m.source,
            })
        })
        .collect()
}

fn req_str(args: &Value, key: &str) -> Result<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| PhloemError::InvalidArgument(format!("missing required field: {}", key)))
}

fn opt_str(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.is_empty())
}

/// Integer fields accept any JSON number, truncated
fn opt_usize(args: &Value, key: &str) -> Option<usize> {
    let value = args.get(key)?;
    if let Some(n) = value.as_u64() {
        return Some(n as usize);
    }
    value.as_f64().map(|f| f.max(0.0) as usize)
}

fn req_u32(args: &Value, key: &str) -> Result<u32> {
    let value = args
        .get(key)
        .ok_or_else(|| PhloemError::InvalidArgument(format!("missing required field: {}", key)))?;
    if let Some(n) = value.as_u64() {
        return Ok(n as u32);
    }
    value
        .as_f64()
        .map(|f| f.max(0.0) as u32)
        .ok_or_else(|| PhloemError::InvalidArgument(format!("field {} must be a number", key)))
}

fn opt_str_vec(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key).and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    })
}
