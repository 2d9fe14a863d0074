//! Tool definitions for the MCP surface

use serde_json::Value;

use super::protocol::ToolDefinition;

/// All tool definitions: (name, description, input schema)
pub const TOOL_DEFINITIONS: &[(&str, &str, &str)] = &[
    (
        "remember",
        "Store a memory. Deduplicates on identical content within a scope, merging tags.",
        r#"{
            "type": "object",
            "properties": {
                "content": {"type": "string", "description": "The content to remember"},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Tags for categorization"},
                "context": {"type": "string", "description": "Free-form context for the memory"},
                "scope": {"type": "string", "description": "Optional namespace, typically a repository"},
                "citations": {
                    "type": "array",
                    "description": "File/line anchors backing this memory",
                    "items": {
                        "type": "object",
                        "properties": {
                            "file_path": {"type": "string"},
                            "start_line": {"type": "integer"},
                            "end_line": {"type": "integer"},
                            "commit": {"type": "string"},
                            "snapshot": {"type": "string"}
                        },
                        "required": ["file_path", "start_line", "end_line"]
                    }
                }
            },
            "required": ["content"]
        }"#,
    ),
    (
        "recall",
        "Retrieve memories ranked against a query. Uses blended ranking (semantic + recency + importance + confidence) unless tags are given.",
        r#"{
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "What to look for"},
                "limit": {"type": "integer", "default": 5},
                "tags": {"type": "array", "items": {"type": "string"}, "description": "Restrict to memories bearing at least one of these tags"},
                "scope": {"type": "string", "description": "Restrict to a scope"}
            },
            "required": ["query"]
        }"#,
    ),
    (
        "forget",
        "Delete a memory and its citations and edges",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory id"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "list_memories",
        "List memories, newest first",
        r#"{
            "type": "object",
            "properties": {
                "limit": {"type": "integer", "default": 20, "description": "0 means no limit"},
                "tags": {"type": "array", "items": {"type": "string"}}
            }
        }"#,
    ),
    (
        "memory_stats",
        "Counts, database size and last activity",
        r#"{
            "type": "object",
            "properties": {}
        }"#,
    ),
    (
        "session_context",
        "Composed session-start briefing: hint-relevant, recent, and critical memories",
        r#"{
            "type": "object",
            "properties": {
                "hint": {"type": "string", "description": "Topic to bias the briefing towards"}
            }
        }"#,
    ),
    (
        "add_citation",
        "Anchor a memory to a file/line range",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"},
                "file_path": {"type": "string"},
                "start_line": {"type": "integer", "description": "1-indexed"},
                "end_line": {"type": "integer", "description": "Inclusive, 1-indexed"},
                "commit": {"type": "string"},
                "snapshot": {"type": "string", "description": "The cited lines at anchor time"}
            },
            "required": ["memory_id", "file_path", "start_line", "end_line"]
        }"#,
    ),
    (
        "verify_citation",
        "Re-check a citation against the current file contents",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Citation id"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "get_citations",
        "List the citations of a memory",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"}
            },
            "required": ["memory_id"]
        }"#,
    ),
    (
        "verify_memory",
        "Verify every citation of a memory and report aggregate confidence",
        r#"{
            "type": "object",
            "properties": {
                "memory_id": {"type": "string"}
            },
            "required": ["memory_id"]
        }"#,
    ),
    (
        "causal_query",
        "Query the causal graph around a memory",
        r#"{
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "Memory id"},
                "type": {"type": "string", "enum": ["neighbors", "affected"], "default": "neighbors"}
            },
            "required": ["id"]
        }"#,
    ),
    (
        "compose",
        "Merge recall over several queries, keeping each memory's best similarity",
        r#"{
            "type": "object",
            "properties": {
                "queries": {"type": "array", "items": {"type": "string"}},
                "limit": {"type": "integer", "default": 5}
            },
            "required": ["queries"]
        }"#,
    ),
    (
        "prefetch",
        "Recall against a context string before it is needed. Limit clamps to [1, 20].",
        r#"{
            "type": "object",
            "properties": {
                "context": {"type": "string"},
                "limit": {"type": "integer", "default": 5}
            },
            "required": ["context"]
        }"#,
    ),
    (
        "prefetch_suggest",
        "Alias of prefetch for clients that suggest context proactively",
        r#"{
            "type": "object",
            "properties": {
                "context": {"type": "string"},
                "limit": {"type": "integer", "default": 5}
            },
            "required": ["context"]
        }"#,
    ),
    (
        "dream",
        "Run the curation pass: decay citations, re-score utility, link similar memories",
        r#"{
            "type": "object",
            "properties": {
                "max_age_days": {"type": "integer", "description": "Run only the windowed decay over citations older than this"},
                "factor": {"type": "number", "description": "Decay multiplier for the windowed mode (0, 1]"}
            }
        }"#,
    ),
];

/// Materialize the definitions for tools/list
pub fn tool_definitions() -> Vec<ToolDefinition> {
    TOOL_DEFINITIONS
        .iter()
        .map(|(name, description, schema)| ToolDefinition {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: serde_json::from_str::<Value>(schema).unwrap_or(Value::Null),
        })
        .collect()
}
