//! Line-delimited JSON-RPC framing.
//!
//! Requests go out as one JSON object per line. Incoming lines are classified
//! into responses (matched by id), unsolicited messages, or noise.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use toolwire_core::ToolDescriptor;

pub const JSONRPC_VERSION: &str = "2.0";

/// Standard JSON-RPC error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Outgoing request.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
    pub const fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            method,
            params,
        }
    }

    /// Serialize as a single newline-terminated line.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// `error` member of a response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl JsonRpcError {
    /// Read an error object, keeping whatever is usable from odd shapes.
    fn from_value(value: Value) -> Self {
        match value {
            Value::String(message) => Self {
                code: error_codes::INTERNAL_ERROR,
                message,
                data: None,
            },
            other => serde_json::from_value(other.clone()).unwrap_or_else(|_| Self {
                code: error_codes::INTERNAL_ERROR,
                message: other.to_string(),
                data: Some(other),
            }),
        }
    }
}

/// Payload of a response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Result(Value),
    Error(JsonRpcError),
}

/// A decoded incoming line.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    Response { id: u64, body: ResponseBody },
    /// Carries a `method`: a notification or a request from the provider.
    Notification { method: String },
    Unrecognized(String),
}

impl IncomingMessage {
    pub fn classify(value: Value) -> Self {
        let Value::Object(mut object) = value else {
            return Self::Unrecognized("message is not a JSON object".to_string());
        };

        if let Some(method) = object.get("method").and_then(Value::as_str) {
            return Self::Notification {
                method: method.to_string(),
            };
        }

        let Some(raw_id) = object.get("id") else {
            return Self::Unrecognized("message has no id".to_string());
        };
        let Some(id) = parse_id(raw_id) else {
            return Self::Unrecognized(format!("unsupported id {raw_id}"));
        };

        let body = match object.remove("error") {
            Some(error) if !error.is_null() => ResponseBody::Error(JsonRpcError::from_value(error)),
            _ => ResponseBody::Result(object.remove("result").unwrap_or(Value::Null)),
        };
        Self::Response { id, body }
    }
}

fn parse_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read a discovery result.
///
/// Accepts a list of descriptors, a list of bare names, or an object with a
/// `tools` list. Entries without a usable name and repeated names are skipped.
pub fn parse_tool_list(server: &str, result: Value) -> Result<Vec<ToolDescriptor>, String> {
    let items = match result {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("tools") {
            Some(Value::Array(items)) => items,
            _ => return Err("discovery result object has no 'tools' list".to_string()),
        },
        other => return Err(format!("unexpected discovery result: {other}")),
    };

    let mut tools: Vec<ToolDescriptor> = Vec::with_capacity(items.len());
    for item in items {
        let Some(tool) = parse_tool(server, item) else {
            tracing::warn!(server = %server, "Skipping discovered tool without a name");
            continue;
        };
        if tools.iter().any(|t| t.name == tool.name) {
            tracing::warn!(server = %server, tool = %tool.name, "Skipping duplicate tool name");
            continue;
        }
        tools.push(tool);
    }
    Ok(tools)
}

fn parse_tool(server: &str, item: Value) -> Option<ToolDescriptor> {
    match item {
        Value::String(name) if !name.trim().is_empty() => Some(ToolDescriptor::new(name, server)),
        Value::Object(mut object) => {
            let name = take_string(&mut object, "name").or_else(|| take_string(&mut object, "tool"))?;
            if name.trim().is_empty() {
                return None;
            }
            let mut tool = ToolDescriptor::new(name, server);
            tool.description = take_string(&mut object, "description");
            tool.input_schema = object
                .remove("inputSchema")
                .or_else(|| object.remove("input_schema"))
                .filter(|schema| !schema.is_null());
            Some(tool)
        }
        _ => None,
    }
}

fn take_string(object: &mut Map<String, Value>, key: &str) -> Option<String> {
    match object.remove(key) {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}
