//! CLI argument resolution heuristics.
//!
//! Two pure algorithms, no I/O:
//!
//! 1. Splitting a flat token list into server launch arguments, a tool name
//!    and tool arguments. The command line conflates both groups without a
//!    hard separator, so the split leans on the fact that server arguments
//!    are almost always flags or paths. This is a best-effort heuristic, not
//!    a guarantee: a server argument that looks like neither a flag nor a
//!    path will be taken for a tool name.
//! 2. Coercing raw string tokens into typed values against a tool's declared
//!    input schema.

use serde_json::{Map, Value};

use crate::error::ResolveError;
use crate::mcp::protocol::{PropertySchema, ToolSchema};

/// Whether a token looks like a filesystem path rather than a tool name.
///
/// Recognizes `C:\` / `C:/` drive prefixes, `\\server\share` UNC prefixes,
/// leading `/`, `./`, `../`, `~/` (slash or backslash), and tokens that
/// arrived already quoted as a single argv entry.
pub fn is_pathish(token: &str) -> bool {
    let bytes = token.as_bytes();

    if bytes.len() >= 3 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        if bytes[2] == b'\\' || bytes[2] == b'/' {
            return true;
        }
    }
    if token.starts_with("\\\\") || token.starts_with('/') {
        return true;
    }
    for prefix in ["./", ".\\", "../", "..\\", "~/", "~\\"] {
        if token.starts_with(prefix) {
            return true;
        }
    }
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && (last == b'"' || last == b'\'') {
            return true;
        }
    }
    false
}

/// Result of splitting the flag-token list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCommand {
    pub server_args: Vec<String>,
    pub tool: Option<String>,
    pub tool_args: Vec<String>,
}

/// Split a possibly-greedy flag-token list into server launch arguments, an
/// optional tool name, and tool arguments.
///
/// An explicitly supplied tool is trusted verbatim: every flag token is a
/// server argument and the explicit tool-argument list is used unmodified.
/// Otherwise tokens are scanned left to right; flags and pathish tokens stay
/// server arguments, and the first token matching neither rule becomes the
/// tool name with everything after it the tool arguments.
pub fn split_server_args_and_tool(
    flag_args: &[String],
    explicit_tool: Option<&str>,
    explicit_tool_args: &[String],
) -> SplitCommand {
    if let Some(tool) = explicit_tool {
        return SplitCommand {
            server_args: flag_args.to_vec(),
            tool: Some(tool.to_string()),
            tool_args: explicit_tool_args.to_vec(),
        };
    }

    let mut server_args = Vec::new();
    for (i, token) in flag_args.iter().enumerate() {
        if token.starts_with('-') || is_pathish(token) {
            server_args.push(token.clone());
            continue;
        }
        return SplitCommand {
            server_args,
            tool: Some(token.clone()),
            tool_args: flag_args[i + 1..].to_vec(),
        };
    }

    SplitCommand {
        server_args,
        tool: None,
        tool_args: Vec::new(),
    }
}

/// Coerce a raw string by a property's declared type.
///
/// A failed number/integer parse falls back to the raw string so the server
/// sees the caller's token rather than a null.
pub fn coerce_by_type(raw: &str, property: Option<&PropertySchema>) -> Value {
    let prop_type = property
        .and_then(|p| p.prop_type.as_deref())
        .unwrap_or("string");

    match prop_type {
        "number" => raw
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(raw.to_string())),
        "integer" => raw
            .parse::<i64>()
            .map(|n| Value::Number(n.into()))
            .unwrap_or_else(|_| Value::String(raw.to_string())),
        "boolean" => Value::Bool(raw.eq_ignore_ascii_case("true")),
        "array" => serde_json::from_str(raw).unwrap_or_else(|_| {
            Value::Array(
                raw.split(',')
                    .map(|s| Value::String(s.trim().to_string()))
                    .collect(),
            )
        }),
        "object" => serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())),
        _ => Value::String(raw.to_string()),
    }
}

/// Resolve raw CLI tokens into a typed argument object for a tool.
///
/// `key=value` tokens are coerced immediately by the named property's type.
/// Remaining positional tokens are resolved in priority order:
///
/// 1. exactly one required property still unset: the whole remaining
///    positional sequence, space-joined, goes to it (a path argument may
///    itself contain spaces);
/// 2. a declared `path` property still unset: same space-join when it is the
///    only property, otherwise one token;
/// 3. remaining positionals map onto remaining unset properties in
///    declaration order, one token each.
///
/// Fails if any required property is still unset afterwards.
pub fn resolve_tool_args(
    schema: &ToolSchema,
    tokens: &[String],
) -> Result<Map<String, Value>, ResolveError> {
    let props = &schema.properties;
    let mut out = Map::new();
    let mut positional: Vec<&str> = Vec::new();

    for token in tokens {
        match token.find('=') {
            Some(i) if i > 0 => {
                let key = &token[..i];
                let value = &token[i + 1..];
                out.insert(key.to_string(), coerce_by_type(value, props.get(key)));
            }
            _ => positional.push(token.as_str()),
        }
    }

    let unset_required: Vec<String> = schema
        .required
        .iter()
        .filter(|r| !out.contains_key(*r))
        .cloned()
        .collect();
    if unset_required.len() == 1 && !positional.is_empty() {
        let key = &unset_required[0];
        out.insert(
            key.clone(),
            coerce_by_type(&positional.join(" "), props.get(key)),
        );
        positional.clear();
    }

    if props.contains_key("path") && !out.contains_key("path") && !positional.is_empty() {
        if props.len() == 1 {
            out.insert(
                "path".to_string(),
                coerce_by_type(&positional.join(" "), props.get("path")),
            );
            positional.clear();
        } else {
            let first = positional.remove(0);
            out.insert("path".to_string(), coerce_by_type(first, props.get("path")));
        }
    }

    let remaining: Vec<String> = props
        .keys()
        .filter(|k| !out.contains_key(*k))
        .cloned()
        .collect();
    for (key, token) in remaining.iter().zip(positional.iter()) {
        out.insert(key.clone(), coerce_by_type(token, props.get(key)));
    }

    for required in &schema.required {
        if !out.contains_key(required) {
            return Err(ResolveError::MissingRequired(required.clone()));
        }
    }

    Ok(out)
}
