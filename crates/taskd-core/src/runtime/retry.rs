//! Error classification and retry policy.
//!
//! Runner failures arrive as free-form text or JSON-shaped payloads. They
//! are normalized to a single lowercase string, mapped onto a fixed
//! taxonomy with first-match substring rules, and the taxonomy decides
//! retry versus permanent failure.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Base backoff delay in seconds; doubles per consumed retry.
const BACKOFF_BASE_SECS: u64 = 30;

/// Backoff ceiling in seconds.
const BACKOFF_MAX_SECS: u64 = 600;

/// Closed taxonomy for runner failures, persisted in the `error_type`
/// column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    RateLimit,
    ContextExceeded,
    AgentNotFound,
    ToolResultMissing,
    ThinkingBlockError,
    Timeout,
    DependencyFailed,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::ContextExceeded => "context_exceeded",
            ErrorKind::AgentNotFound => "agent_not_found",
            ErrorKind::ToolResultMissing => "tool_result_missing",
            ErrorKind::ThinkingBlockError => "thinking_block_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DependencyFailed => "dependency_failed",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Permanent failures are never retried: a longer context window or a
    /// missing agent will not appear by waiting.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ErrorKind::ContextExceeded | ErrorKind::AgentNotFound)
    }
}

impl FromStr for ErrorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "rate_limit" => Ok(ErrorKind::RateLimit),
            "context_exceeded" => Ok(ErrorKind::ContextExceeded),
            "agent_not_found" => Ok(ErrorKind::AgentNotFound),
            "tool_result_missing" => Ok(ErrorKind::ToolResultMissing),
            "thinking_block_error" => Ok(ErrorKind::ThinkingBlockError),
            "timeout" => Ok(ErrorKind::Timeout),
            "dependency_failed" => Ok(ErrorKind::DependencyFailed),
            "unknown" => Ok(ErrorKind::Unknown),
            other => Err(anyhow::anyhow!("Unknown error kind '{}'", other)),
        }
    }
}

/// Map an error message onto the taxonomy. First match wins; the input is
/// lowercased before matching.
pub fn classify(message: &str) -> ErrorKind {
    let lower = message.to_lowercase();

    if lower.contains("rate") && lower.contains("limit") {
        return ErrorKind::RateLimit;
    }
    if lower.contains("context")
        && (lower.contains("length") || lower.contains("window") || lower.contains("exceeded"))
    {
        return ErrorKind::ContextExceeded;
    }
    if lower.contains("agent") && (lower.contains("not found") || lower.contains("undefined")) {
        return ErrorKind::AgentNotFound;
    }
    if lower.contains("tool_use") && lower.contains("tool_result") {
        return ErrorKind::ToolResultMissing;
    }
    if lower.contains("thinking") && (lower.contains("block") || lower.contains("disabled")) {
        return ErrorKind::ThinkingBlockError;
    }
    if lower.contains("timeout") || lower.contains("timed out") {
        return ErrorKind::Timeout;
    }
    ErrorKind::Unknown
}

/// Flatten an error payload to one lowercase string for classification.
///
/// Runners report errors as plain strings, as objects carrying `message` /
/// `error` / `data` fields, or as nestings of those shapes. Every string
/// found along those keys contributes to the normalized text.
pub fn normalize_error_text(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => {
            let mut collected = String::new();
            collect_error_strings(&value, &mut collected);
            if collected.is_empty() {
                raw.to_lowercase()
            } else {
                collected.to_lowercase()
            }
        }
        Err(_) => raw.to_lowercase(),
    }
}

fn collect_error_strings(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::String(s) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(s);
        }
        serde_json::Value::Object(map) => {
            for key in ["message", "error", "data"] {
                if let Some(nested) = map.get(key) {
                    collect_error_strings(nested, out);
                }
            }
        }
        _ => {}
    }
}

/// Exponential backoff: 30, 60, 120, 240, 480 seconds, capped at 600.
pub fn backoff_delay_secs(retry_count: u32) -> u64 {
    BACKOFF_BASE_SECS
        .saturating_mul(1u64 << retry_count.min(32))
        .min(BACKOFF_MAX_SECS)
}

/// A server-provided retry-after hint embedded in a rate-limit message,
/// e.g. "retry after 45 seconds" or "retry-after: 45". Capped to the same
/// ceiling as the formula.
pub fn retry_after_hint(message: &str) -> Option<u64> {
    let lower = message.to_lowercase();
    for marker in ["retry-after:", "retry after"] {
        if let Some(pos) = lower.find(marker) {
            let tail = &lower[pos + marker.len()..];
            let digits: String = tail
                .trim_start()
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(secs) = digits.parse::<u64>() {
                if secs > 0 {
                    return Some(secs.min(BACKOFF_MAX_SECS));
                }
            }
        }
    }
    None
}
