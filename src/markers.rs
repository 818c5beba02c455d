//! Tool-marker parser for streamed assistant text
//!
//! The backend embeds structured tool activity in the free-form text stream
//! as sentinel-delimited JSON:
//!
//! - Tool calls: `__TOOL_CALL__{...}__TOOL_CALL__`
//! - Tool results: `__TOOL_RESULT__{...}__TOOL_RESULT__`
//!
//! Markers may be interleaved with prose and may straddle chunk boundaries, so
//! parsing always runs over the whole accumulated buffer rather than a single
//! chunk. The parser is pure: feeding its cleaned output back in with the
//! carried-forward sets changes nothing.
//!
//! # Examples
//!
//! ```
//! use threadline::markers::parse_tool_markers;
//!
//! let raw = r#"Looking it up. __TOOL_CALL__{"toolName":"search","toolCallId":"c1","args":{}}__TOOL_CALL__"#;
//! let parsed = parse_tool_markers(raw, &[], &[]);
//!
//! assert_eq!(parsed.content, "Looking it up.");
//! assert_eq!(parsed.tool_calls.len(), 1);
//! ```

use crate::error::ThreadlineError;
use crate::thread::{ToolCall, ToolResult};

/// Delimiter wrapping a JSON-encoded [`ToolCall`]
pub const TOOL_CALL_SENTINEL: &str = "__TOOL_CALL__";

/// Delimiter wrapping a JSON-encoded [`ToolResult`]
pub const TOOL_RESULT_SENTINEL: &str = "__TOOL_RESULT__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MarkerKind {
    Call,
    Result,
}

impl MarkerKind {
    fn sentinel(self) -> &'static str {
        match self {
            Self::Call => TOOL_CALL_SENTINEL,
            Self::Result => TOOL_RESULT_SENTINEL,
        }
    }
}

/// Output of one parser pass
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedMarkers {
    /// Display text with every marker region removed, trimmed
    pub content: String,
    /// Prior tool calls followed by newly discovered ones, first occurrence wins
    pub tool_calls: Vec<ToolCall>,
    /// Prior tool results followed by newly discovered ones, first occurrence wins
    pub tool_results: Vec<ToolResult>,
    /// Number of marker regions whose JSON failed to parse
    pub dropped: usize,
    /// An opening sentinel had no closing partner; the text from it onwards
    /// is not in `content`
    pub withheld: bool,
}

impl ParsedMarkers {
    /// Results whose `tool_call_id` matches no call in the same message
    pub fn orphaned_results(&self) -> impl Iterator<Item = &ToolResult> {
        self.tool_results.iter().filter(move |r| {
            !self
                .tool_calls
                .iter()
                .any(|c| c.tool_call_id == r.tool_call_id)
        })
    }
}

/// Extracts tool markers from accumulated text
///
/// Every complete marker region is removed from the visible text whether or
/// not its JSON parses; sentinels never reach the reader. Malformed payloads
/// are counted in [`ParsedMarkers::dropped`] and otherwise ignored. An
/// opening sentinel without its closing partner is a marker still in flight:
/// it and everything after it are withheld until a later pass sees the rest.
///
/// # Arguments
///
/// * `raw` - Accumulated stream text
/// * `prior_calls` - Tool calls already attached to the message
/// * `prior_results` - Tool results already attached to the message
pub fn parse_tool_markers(
    raw: &str,
    prior_calls: &[ToolCall],
    prior_results: &[ToolResult],
) -> ParsedMarkers {
    let mut parsed = ParsedMarkers {
        content: String::new(),
        tool_calls: prior_calls.to_vec(),
        tool_results: prior_results.to_vec(),
        dropped: 0,
        withheld: false,
    };

    // Removing a region can splice a new sentinel together from the text on
    // either side of it, so scan until no sentinel is left.
    let mut visible = scan(raw, &mut parsed);
    while next_opening(&visible).is_some() {
        visible = scan(&visible, &mut parsed);
    }

    parsed.content = visible.trim().to_string();
    parsed
}

/// One left-to-right pass removing every marker region from `text`
fn scan(text: &str, parsed: &mut ParsedMarkers) -> String {
    let mut visible = String::with_capacity(text.len());
    let mut rest = text;

    while let Some((start, kind)) = next_opening(rest) {
        visible.push_str(&rest[..start]);

        let sentinel = kind.sentinel();
        let body_start = start + sentinel.len();
        let Some(body_len) = rest[body_start..].find(sentinel) else {
            // unterminated: withhold the tail until the closing sentinel arrives
            parsed.withheld = true;
            rest = "";
            break;
        };

        absorb(parsed, kind, &rest[body_start..body_start + body_len]);
        rest = &rest[body_start + body_len + sentinel.len()..];
    }
    visible.push_str(rest);
    visible
}

/// Earliest opening sentinel of either kind
fn next_opening(text: &str) -> Option<(usize, MarkerKind)> {
    let call = text.find(TOOL_CALL_SENTINEL).map(|i| (i, MarkerKind::Call));
    let result = text
        .find(TOOL_RESULT_SENTINEL)
        .map(|i| (i, MarkerKind::Result));

    match (call, result) {
        (Some(c), Some(r)) => Some(if c.0 <= r.0 { c } else { r }),
        (c, r) => c.or(r),
    }
}

fn absorb(parsed: &mut ParsedMarkers, kind: MarkerKind, payload: &str) {
    match kind {
        MarkerKind::Call => match serde_json::from_str::<ToolCall>(payload) {
            Ok(call) => {
                if !parsed
                    .tool_calls
                    .iter()
                    .any(|c| c.tool_call_id == call.tool_call_id)
                {
                    parsed.tool_calls.push(call);
                }
            }
            Err(e) => reject(parsed, kind, e),
        },
        MarkerKind::Result => match serde_json::from_str::<ToolResult>(payload) {
            Ok(result) => {
                if !parsed
                    .tool_results
                    .iter()
                    .any(|r| r.tool_call_id == result.tool_call_id)
                {
                    parsed.tool_results.push(result);
                }
            }
            Err(e) => reject(parsed, kind, e),
        },
    }
}

fn reject(parsed: &mut ParsedMarkers, kind: MarkerKind, source: serde_json::Error) {
    parsed.dropped += 1;
    let error = ThreadlineError::MarkerParse(source.to_string());
    tracing::debug!(marker = ?kind, %error, "Dropping malformed tool marker");
}
