//! Terminal rendering of threads and streamed replies

use std::collections::HashSet;
use std::io::Write;

use chrono::{Local, TimeZone};
use colored::Colorize;

use crate::error::{Result, ThreadlineError};
use crate::thread::{Message, Role, Thread};

/// Prints a reply as it streams in
///
/// The renderer watches one thread. The reply is the newest assistant
/// message that was not in the thread when the renderer was created, so it
/// follows a fresh placeholder, a retry placeholder or an appended error
/// message alike.
#[derive(Debug)]
pub struct LiveRenderer {
    thread_id: String,
    known_ids: HashSet<String>,
    printed: String,
}

impl LiveRenderer {
    pub fn new(thread: &Thread) -> Self {
        Self {
            thread_id: thread.id.clone(),
            known_ids: thread.messages.iter().map(|m| m.id.clone()).collect(),
            printed: String::new(),
        }
    }

    fn reply<'a>(&self, threads: &'a [Thread]) -> Option<&'a Message> {
        threads
            .iter()
            .find(|t| t.id == self.thread_id)?
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !self.known_ids.contains(&m.id))
    }

    /// Prints whatever text the snapshot adds to what is already on screen
    ///
    /// Text that no longer extends the printed prefix (for example a
    /// failed stream replaced by an error message) waits for [`finish`].
    ///
    /// [`finish`]: LiveRenderer::finish
    pub fn render(&mut self, threads: &[Thread]) {
        let Some(reply) = self.reply(threads) else {
            return;
        };
        if let Some(suffix) = reply.content.strip_prefix(self.printed.as_str()) {
            if !suffix.is_empty() {
                print!("{}", suffix);
                let _ = std::io::stdout().flush();
                self.printed.push_str(suffix);
            }
        }
    }

    /// Renders the final snapshot and returns the finished reply
    pub fn finish(mut self, threads: &[Thread]) -> Option<Message> {
        self.render(threads);
        let reply = self.reply(threads)?.clone();
        if reply.content != self.printed {
            if !self.printed.is_empty() {
                println!();
            }
            print!("{}", reply.content);
        }
        println!();
        print_tool_activity(&reply);
        Some(reply)
    }
}

/// Prints tool calls and results attached to a message
pub fn print_tool_activity(message: &Message) {
    for call in message.tool_calls.iter().flatten() {
        println!(
            "  {} {}({})",
            "tool call".magenta(),
            call.tool_name.bold(),
            call.args
        );
    }
    for result in message.tool_results.iter().flatten() {
        println!(
            "  {} {} [{}]: {}",
            "tool result".magenta(),
            result.tool_name.bold(),
            result.tool_call_id.dimmed(),
            result.result
        );
    }
}

/// Formats the live metrics of an assistant message, if it has any
///
/// # Examples
///
/// ```
/// use threadline::commands::render::format_metrics;
/// use threadline::thread::{Message, Role};
///
/// let mut msg = Message::bare("m", Role::Assistant, "hi");
/// assert_eq!(format_metrics(&msg), None);
/// msg.total_tokens = Some(12);
/// msg.tokens_per_second = Some(24.0);
/// assert_eq!(format_metrics(&msg).as_deref(), Some("12 tokens | 24.0 tok/s"));
/// ```
pub fn format_metrics(message: &Message) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(tokens) = message.total_tokens {
        parts.push(format!("{} tokens", tokens));
    }
    if let Some(tps) = message.tokens_per_second {
        parts.push(format!("{:.1} tok/s", tps));
    }
    if let Some(ttft) = message.time_to_first_token {
        parts.push(format!("TTFT {} ms", ttft));
    }
    (!parts.is_empty()).then(|| parts.join(" | "))
}

/// Formats an epoch-millisecond timestamp in local time
pub fn format_timestamp(millis: i64) -> String {
    Local
        .timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Prints one message of a thread listing
pub fn print_message(position: usize, message: &Message) {
    let role = match message.role {
        Role::User => "you".green().bold(),
        Role::Assistant => message
            .model
            .as_deref()
            .unwrap_or("assistant")
            .blue()
            .bold(),
    };
    let when = message
        .timestamp
        .map(format_timestamp)
        .unwrap_or_default();

    println!("{} {} {}", format!("[{}]", position).dimmed(), role, when.dimmed());
    println!("{}", message.content);
    print_tool_activity(message);
    if let Some(metrics) = format_metrics(message) {
        println!("{}", metrics.dimmed());
    }
    println!();
}

/// Finds a thread by 1-based list position, exact id or unique id prefix
///
/// # Errors
///
/// Returns `ThreadlineError::InvalidOperation` when nothing matches or a
/// prefix is ambiguous
pub fn resolve_thread<'a>(threads: &'a [Thread], key: &str) -> Result<&'a Thread> {
    if let Ok(position) = key.parse::<usize>() {
        if let Some(thread) = position.checked_sub(1).and_then(|i| threads.get(i)) {
            return Ok(thread);
        }
    }
    if let Some(thread) = threads.iter().find(|t| t.id == key) {
        return Ok(thread);
    }

    let mut matches = threads.iter().filter(|t| t.id.starts_with(key));
    match (matches.next(), matches.next()) {
        (Some(thread), None) => Ok(thread),
        (Some(_), Some(_)) => Err(ThreadlineError::InvalidOperation(format!(
            "thread prefix {} is ambiguous",
            key
        ))
        .into()),
        _ => Err(ThreadlineError::InvalidOperation(format!("no thread matches {}", key)).into()),
    }
}
