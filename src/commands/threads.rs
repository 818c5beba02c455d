use colored::Colorize;
use prettytable::{format, Table};
use serde::Serialize;

use super::open_persistence;
use super::render::{format_timestamp, print_message, resolve_thread};
use crate::cli::ThreadCommand;
use crate::config::Config;
use crate::error::Result;
use crate::thread::Thread;

/// One row of the thread listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    /// Timestamp of the newest message, epoch milliseconds
    pub last_activity: Option<i64>,
    pub active: bool,
}

impl ThreadSummary {
    pub fn from_thread(thread: &Thread, active_id: Option<&str>) -> Self {
        Self {
            id: thread.id.clone(),
            title: thread.title.clone(),
            message_count: thread.messages.len(),
            last_activity: thread.messages.iter().filter_map(|m| m.timestamp).max(),
            active: active_id == Some(thread.id.as_str()),
        }
    }
}

/// Handle thread inspection commands
pub fn handle_threads(config: &Config, command: ThreadCommand) -> Result<()> {
    let persistence = open_persistence(config, false)?;
    let state = persistence.load();
    let threads = state.threads.unwrap_or_default();

    match command {
        ThreadCommand::List { json } => {
            let active = state
                .active_thread_id
                .as_deref()
                .filter(|id| threads.iter().any(|t| t.id == *id))
                .or_else(|| threads.first().map(|t| t.id.as_str()));
            let summaries: Vec<ThreadSummary> = threads
                .iter()
                .map(|t| ThreadSummary::from_thread(t, active))
                .collect();

            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
                return Ok(());
            }

            if summaries.is_empty() {
                println!("{}", "No threads found.".yellow());
                return Ok(());
            }

            let mut table = Table::new();
            table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
            table.add_row(prettytable::row![
                "#".bold(),
                "ID".bold(),
                "Title".bold(),
                "Messages".bold(),
                "Last Activity".bold()
            ]);

            for (i, summary) in summaries.iter().enumerate() {
                let position = if summary.active {
                    format!("{}*", i + 1).green().to_string()
                } else {
                    (i + 1).to_string()
                };
                let id_short: String = summary.id.chars().take(8).collect();
                let title = if summary.title.chars().count() > 40 {
                    format!("{}...", summary.title.chars().take(37).collect::<String>())
                } else {
                    summary.title.clone()
                };
                let updated = summary
                    .last_activity
                    .map(format_timestamp)
                    .unwrap_or_else(|| "-".to_string());

                table.add_row(prettytable::row![
                    position,
                    id_short.cyan(),
                    title,
                    summary.message_count,
                    updated
                ]);
            }

            println!("\nThreads:");
            table.printstd();
            println!();
            println!(
                "Use {} to continue a thread.",
                "threadline chat --thread <ID>".cyan()
            );
            println!();
        }
        ThreadCommand::Show { id } => {
            let thread = resolve_thread(&threads, &id)?;
            println!("{}", thread.title.bold().underline());
            println!("{}\n", thread.id.dimmed());
            for (i, message) in thread.messages.iter().enumerate() {
                print_message(i + 1, message);
            }
        }
    }

    Ok(())
}
