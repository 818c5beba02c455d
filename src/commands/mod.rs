//! Command handlers for Threadline
//!
//! This module contains the handlers for the CLI commands: the interactive
//! chat session, one-shot questions and thread inspection.

pub mod render;
pub mod special_commands;
pub mod threads;

use std::path::Path;

use crate::backend::{Attachment, ChatBackend};
use crate::config::Config;
use crate::controller::ChatController;
use crate::error::{Result, ThreadlineError};
use crate::reconciler::ReplyOutcome;
use crate::storage::{open_store, SessionPersistence};
use crate::thread::Message;

use render::LiveRenderer;

/// Opens session persistence as configured, or in memory when ephemeral
pub fn open_persistence(config: &Config, ephemeral: bool) -> Result<SessionPersistence> {
    if ephemeral {
        tracing::info!("Using in-memory session storage");
        return Ok(SessionPersistence::in_memory());
    }
    Ok(SessionPersistence::new(open_store(&config.storage)?))
}

/// Builds attachment metadata for a local file
///
/// # Errors
///
/// Returns error if the file cannot be inspected or is not a regular file
pub fn attachment_for(path: &Path) -> Result<Attachment> {
    let metadata = std::fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(ThreadlineError::InvalidOperation(format!(
            "{} is not a file",
            path.display()
        ))
        .into());
    }
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string());
    Ok(Attachment::new(name, metadata.len(), mime_type_for(path)))
}

fn mime_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        _ => "application/octet-stream",
    }
}

/// Sends `text` and renders the reply live from the store's snapshots
///
/// Returns `None` when the text was blank.
pub async fn send_and_render<B: ChatBackend>(
    controller: &mut ChatController<B>,
    text: &str,
) -> Result<Option<(ReplyOutcome, Option<Message>)>> {
    let Some(thread) = controller.active_thread() else {
        return Err(ThreadlineError::InvalidOperation("no active thread".into()).into());
    };
    let renderer = LiveRenderer::new(thread);
    let mut rx = controller.subscribe();

    let outcome = render_while(renderer, &mut rx, controller.send(text)).await;
    finish(controller, outcome)
}

/// Retries the last assistant reply of the active thread with live rendering
///
/// Returns `None` when there is nothing to retry.
pub async fn retry_and_render<B: ChatBackend>(
    controller: &mut ChatController<B>,
) -> Result<Option<(ReplyOutcome, Option<Message>)>> {
    let Some(thread) = controller.active_thread() else {
        return Ok(None);
    };
    let Some(target) = thread
        .messages
        .iter()
        .rev()
        .find(|m| !m.is_user())
        .map(|m| m.id.clone())
    else {
        return Ok(None);
    };
    let renderer = LiveRenderer::new(thread);
    let mut rx = controller.subscribe();

    let outcome = render_while(renderer, &mut rx, controller.retry_message(&target)).await;
    finish(controller, outcome)
}

type Rendered = (Result<Option<ReplyOutcome>>, LiveRenderer);

async fn render_while<F>(
    mut renderer: LiveRenderer,
    rx: &mut tokio::sync::watch::Receiver<crate::thread::ThreadSnapshot>,
    operation: F,
) -> Rendered
where
    F: std::future::Future<Output = Result<Option<ReplyOutcome>>>,
{
    tokio::pin!(operation);
    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            Ok(()) = rx.changed() => {
                let snapshot = rx.borrow_and_update().clone();
                renderer.render(&snapshot);
            }
        }
    };
    (result, renderer)
}

fn finish<B: ChatBackend>(
    controller: &ChatController<B>,
    (result, renderer): Rendered,
) -> Result<Option<(ReplyOutcome, Option<Message>)>> {
    let Some(outcome) = result? else {
        return Ok(None);
    };
    let reply = renderer.finish(controller.store().threads());
    Ok(Some((outcome, reply)))
}

pub mod chat {
    //! Interactive chat session
    //!
    //! A readline loop: plain input is sent as a message and the reply is
    //! rendered while it streams; slash commands manage threads and the
    //! composer.

    use colored::Colorize;
    use prettytable::{format, row, Table};
    use rustyline::error::ReadlineError;
    use rustyline::DefaultEditor;

    use super::render::{format_metrics, print_message, resolve_thread};
    use super::special_commands::{parse_special_command, print_help, SpecialCommand};
    use super::{attachment_for, open_persistence, retry_and_render, send_and_render};
    use crate::backend::{ChatBackend, HttpBackend};
    use crate::config::Config;
    use crate::controller::ChatController;
    use crate::error::Result;
    use crate::reconciler::ReplyOutcome;
    use crate::thread::Message;

    /// Start an interactive chat session
    ///
    /// # Arguments
    ///
    /// * `config` - Global configuration
    /// * `model` - Model to select for this session
    /// * `thread` - Thread to open, by id or id prefix
    /// * `ephemeral` - Keep the session in memory only
    ///
    /// # Errors
    ///
    /// Returns error if storage, the backend client or the terminal cannot
    /// be initialized
    pub async fn run_chat(
        config: Config,
        model: Option<String>,
        thread: Option<String>,
        ephemeral: bool,
    ) -> Result<()> {
        let persistence = open_persistence(&config, ephemeral)?;
        let store = persistence.load_store(
            &config.chat.default_thread_title,
            &config.models.default_model,
        );
        let backend = HttpBackend::new(&config.backend)?;
        let mut controller = ChatController::new(backend, store, persistence, config.chat.clone());

        if let Some(model) = model {
            if !config.models.options.contains(&model) {
                tracing::warn!("Model {} is not in the configured options", model);
            }
            controller.set_model(model);
        }
        if let Some(key) = thread {
            let id = resolve_thread(controller.store().threads(), &key)?.id.clone();
            controller.select_thread(&id)?;
        }

        let mut rl = DefaultEditor::new()?;
        print_welcome_banner(&controller);

        loop {
            let prompt = format!("{} ", ">>".cyan().bold());
            match rl.readline(&prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    rl.add_history_entry(trimmed)?;

                    let command = match parse_special_command(trimmed) {
                        Ok(command) => command,
                        Err(e) => {
                            eprintln!("{}\n", e.to_string().red());
                            continue;
                        }
                    };

                    match command {
                        SpecialCommand::None => {
                            let reply = send_and_render(&mut controller, trimmed).await;
                            report(reply);
                        }
                        SpecialCommand::Retry => {
                            let reply = retry_and_render(&mut controller).await;
                            if matches!(reply, Ok(None)) {
                                println!("{}\n", "Nothing to retry.".yellow());
                            }
                            report(reply);
                        }
                        SpecialCommand::Exit => break,
                        other => {
                            if let Err(e) = handle_command(&mut controller, &config, other) {
                                eprintln!("{}\n", format!("{:#}", e).red());
                            }
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("CTRL-C");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    println!("CTRL-D");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {:?}", err);
                    break;
                }
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    fn report(reply: Result<Option<(ReplyOutcome, Option<Message>)>>) {
        match reply {
            Ok(Some((ReplyOutcome::Completed { .. }, Some(message)))) => {
                if let Some(metrics) = format_metrics(&message) {
                    println!("{}", metrics.dimmed());
                }
                println!();
            }
            Ok(Some((ReplyOutcome::Failed { reason, .. }, _))) => {
                tracing::debug!("Reply failed: {}", reason);
                println!();
            }
            Ok(_) => {}
            Err(e) => eprintln!("{}\n", format!("Error: {:#}", e).red()),
        }
    }

    fn handle_command<B: ChatBackend>(
        controller: &mut ChatController<B>,
        config: &Config,
        command: SpecialCommand,
    ) -> Result<()> {
        match command {
            SpecialCommand::NewThread => {
                controller.new_thread();
                println!("{}\n", "Started a new thread.".green());
            }
            SpecialCommand::ListThreads => print_threads(controller),
            SpecialCommand::SwitchThread(key) => {
                let thread = resolve_thread(controller.store().threads(), &key)?;
                let (id, title) = (thread.id.clone(), thread.title.clone());
                controller.select_thread(&id)?;
                println!("Switched to {}\n", title.bold());
            }
            SpecialCommand::Branch(position) => {
                let message_id = controller
                    .active_thread()
                    .zip(position.checked_sub(1))
                    .and_then(|(t, i)| t.messages.get(i))
                    .map(|m| m.id.clone())
                    .ok_or_else(|| {
                        crate::error::ThreadlineError::InvalidOperation(format!(
                            "no message number {}",
                            position
                        ))
                    })?;
                controller.branch(&message_id)?;
                if let Some(thread) = controller.active_thread() {
                    println!("Branched into {}\n", thread.title.bold());
                }
            }
            SpecialCommand::Model(None) => {
                println!("Model: {}\n", controller.store().selected_model().cyan());
            }
            SpecialCommand::Model(Some(model)) => {
                if !config.models.options.contains(&model) {
                    return Err(crate::error::ThreadlineError::InvalidOperation(format!(
                        "unknown model {}; available: {}",
                        model,
                        config.models.options.join(", ")
                    ))
                    .into());
                }
                controller.set_model(model);
                println!(
                    "Model set to {}\n",
                    controller.store().selected_model().cyan()
                );
            }
            SpecialCommand::ListModels => {
                for option in &config.models.options {
                    let marker = if option == controller.store().selected_model() {
                        "*".green().to_string()
                    } else {
                        " ".to_string()
                    };
                    println!("{} {}", marker, option);
                }
                println!();
            }
            SpecialCommand::Tools(None) => {
                let tools = &controller.composer().tools;
                if tools.is_empty() {
                    println!("No tools selected.\n");
                } else {
                    println!("Tools: {}\n", tools.join(", ").cyan());
                }
            }
            SpecialCommand::Tools(Some(tools)) => {
                controller.set_tools(tools);
                println!("Tools updated.\n");
            }
            SpecialCommand::Attach(path) => {
                let attachment = attachment_for(&path)?;
                println!(
                    "Attached {} ({} bytes, {})\n",
                    attachment.name.bold(),
                    attachment.size,
                    attachment.mime_type
                );
                controller.add_attachment(attachment);
            }
            SpecialCommand::History => {
                if let Some(thread) = controller.active_thread() {
                    println!("{}\n", thread.title.bold().underline());
                    for (i, message) in thread.messages.iter().enumerate() {
                        print_message(i + 1, message);
                    }
                }
            }
            SpecialCommand::Help => print_help(),
            SpecialCommand::None | SpecialCommand::Retry | SpecialCommand::Exit => {}
        }
        Ok(())
    }

    fn print_threads<B: ChatBackend>(controller: &ChatController<B>) {
        let active = controller.store().active_thread().map(|t| t.id.clone());
        let mut table = Table::new();
        table.set_format(*format::consts::FORMAT_BORDERS_ONLY);
        table.add_row(row!["#".bold(), "ID".bold(), "Title".bold(), "Messages".bold()]);

        for (i, thread) in controller.store().threads().iter().enumerate() {
            let marker = if Some(&thread.id) == active.as_ref() {
                format!("{}*", i + 1).green().to_string()
            } else {
                (i + 1).to_string()
            };
            let id_short: String = thread.id.chars().take(8).collect();
            table.add_row(row![marker, id_short.cyan(), thread.title, thread.messages.len()]);
        }
        table.printstd();
        println!();
    }

    fn print_welcome_banner<B: ChatBackend>(controller: &ChatController<B>) {
        println!("{}", "Threadline".bold());
        println!(
            "Model:  {}",
            controller.store().selected_model().cyan()
        );
        if let Some(thread) = controller.active_thread() {
            println!(
                "Thread: {} ({} messages)",
                thread.title.bold(),
                thread.messages.len()
            );
        }
        println!("Type {} for commands.\n", "/help".cyan());
    }
}

pub mod ask {
    //! One-shot question on a new thread

    use colored::Colorize;

    use super::{open_persistence, send_and_render};
    use crate::backend::HttpBackend;
    use crate::config::Config;
    use crate::controller::ChatController;
    use crate::error::{Result, ThreadlineError};
    use crate::reconciler::ReplyOutcome;

    use super::render::format_metrics;

    /// Send a single prompt on a fresh thread and print the reply
    ///
    /// # Errors
    ///
    /// Returns error if the prompt is blank or the reply failed
    pub async fn run_ask(
        config: Config,
        prompt: String,
        model: Option<String>,
        ephemeral: bool,
    ) -> Result<()> {
        let persistence = open_persistence(&config, ephemeral)?;
        let store = persistence.load_store(
            &config.chat.default_thread_title,
            &config.models.default_model,
        );
        let backend = HttpBackend::new(&config.backend)?;
        let mut controller = ChatController::new(backend, store, persistence, config.chat.clone());

        if let Some(model) = model {
            controller.set_model(model);
        }
        controller.new_thread();

        match send_and_render(&mut controller, &prompt).await? {
            None => Err(ThreadlineError::InvalidOperation("prompt is empty".into()).into()),
            Some((ReplyOutcome::Failed { reason, .. }, _)) => {
                Err(ThreadlineError::Request(reason).into())
            }
            Some((ReplyOutcome::Completed { .. }, reply)) => {
                if let Some(metrics) = reply.as_ref().and_then(format_metrics) {
                    eprintln!("{}", metrics.dimmed());
                }
                Ok(())
            }
        }
    }
}
