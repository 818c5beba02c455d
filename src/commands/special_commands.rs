//! Special commands parser for interactive chat mode
//!
//! Special commands manage threads and the composer instead of being sent
//! to the backend:
//! - Create, list and switch threads
//! - Retry the last reply or branch from an earlier message
//! - Pick the model and the tools sent with each request
//! - Attach files and show the active thread's history
//!
//! Commands are prefixed with `/`. The command word is case-insensitive;
//! arguments are taken verbatim.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when parsing special commands
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Unknown command was entered
    #[error("Unknown command: {0}\n\nType '/help' to see available commands")]
    UnknownCommand(String),

    /// Command was given an unsupported argument
    #[error("Unsupported argument for {command}: {arg}\n\nType '/help' to see valid usage")]
    UnsupportedArgument { command: String, arg: String },

    /// Command requires an argument but none was provided
    #[error("Command {command} requires an argument\n\nUsage: {usage}")]
    MissingArgument { command: String, usage: String },
}

/// Special commands that can be executed during interactive chat
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialCommand {
    /// Start an empty thread and make it active
    NewThread,

    /// List all threads, most recent first
    ListThreads,

    /// Switch to a thread by list position (1-based), id or id prefix
    SwitchThread(String),

    /// Retry the last assistant reply of the active thread
    Retry,

    /// Branch a new thread before the message at this 1-based position
    Branch(usize),

    /// Show the selected model, or select another one
    Model(Option<String>),

    /// List the models offered by configuration
    ListModels,

    /// Show the selected tools, or replace them (`/tools none` clears)
    Tools(Option<Vec<String>>),

    /// Attach a file's metadata to the next request
    Attach(PathBuf),

    /// Show the active thread's messages
    History,

    /// Display help information
    Help,

    /// Exit the interactive session
    Exit,

    /// Not a special command; the input is a message
    None,
}

/// Parse user input into a special command
///
/// # Examples
///
/// ```
/// use threadline::commands::special_commands::{parse_special_command, SpecialCommand};
///
/// assert_eq!(parse_special_command("/new").unwrap(), SpecialCommand::NewThread);
/// assert_eq!(parse_special_command("/branch 3").unwrap(), SpecialCommand::Branch(3));
/// assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
/// ```
pub fn parse_special_command(input: &str) -> Result<SpecialCommand, CommandError> {
    let trimmed = input.trim();
    let lower = trimmed.to_lowercase();

    // exit/quit work without the slash
    if lower == "exit" || lower == "quit" {
        return Ok(SpecialCommand::Exit);
    }
    if !trimmed.starts_with('/') {
        return Ok(SpecialCommand::None);
    }

    let (word, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((word, arg)) => (word.to_lowercase(), Some(arg.trim()).filter(|a| !a.is_empty())),
        None => (lower, None),
    };

    match (word.as_str(), arg) {
        ("/new", _) => Ok(SpecialCommand::NewThread),
        ("/threads", _) => Ok(SpecialCommand::ListThreads),
        ("/retry", _) => Ok(SpecialCommand::Retry),
        ("/history", _) => Ok(SpecialCommand::History),
        ("/models", _) => Ok(SpecialCommand::ListModels),
        ("/help" | "/?", _) => Ok(SpecialCommand::Help),
        ("/exit" | "/quit", _) => Ok(SpecialCommand::Exit),

        ("/switch", Some(target)) => Ok(SpecialCommand::SwitchThread(target.to_string())),
        ("/switch", None) => Err(missing("/switch", "/switch <number|id>")),

        ("/branch", Some(position)) => match position.parse::<usize>() {
            Ok(n) if n > 0 => Ok(SpecialCommand::Branch(n)),
            _ => Err(CommandError::UnsupportedArgument {
                command: "/branch".to_string(),
                arg: position.to_string(),
            }),
        },
        ("/branch", None) => Err(missing("/branch", "/branch <message number>")),

        ("/model", model) => Ok(SpecialCommand::Model(model.map(str::to_string))),

        ("/tools", None) => Ok(SpecialCommand::Tools(None)),
        ("/tools", Some(list)) if list.eq_ignore_ascii_case("none") => {
            Ok(SpecialCommand::Tools(Some(Vec::new())))
        }
        ("/tools", Some(list)) => Ok(SpecialCommand::Tools(Some(
            list.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        ))),

        ("/attach", Some(path)) => Ok(SpecialCommand::Attach(PathBuf::from(path))),
        ("/attach", None) => Err(missing("/attach", "/attach <path>")),

        _ => Err(CommandError::UnknownCommand(trimmed.to_string())),
    }
}

fn missing(command: &str, usage: &str) -> CommandError {
    CommandError::MissingArgument {
        command: command.to_string(),
        usage: usage.to_string(),
    }
}

/// Print the special commands help text
pub fn print_help() {
    println!(
        r#"
Special Commands:

  /new                 Start a new thread
  /threads             List threads
  /switch <n|id>       Switch to a thread by number, id or id prefix
  /retry               Retry the last reply
  /branch <n>          Start a thread from the history before message n
  /model [name]        Show or select the model
  /models              List available models
  /tools [a,b|none]    Show or set the tools sent with requests
  /attach <path>       Attach a file to the next message
  /history             Show the active thread
  /help                Show this help
  /exit                Leave the session

Anything else is sent as a message.
"#
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_special_command("hello").unwrap(), SpecialCommand::None);
        assert_eq!(
            parse_special_command("what is /new?").unwrap(),
            SpecialCommand::None
        );
    }

    #[test]
    fn test_exit_aliases() {
        for input in ["exit", "QUIT", "/exit", "/quit"] {
            assert_eq!(parse_special_command(input).unwrap(), SpecialCommand::Exit);
        }
    }

    #[test]
    fn test_command_word_is_case_insensitive() {
        assert_eq!(
            parse_special_command("/NEW").unwrap(),
            SpecialCommand::NewThread
        );
        assert_eq!(
            parse_special_command("/Threads").unwrap(),
            SpecialCommand::ListThreads
        );
    }

    #[test]
    fn test_switch_keeps_argument_case() {
        assert_eq!(
            parse_special_command("/switch AbC-12").unwrap(),
            SpecialCommand::SwitchThread("AbC-12".to_string())
        );
        assert!(matches!(
            parse_special_command("/switch"),
            Err(CommandError::MissingArgument { .. })
        ));
    }

    #[test]
    fn test_branch_requires_positive_number() {
        assert_eq!(
            parse_special_command("/branch 2").unwrap(),
            SpecialCommand::Branch(2)
        );
        assert!(matches!(
            parse_special_command("/branch 0"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
        assert!(matches!(
            parse_special_command("/branch two"),
            Err(CommandError::UnsupportedArgument { .. })
        ));
    }

    #[test]
    fn test_model_with_and_without_argument() {
        assert_eq!(
            parse_special_command("/model").unwrap(),
            SpecialCommand::Model(None)
        );
        assert_eq!(
            parse_special_command("/model gpt-4o").unwrap(),
            SpecialCommand::Model(Some("gpt-4o".to_string()))
        );
    }

    #[test]
    fn test_tools_list_parsing() {
        assert_eq!(
            parse_special_command("/tools search, calculator,").unwrap(),
            SpecialCommand::Tools(Some(vec![
                "search".to_string(),
                "calculator".to_string()
            ]))
        );
        assert_eq!(
            parse_special_command("/tools none").unwrap(),
            SpecialCommand::Tools(Some(Vec::new()))
        );
        assert_eq!(
            parse_special_command("/tools").unwrap(),
            SpecialCommand::Tools(None)
        );
    }

    #[test]
    fn test_attach_path() {
        assert_eq!(
            parse_special_command("/attach ./notes/My File.txt").unwrap(),
            SpecialCommand::Attach(PathBuf::from("./notes/My File.txt"))
        );
    }

    #[test]
    fn test_unknown_command() {
        let err = parse_special_command("/frobnicate").unwrap_err();
        assert_eq!(err, CommandError::UnknownCommand("/frobnicate".to_string()));
        assert!(err.to_string().contains("/help"));
    }
}
