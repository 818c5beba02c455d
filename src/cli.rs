//! Command-line interface definition for Threadline
//!
//! This module defines the CLI structure using clap's derive API,
//! providing commands for interactive chat, one-shot questions and
//! inspection of stored threads.

use clap::{Parser, Subcommand};

/// Threadline - streaming chat client
///
/// Holds threaded conversations with a chat backend, rendering streamed
/// replies and tool activity as they arrive.
#[derive(Parser, Debug, Clone)]
#[command(name = "threadline")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/config.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub json_logs: bool,

    /// Override the chat endpoint from config
    #[arg(long)]
    pub endpoint: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands for Threadline
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Start an interactive chat session
    Chat {
        /// Model to select for this session
        #[arg(short, long)]
        model: Option<String>,

        /// Thread to open (defaults to the last active thread)
        #[arg(short, long)]
        thread: Option<String>,

        /// Keep the session in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Send a single prompt on a new thread and print the reply
    Ask {
        /// Prompt text
        #[arg(short, long)]
        prompt: String,

        /// Model to use for this request
        #[arg(short, long)]
        model: Option<String>,

        /// Do not persist the thread
        #[arg(long)]
        ephemeral: bool,
    },

    /// Inspect stored threads
    Threads {
        /// Thread subcommand
        #[command(subcommand)]
        command: ThreadCommand,
    },
}

/// Thread inspection subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ThreadCommand {
    /// List stored threads
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show every message of one thread
    Show {
        /// Thread identifier or unique prefix
        id: String,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/config.yaml".to_string()),
            verbose: false,
            json_logs: false,
            endpoint: None,
            command: Commands::Chat {
                model: None,
                thread: None,
                ephemeral: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_default() {
        let cli = Cli::default();
        assert_eq!(cli.config, Some("config/config.yaml".to_string()));
        assert!(!cli.verbose);
        assert!(matches!(cli.command, Commands::Chat { .. }));
    }

    #[test]
    fn test_cli_parse_chat_command() {
        let cli = Cli::try_parse_from(["threadline", "chat"]).unwrap();
        if let Commands::Chat {
            model,
            thread,
            ephemeral,
        } = cli.command
        {
            assert!(model.is_none());
            assert!(thread.is_none());
            assert!(!ephemeral);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_chat_with_options() {
        let cli = Cli::try_parse_from([
            "threadline",
            "chat",
            "--model",
            "gpt-4o",
            "--thread",
            "abc",
            "--ephemeral",
        ])
        .unwrap();
        if let Commands::Chat {
            model,
            thread,
            ephemeral,
        } = cli.command
        {
            assert_eq!(model.as_deref(), Some("gpt-4o"));
            assert_eq!(thread.as_deref(), Some("abc"));
            assert!(ephemeral);
        } else {
            panic!("Expected Chat command");
        }
    }

    #[test]
    fn test_cli_parse_ask_requires_prompt() {
        assert!(Cli::try_parse_from(["threadline", "ask"]).is_err());
        let cli = Cli::try_parse_from(["threadline", "ask", "--prompt", "hi"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { ref prompt, .. } if prompt == "hi"));
    }

    #[test]
    fn test_cli_parse_threads_show() {
        let cli = Cli::try_parse_from(["threadline", "threads", "show", "t1"]).unwrap();
        match cli.command {
            Commands::Threads {
                command: ThreadCommand::Show { id },
            } => assert_eq!(id, "t1"),
            other => panic!("Expected threads show, got {:?}", other),
        }
    }

    #[test]
    fn test_cli_global_flags() {
        let cli = Cli::try_parse_from([
            "threadline",
            "--verbose",
            "--json-logs",
            "--endpoint",
            "http://example.test/chat",
            "threads",
            "list",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert_eq!(cli.endpoint.as_deref(), Some("http://example.test/chat"));
    }
}
