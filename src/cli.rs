//! CLI argument parsing using clap v4
//!
//! Defines the command-line interface for twin-qa.

use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

use crate::protocol::{SessionStatus, SortField, SortOrder};

/// twin-qa - Ask one question of many digital twin personas
///
/// Creates Q&A sessions against a session service, streams every persona's
/// answer as it arrives and prints the final summary.
#[derive(Parser, Debug)]
#[command(name = "twin-qa")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to configuration file
    #[arg(short, long, env = "TWIN_QA_CONFIG", global = true)]
    pub config: Option<String>,

    /// Use the built-in simulated service instead of HTTP
    #[arg(long, global = true)]
    pub demo: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ask a question and stream the answers
    Ask {
        /// Question text
        question: String,

        /// Prospect ids (repeat or comma-separate)
        #[arg(short, long = "prospect", required = true, value_delimiter = ',')]
        prospects: Vec<String>,

        /// Image to attach
        #[arg(long)]
        image: Option<PathBuf>,

        /// Return after creation instead of streaming to completion
        #[arg(long)]
        no_wait: bool,

        /// Print the final session as JSON
        #[arg(long)]
        json: bool,
    },

    /// List sessions
    List {
        /// Only these statuses (comma-separated)
        #[arg(long = "status", value_delimiter = ',')]
        status: Vec<SessionStatus>,

        /// Only sessions that include this prospect
        #[arg(long)]
        prospect: Option<String>,

        /// Created on or after (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        from: Option<DateTime<Utc>>,

        /// Created on or before (RFC 3339 or YYYY-MM-DD)
        #[arg(long, value_parser = parse_date)]
        to: Option<DateTime<Utc>>,

        /// Free-text search over questions and answers
        #[arg(short, long)]
        search: Option<String>,

        /// Page number (1-based)
        #[arg(long, default_value = "1")]
        page: u32,

        /// Sessions per page
        #[arg(long, default_value = "100")]
        page_size: u32,

        /// Sort field: created_at, completed_at, status
        #[arg(long, default_value = "created_at")]
        sort_by: SortField,

        /// Sort order: asc, desc
        #[arg(long, default_value = "desc")]
        order: SortOrder,

        /// Print the page as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one session with every response
    Show {
        session_id: String,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Cancel a running session
    Cancel { session_id: String },

    /// Delete a session
    Delete { session_id: String },

    /// Follow sessions live until they finish
    Watch {
        /// Sessions to follow; all active sessions when omitted
        session_ids: Vec<String>,
    },

    /// List personas from the directory
    Personas {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Display version and build information
    Version,

    /// Configuration management
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// Configuration subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum ConfigSubcommand {
    /// Display the effective configuration
    Show,

    /// Initialize a new configuration file
    Init {
        /// Path where to create the config file
        #[arg(short, long)]
        path: Option<String>,

        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Validate a configuration file
    Validate,
}

/// RFC 3339 timestamp, or a bare date meaning midnight UTC
fn parse_date(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| format!("'{}' is not a date (use YYYY-MM-DD or RFC 3339)", value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_ask_collects_prospects() {
        let cli = Cli::parse_from(["twin-qa", "ask", "Would you buy?", "-p", "A,B", "--prospect", "C"]);
        match cli.command {
            Commands::Ask { question, prospects, image, no_wait, json } => {
                assert_eq!(question, "Would you buy?");
                assert_eq!(prospects, vec!["A", "B", "C"]);
                assert!(image.is_none());
                assert!(!no_wait);
                assert!(!json);
            }
            _ => panic!("Expected Ask command"),
        }
    }

    #[test]
    fn test_ask_requires_prospects() {
        assert!(Cli::try_parse_from(["twin-qa", "ask", "Why?"]).is_err());
    }

    #[test]
    fn test_list_defaults() {
        let cli = Cli::parse_from(["twin-qa", "list"]);
        match cli.command {
            Commands::List { status, page, page_size, sort_by, order, from, .. } => {
                assert!(status.is_empty());
                assert_eq!(page, 1);
                assert_eq!(page_size, 100);
                assert_eq!(sort_by, SortField::CreatedAt);
                assert_eq!(order, SortOrder::Desc);
                assert!(from.is_none());
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_list_filters() {
        let cli = Cli::parse_from([
            "twin-qa",
            "list",
            "--status",
            "pending,in_progress",
            "--from",
            "2024-05-01",
            "--sort-by",
            "status",
            "--order",
            "asc",
        ]);
        match cli.command {
            Commands::List { status, from, sort_by, order, .. } => {
                assert_eq!(status, vec![SessionStatus::Pending, SessionStatus::InProgress]);
                assert_eq!(from.unwrap().to_rfc3339(), "2024-05-01T00:00:00+00:00");
                assert_eq!(sort_by, SortField::Status);
                assert_eq!(order, SortOrder::Asc);
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_list_rejects_bad_status() {
        assert!(Cli::try_parse_from(["twin-qa", "list", "--status", "done"]).is_err());
        assert!(Cli::try_parse_from(["twin-qa", "list", "--from", "yesterday"]).is_err());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from(["twin-qa", "watch", "-vv", "--demo", "--config", "/tmp/qa.toml"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.demo);
        assert_eq!(cli.config.as_deref(), Some("/tmp/qa.toml"));
        match cli.command {
            Commands::Watch { session_ids } => assert!(session_ids.is_empty()),
            _ => panic!("Expected Watch command"),
        }
    }

    #[test]
    fn test_quiet_flag() {
        let cli = Cli::parse_from(["twin-qa", "--quiet", "version"]);
        assert!(cli.quiet);
    }

    #[test]
    fn test_config_init() {
        let cli = Cli::parse_from(["twin-qa", "config", "init", "--force"]);
        match cli.command {
            Commands::Config { subcommand: ConfigSubcommand::Init { path, force } } => {
                assert!(path.is_none());
                assert!(force);
            }
            _ => panic!("Expected Config Init command"),
        }
    }

    #[test]
    fn test_parse_date_accepts_rfc3339() {
        let ts = parse_date("2024-05-01T12:30:00+02:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T10:30:00+00:00");
    }
}
