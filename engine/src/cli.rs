//! CLI interface for Estate
//!
//! Command-line interface using clap's derive API. Every command that touches
//! conversation state takes an explicit `--session`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Estate property-search assistant
///
/// Answers natural-language property questions by routing them to search,
/// estimation, statistics and reporting agents, remembering each session's
/// earlier turns.
#[derive(Parser, Debug)]
#[command(name = "estate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Answer a query within a session
    Ask {
        /// Session the turn belongs to
        #[arg(short, long)]
        session: String,

        /// JSON array of property records (default: <data_dir>/catalog.json)
        #[arg(long, value_name = "FILE")]
        catalog: Option<PathBuf>,

        /// The question
        query: String,
    },

    /// Classify and plan a query without executing it
    Plan {
        /// The question
        query: String,

        /// Session whose history resolves references
        #[arg(short, long, default_value = "preview")]
        session: String,
    },

    /// Show a session's recorded turns
    History {
        #[arg(short, long)]
        session: String,

        /// Number of turns to show (default: all)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// End a session and drop its history
    Forget {
        #[arg(short, long)]
        session: String,
    },

    /// Save a property to the session's shortlist
    Save {
        #[arg(short, long)]
        session: String,

        property_id: String,
    },

    /// List the session's saved properties and preferences
    Saved {
        #[arg(short, long)]
        session: String,
    },

    /// Record a preference, e.g. `renovation_tier high_end`
    Prefer {
        #[arg(short, long)]
        session: String,

        name: String,

        /// JSON value, or plain text
        value: String,
    },

    /// Write the last report of a session through the JSON renderer
    Render {
        #[arg(short, long)]
        session: String,

        /// Output file or directory
        #[arg(short, long, value_name = "PATH")]
        out: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ask_command() {
        let cli = Cli::parse_from([
            "estate",
            "ask",
            "--session",
            "s1",
            "Properties in Hyderabad",
        ]);
        if let Command::Ask {
            session,
            catalog,
            query,
        } = cli.command
        {
            assert_eq!(session, "s1");
            assert!(catalog.is_none());
            assert_eq!(query, "Properties in Hyderabad");
        } else {
            panic!("Expected Ask command");
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "estate",
            "--json",
            "--log",
            "debug",
            "history",
            "-s",
            "s1",
            "--limit",
            "5",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert!(matches!(
            cli.command,
            Command::History { limit: Some(5), .. }
        ));
    }

    #[test]
    fn test_plan_default_session() {
        let cli = Cli::parse_from(["estate", "plan", "3 bhk villas in Pune"]);
        if let Command::Plan { session, .. } = cli.command {
            assert_eq!(session, "preview");
        } else {
            panic!("Expected Plan command");
        }
    }

    #[test]
    fn test_ask_requires_session() {
        assert!(Cli::try_parse_from(["estate", "ask", "hello"]).is_err());
    }

    #[test]
    fn test_prefer_command() {
        let cli = Cli::parse_from(["estate", "prefer", "-s", "s1", "renovation_tier", "luxury"]);
        if let Command::Prefer { session, name, value } = cli.command {
            assert_eq!(session, "s1");
            assert_eq!(name, "renovation_tier");
            assert_eq!(value, "luxury");
        } else {
            panic!("Expected Prefer command");
        }
    }

    #[test]
    fn test_render_command() {
        let cli = Cli::parse_from(["estate", "render", "-s", "s1", "--out", "/tmp/r.json"]);
        if let Command::Render { session, out } = cli.command {
            assert_eq!(session, "s1");
            assert_eq!(out, PathBuf::from("/tmp/r.json"));
        } else {
            panic!("Expected Render command");
        }
    }
}
