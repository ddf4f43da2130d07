//! Command-line argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Retrieval-augmented legal analysis toolkit.
#[derive(Debug, Parser)]
#[command(name = "lexrag", version, about)]
pub struct Cli {
    /// Path to the SQLite database.
    #[arg(long, global = true, env = "LEXRAG_DB", default_value = crate::storage::DEFAULT_DB_PATH)]
    pub db: PathBuf,

    /// Output format: text or json.
    #[arg(long, global = true, default_value = "text")]
    pub format: String,

    /// Command to run.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Initialize the database schema.
    Init,

    /// Ingest a document into the corpus.
    Ingest {
        /// Path to the document file.
        path: PathBuf,

        /// Document category: LAW, REGULATION, CASE, CONTRACT_TEMPLATE,
        /// or GENERAL.
        #[arg(long, default_value = "LAW")]
        category: String,
    },

    /// Search the corpus.
    Search {
        /// The query.
        query: String,

        /// Number of results.
        #[arg(short, long, default_value_t = 5)]
        k: usize,
    },

    /// Ask the chat assistant a question.
    Ask {
        /// The question.
        message: String,

        /// Continue an existing conversation.
        #[arg(long)]
        conversation: Option<String>,

        /// Disable knowledge-base grounding.
        #[arg(long)]
        no_rag: bool,
    },

    /// Manage chat sessions.
    Sessions {
        /// Session action.
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Run a contract review.
    Review {
        /// Path to the contract file.
        path: PathBuf,

        /// Where to write the PDF report (defaults next to the input).
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Delete a document and its segments.
    Delete {
        /// Document id (doc-...).
        document_id: String,
    },

    /// Show corpus statistics.
    Stats,

    /// List dead-lettered embedding batches.
    DeadLetters,
}

/// Session management actions.
#[derive(Debug, Subcommand)]
pub enum SessionAction {
    /// List sessions.
    List,

    /// Show one session with its messages.
    Show {
        /// Session id.
        id: String,
    },

    /// Delete a session and its messages.
    Delete {
        /// Session id.
        id: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_structure_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_search() {
        let cli = Cli::try_parse_from(["lexrag", "search", "民法典第1198条", "-k", "3"]).unwrap();
        match cli.command {
            Commands::Search { query, k } => {
                assert_eq!(query, "民法典第1198条");
                assert_eq!(k, 3);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ingest_with_category() {
        let cli =
            Cli::try_parse_from(["lexrag", "ingest", "minfa.txt", "--category", "REGULATION"])
                .unwrap();
        match cli.command {
            Commands::Ingest { path, category } => {
                assert_eq!(path, PathBuf::from("minfa.txt"));
                assert_eq!(category, "REGULATION");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "lexrag", "--db", "/tmp/x.db", "--format", "json", "stats",
        ])
        .unwrap();
        assert_eq!(cli.db, PathBuf::from("/tmp/x.db"));
        assert_eq!(cli.format, "json");
    }
}
