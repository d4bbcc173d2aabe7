//! CLI command definitions and parsing
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "conflux",
    version,
    about = "Hybrid dense + lexical retrieval over document chunks",
    long_about = "Conflux keeps a dense vector index and a BM25 lexical index over the same chunk \
                  corpus, runs both per query and fuses their scores into one ranked list with \
                  filters, facets and sorting."
)]
pub struct Cli {
    /// Global config file path (defaults to ~/.config/conflux/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Options shared by both search commands
#[derive(clap::Args, Debug, Clone)]
pub struct QueryArgs {
    /// Search query text
    pub query: String,

    /// Maximum number of results to return
    #[arg(short, long)]
    pub limit: Option<usize>,

    /// Minimum combined score in [0, 1]
    #[arg(short, long)]
    pub threshold: Option<f32>,

    /// Only files with this extension (repeatable)
    #[arg(long = "file-type", value_name = "EXT")]
    pub file_types: Vec<String>,

    /// Only chunks with this content type (repeatable)
    #[arg(long = "content-type", value_name = "TYPE")]
    pub content_types: Vec<String>,

    /// Metadata equality filter as KEY=VALUE (repeatable)
    #[arg(long = "meta", value_name = "KEY=VALUE")]
    pub metadata: Vec<String>,

    /// Only chunks uploaded at or after this RFC 3339 time
    #[arg(long)]
    pub from: Option<String>,

    /// Only chunks uploaded at or before this RFC 3339 time
    #[arg(long)]
    pub to: Option<String>,

    /// Result order: relevance, date or filename
    #[arg(short, long, default_value = "relevance")]
    pub sort: String,

    /// Show results in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index chunks from a JSON Lines file (one chunk object per line)
    Index {
        /// Path to the chunks file
        file: PathBuf,
    },

    /// Semantic (dense-only) search
    Search {
        #[command(flatten)]
        args: QueryArgs,
    },

    /// Hybrid dense + lexical search
    Hybrid {
        #[command(flatten)]
        args: QueryArgs,

        /// Weight of the dense path
        #[arg(long)]
        dense_weight: Option<f32>,

        /// Weight of the lexical path
        #[arg(long)]
        lexical_weight: Option<f32>,

        /// Include facet counts
        #[arg(long)]
        facets: bool,
    },

    /// Remove a file and its chunks from the store and both indexes
    Remove {
        /// File identifier
        file_id: String,
    },

    /// Show corpus and index statistics
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Show index availability
    Health {
        #[arg(long)]
        json: bool,
    },

    /// Explain how a chunk scores against a query
    Explain {
        query: String,

        chunk_id: String,
    },

    /// Rebuild both indexes from the chunk store
    Rebuild,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Validate configuration file
    Validate {
        /// Path to config file (defaults to standard location)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Initialize default configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Parse CLI arguments from command line
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_hybrid_args() {
        let cli = Cli::try_parse_from([
            "conflux",
            "hybrid",
            "apple banana",
            "--file-type",
            "pdf",
            "--file-type",
            "txt",
            "--dense-weight",
            "0",
            "--facets",
        ])
        .unwrap();

        match cli.command {
            Commands::Hybrid {
                args,
                dense_weight,
                facets,
                ..
            } => {
                assert_eq!(args.query, "apple banana");
                assert_eq!(args.file_types, vec!["pdf", "txt"]);
                assert_eq!(dense_weight, Some(0.0));
                assert!(facets);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
