//! ChatLens Command-Line Interface
//!
//! Inspect an encrypted chat store from the terminal: derive media
//! keystreams, decrypt media files, dump group nicknames and page through
//! conversation history.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

/// ChatLens - read encrypted chat stores
#[derive(Parser)]
#[command(name = "chatlens")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a media keystream and print its prefix
    Keystream {
        /// Media key
        key: String,

        /// Keystream length in bytes (defaults to the configured length)
        #[arg(short, long)]
        length: Option<usize>,

        /// Print the whole keystream as hex
        #[arg(long)]
        hex: bool,
    },

    /// Decrypt a downloaded media file
    Decrypt {
        /// Encrypted input file
        input: String,

        /// Media key
        #[arg(short, long)]
        key: String,

        /// Treat the input as video
        #[arg(long)]
        video: bool,

        /// Output path (derived from the input when omitted)
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Dump group nicknames from an ext-buffer
    Nicknames {
        /// File holding the ext-buffer
        blob: String,

        /// The file holds hex text rather than raw bytes
        #[arg(long)]
        hex: bool,

        /// Only resolve these members
        #[arg(short, long = "member")]
        members: Vec<String>,
    },

    /// Print a page of messages from a local store
    Messages {
        /// Database file
        db: String,

        /// Conversation id
        conversation: String,

        /// Rows to skip
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Rows to return
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Earliest time (unix seconds or YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Latest time (unix seconds or YYYY-MM-DD)
        #[arg(long)]
        end: Option<String>,

        /// Oldest first
        #[arg(long)]
        asc: bool,

        /// Only rows containing this text
        #[arg(short, long)]
        keyword: Option<String>,

        /// Database key as hex (prompted when omitted)
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Keystream { key, length, hex } => {
            commands::keystream(&config, &key, length, hex).await?;
        }
        Commands::Decrypt {
            input,
            key,
            video,
            out,
        } => {
            commands::decrypt(&config, &input, &key, video, out.as_deref()).await?;
        }
        Commands::Nicknames { blob, hex, members } => {
            commands::nicknames(&blob, hex, &members).await?;
        }
        Commands::Messages {
            db,
            conversation,
            offset,
            limit,
            start,
            end,
            asc,
            keyword,
            key,
        } => {
            let query = commands::MessagesQuery {
                conversation,
                offset,
                limit,
                start: start.as_deref().map(commands::parse_time).transpose()?,
                end: end.as_deref().map(commands::parse_end_time).transpose()?,
                ascending: asc,
                keyword,
            };
            commands::messages(&config, &db, key.as_deref(), &query).await?;
        }
    }

    Ok(())
}
