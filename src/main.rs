//! # Campus Knowledge Engine CLI (`cke`)
//!
//! ## Usage
//!
//! ```bash
//! cke --config ./config/cke.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `cke init` | Create the SQLite database and run schema migrations |
//! | `cke ingest <paths…>` | Load, chunk, embed and index files or directories |
//! | `cke ask <session> "<question>"` | Answer one question in a session |
//! | `cke chat --email <email>` | Interactive chat in a user's session |
//! | `cke history <session>` | Print a session's chat history |
//! | `cke clear <session>` | Delete a session's chat history |
//! | `cke search "<query>"` | Show the chunks retrieved for a query |
//! | `cke user register\|login\|cleanup` | Manage user accounts and sessions |
//! | `cke stats` | Database summary |
//! | `cke serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! cke init
//! cke ingest ./corpus/prospectus.pdf ./corpus/notices
//! cke ask demo "What are the library hours?"
//! cke user register --first-name Asha --last-name Rao --email asha@example.edu --password hunter22
//! cke chat --email asha@example.edu
//! ```

use campus_knowledge::{commands, config, logging, migrate, server, stats};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Campus Knowledge Engine: a retrieval-augmented college information
/// assistant.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/cke.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "cke",
    about = "Campus Knowledge Engine: answers college questions from your own documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/cke.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest documents into the vector index.
    ///
    /// Supported formats: PDF, DOCX, HTML and plain text. Directories are
    /// walked using the `[ingest]` globs. Files that fail are reported and
    /// skipped.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask one question within a session.
    Ask {
        /// Session id; history from earlier turns is used to resolve follow-ups.
        session: String,
        /// The question.
        question: String,
        /// Also print the retrieved chunks' documents and scores.
        #[arg(long)]
        sources: bool,
    },

    /// Chat interactively as a registered user.
    Chat {
        #[arg(long)]
        email: String,
        /// Read from stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },

    /// Print a session's chat history.
    History { session: String },

    /// Delete a session's chat history.
    Clear { session: String },

    /// Show what retrieval returns for a query, without generating an answer.
    Search {
        query: String,
        /// Number of chunks to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage user accounts.
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Show database statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum UserAction {
    /// Register a new user and create their chat session.
    Register {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Check credentials and print the user's session id.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Delete sessions (and their history) idle for more than `--days` days.
    Cleanup {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Commands::Serve | Commands::Ingest { .. } => "info",
        _ => "warn",
    };
    logging::init(default_filter);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { paths } => {
            commands::run_ingest(&cfg, &paths).await?;
        }
        Commands::Ask {
            session,
            question,
            sources,
        } => {
            commands::run_ask(&cfg, &session, &question, sources).await?;
        }
        Commands::Chat { email, password } => {
            commands::run_chat(&cfg, &email, password).await?;
        }
        Commands::History { session } => {
            commands::run_history(&cfg, &session).await?;
        }
        Commands::Clear { session } => {
            commands::run_clear(&cfg, &session).await?;
        }
        Commands::Search { query, limit } => {
            commands::run_search(&cfg, &query, limit).await?;
        }
        Commands::User { action } => match action {
            UserAction::Register {
                first_name,
                last_name,
                email,
                password,
            } => {
                commands::run_user_register(&cfg, &first_name, &last_name, &email, &password)
                    .await?;
            }
            UserAction::Login { email, password } => {
                commands::run_user_login(&cfg, &email, &password).await?;
            }
            UserAction::Cleanup { days } => {
                commands::run_user_cleanup(&cfg, days).await?;
            }
        },
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
