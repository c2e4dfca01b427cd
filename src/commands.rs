//! Implementations of the `cke` subcommands.
//!
//! Commands print their results to stdout; logs go to stderr. Commands that
//! only touch history or accounts open the database directly and never
//! construct the embedding provider or chat model.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use sqlx::SqlitePool;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::accounts::AccountStore;
use crate::config::Config;
use crate::conversation::{ConversationStore, SqliteConversationStore};
use crate::db;
use crate::ingest::{FileStatus, IngestReport};
use crate::migrate;
use crate::pipeline::{Assistant, Outcome, Reply};
use crate::services::Services;

async fn open_store(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    Ok(pool)
}

/// `cke ingest <paths…>`: directories are walked, files ingested directly.
pub async fn run_ingest(config: &Config, paths: &[PathBuf]) -> Result<()> {
    if paths.is_empty() {
        bail!("no paths given");
    }
    let services = Services::start(config).await?;
    let ingestor = services.ingestor();

    let mut report = IngestReport::default();
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let dir_report = ingestor.ingest_dir(path).await?;
            report.files.extend(dir_report.files);
        } else {
            files.push(path.clone());
        }
    }
    if !files.is_empty() {
        report.files.extend(ingestor.ingest_batch(&files).await?.files);
    }
    services.shutdown().await;

    for file in &report.files {
        match &file.status {
            FileStatus::Ingested { chunks } => {
                println!("  ok      {} ({} chunks)", file.path.display(), chunks)
            }
            FileStatus::Skipped { reason } => {
                println!("  skipped {} ({})", file.path.display(), reason)
            }
            FileStatus::Failed { error } => {
                println!("  failed  {} ({})", file.path.display(), error)
            }
        }
    }
    println!(
        "ingested {} file(s), {} chunk(s); {} skipped, {} failed",
        report.ingested(),
        report.total_chunks(),
        report.skipped(),
        report.failed()
    );
    Ok(())
}

fn print_reply(reply: &Reply, show_sources: bool) {
    println!("{}", reply.text);
    if show_sources && !reply.sources.is_empty() {
        println!();
        for hit in &reply.sources {
            let page = hit
                .metadata
                .page
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            println!("  [{:.3}] {}{}", hit.score, hit.metadata.document_id, page);
        }
    }
}

/// `cke ask <session> <question>`: one turn, then exit.
pub async fn run_ask(config: &Config, session_id: &str, question: &str, sources: bool) -> Result<()> {
    let services = Services::start(config).await?;
    let reply = services.assistant()?.process_turn(session_id, question).await;
    services.shutdown().await;

    print_reply(&reply, sources);
    if reply.outcome == Outcome::Failed {
        bail!("turn failed");
    }
    Ok(())
}

/// `cke chat --email <email>`: log in and chat in the user's session until
/// `exit`, `quit` or end of input.
pub async fn run_chat(config: &Config, email: &str, password: Option<String>) -> Result<()> {
    let services = Services::start(config).await?;
    let accounts = services.accounts();
    let assistant = services.assistant()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let password = match password {
        Some(p) => p,
        None => {
            print!("Password: ");
            std::io::stdout().flush()?;
            lines.next_line().await?.unwrap_or_default()
        }
    };

    let user = accounts
        .authenticate(email, password.trim_end())
        .await?
        .context("invalid email or password")?;
    let session_id = accounts.session_for_user(user.id).await?;
    println!(
        "Hello {}! Ask me anything about the college. Type 'exit' to quit, '/clear' to reset the conversation.",
        user.first_name
    );

    chat_loop(&assistant, &session_id, &mut lines).await?;
    services.shutdown().await;
    Ok(())
}

async fn chat_loop<R>(
    assistant: &Assistant,
    session_id: &str,
    lines: &mut tokio::io::Lines<R>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "exit" | "quit" => break,
            "/clear" => {
                let removed = assistant.clear(session_id).await?;
                println!("Cleared {} message(s).", removed);
            }
            question => {
                let reply = assistant.process_turn(session_id, question).await;
                print_reply(&reply, false);
            }
        }
        println!();
    }
    Ok(())
}

/// `cke history <session>`
pub async fn run_history(config: &Config, session_id: &str) -> Result<()> {
    let pool = open_store(config).await?;
    let store = SqliteConversationStore::new(pool.clone());
    let turns = store.history(session_id).await?;
    pool.close().await;

    if turns.is_empty() {
        println!("No messages in session {}.", session_id);
        return Ok(());
    }
    for turn in &turns {
        println!(
            "[{}] {}: {}",
            turn.created_at.format("%Y-%m-%d %H:%M:%S"),
            turn.role,
            turn.content
        );
    }
    Ok(())
}

/// `cke clear <session>`
pub async fn run_clear(config: &Config, session_id: &str) -> Result<()> {
    let pool = open_store(config).await?;
    let removed = SqliteConversationStore::new(pool.clone())
        .clear(session_id)
        .await?;
    pool.close().await;
    println!("Cleared {} message(s) from session {}.", removed, session_id);
    Ok(())
}

/// `cke search <query>`: raw retrieval without generation.
pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let services = Services::start(config).await?;
    let k = limit.unwrap_or(config.retrieval.top_k);
    let vector = services.embedder().embed(query).await?;
    let hits = services
        .index()
        .search(&services.index_spec().name, &vector, k)
        .await?;
    services.shutdown().await;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {}",
            i + 1,
            hit.score,
            hit.metadata.document_id
        );
        let snippet: String = hit.text.chars().take(200).collect();
        println!("    {}", snippet.replace('\n', " "));
    }
    Ok(())
}

/// `cke user register`
pub async fn run_user_register(
    config: &Config,
    first_name: &str,
    last_name: &str,
    email: &str,
    password: &str,
) -> Result<()> {
    let pool = open_store(config).await?;
    let accounts = AccountStore::new(pool.clone());
    let user_id = accounts
        .register(first_name, last_name, email, password)
        .await?;
    let session_id = accounts.session_for_user(user_id).await?;
    pool.close().await;

    println!("Registered user {} (id {}).", email.trim().to_lowercase(), user_id);
    println!("session: {}", session_id);
    Ok(())
}

/// `cke user login`: prints the user's session id.
pub async fn run_user_login(config: &Config, email: &str, password: &str) -> Result<()> {
    let pool = open_store(config).await?;
    let accounts = AccountStore::new(pool.clone());
    let user = accounts.authenticate(email, password).await?;
    let result = match user {
        Some(user) => {
            let session_id = accounts.session_for_user(user.id).await?;
            println!("Welcome back, {} {}.", user.first_name, user.last_name);
            println!("session: {}", session_id);
            Ok(())
        }
        None => Err(anyhow::anyhow!("invalid email or password")),
    };
    pool.close().await;
    result
}

/// `cke user cleanup --days N`
pub async fn run_user_cleanup(config: &Config, days: u32) -> Result<()> {
    let pool = open_store(config).await?;
    let report = AccountStore::new(pool.clone())
        .cleanup_old_sessions(days)
        .await?;
    pool.close().await;
    println!(
        "Removed {} session(s) and {} message(s) idle for more than {} day(s).",
        report.sessions, report.messages, days
    );
    Ok(())
}
