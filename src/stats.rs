//! Database statistics.
//!
//! A quick summary of what is stored: indexed chunks per document, users,
//! sessions and chat messages. Used by `cke stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::migrate;

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub name: String,
    pub dimension: i64,
    pub metric: String,
    pub documents: i64,
    pub entries: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub db_bytes: u64,
    pub indexes: Vec<IndexStats>,
    pub users: i64,
    pub user_sessions: i64,
    pub chat_sessions: i64,
    pub messages: i64,
    /// Most recent chat message, Unix millis.
    pub last_message_at: Option<i64>,
}

pub async fn collect(pool: &SqlitePool, config: &Config) -> Result<Stats> {
    let index_rows = sqlx::query(
        r#"
        SELECT
            m.name,
            m.dimension,
            m.metric,
            COUNT(DISTINCT e.document_id) AS documents,
            COUNT(e.id) AS entries
        FROM index_meta m
        LEFT JOIN index_entries e ON e.index_name = m.name
        GROUP BY m.name
        ORDER BY m.name
        "#,
    )
    .fetch_all(pool)
    .await?;

    let indexes = index_rows
        .iter()
        .map(|row| IndexStats {
            name: row.get("name"),
            dimension: row.get("dimension"),
            metric: row.get("metric"),
            documents: row.get("documents"),
            entries: row.get("entries"),
        })
        .collect();

    let users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await?;
    let user_sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_sessions")
        .fetch_one(pool)
        .await?;
    let chat_sessions: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT session_id) FROM chat_history")
        .fetch_one(pool)
        .await?;
    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_history")
        .fetch_one(pool)
        .await?;
    let last_message_at: Option<i64> = sqlx::query_scalar("SELECT MAX(created_at) FROM chat_history")
        .fetch_one(pool)
        .await?;

    let db_bytes = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(Stats {
        db_bytes,
        indexes,
        users,
        user_sessions,
        chat_sessions,
        messages,
        last_message_at,
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate::migrate(&pool).await?;
    let stats = collect(&pool, config).await?;
    pool.close().await;

    println!("Campus Knowledge Engine: Database Stats");
    println!("=======================================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(stats.db_bytes));
    println!();
    println!("  Users:       {}", stats.users);
    println!("  Sessions:    {}", stats.chat_sessions);
    println!("  Messages:    {}", stats.messages);
    println!(
        "  Last chat:   {}",
        stats
            .last_message_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.indexes.is_empty() {
        println!();
        println!("  Indexes:");
        println!(
            "  {:<24} {:>6} {:>10} {:>8} {:>8}",
            "NAME", "DIMS", "METRIC", "DOCS", "CHUNKS"
        );
        println!("  {}", "-".repeat(60));
        for idx in &stats.indexes {
            println!(
                "  {:<24} {:>6} {:>10} {:>8} {:>8}",
                idx.name, idx.dimension, idx.metric, idx.documents, idx.entries
            );
        }
    }

    println!();
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix-millis timestamp as a relative time string.
fn format_ts_relative(millis: i64) -> String {
    let delta = (chrono::Utc::now().timestamp_millis() - millis) / 1000;
    if delta < 0 {
        return format_ts_iso(millis);
    }

    let plural = |n: i64| if n == 1 { "" } else { "s" };
    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, plural(mins))
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, plural(hours))
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, plural(days))
    } else {
        format_ts_iso(millis)
    }
}

fn format_ts_iso(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| millis.to_string())
}
