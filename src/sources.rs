//! Seed source: the notices table in the input SQLite database.
//!
//! The table and both columns are validated before any row is read; a
//! missing table or column is fatal. Rows come back in stored order.

use anyhow::{bail, Result};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::models::SeedRecord;

/// Quote an SQLite identifier.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>> {
    let exists: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?",
    )
    .bind(table)
    .fetch_one(pool)
    .await?;
    if exists == 0 {
        bail!("Table '{}' not found in input database", table);
    }

    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(pool)
        .await?;
    Ok(columns)
}

async fn validate(pool: &SqlitePool, config: &Config) -> Result<()> {
    let input = &config.input;
    let columns = table_columns(pool, &input.table).await?;

    let missing: Vec<&str> = [input.id_column.as_str(), input.link_column.as_str()]
        .into_iter()
        .filter(|c| !columns.iter().any(|existing| existing == c))
        .collect();
    if !missing.is_empty() {
        bail!(
            "Missing column(s) in table '{}': {}",
            input.table,
            missing.join(", ")
        );
    }
    Ok(())
}

/// Read up to `limit` seed records (all when `None`).
pub async fn read_seeds(config: &Config, limit: Option<usize>) -> Result<Vec<SeedRecord>> {
    let pool = db::connect_existing(&config.input.db).await?;
    validate(&pool, config).await?;

    let sql = format!(
        "SELECT CAST({} AS TEXT), CAST({} AS TEXT) FROM {} LIMIT ?",
        quote_ident(&config.input.id_column),
        quote_ident(&config.input.link_column),
        quote_ident(&config.input.table),
    );
    let limit = limit.map(|n| n as i64).unwrap_or(-1);

    let rows: Vec<(Option<String>, Option<String>)> =
        sqlx::query_as(&sql).bind(limit).fetch_all(&pool).await?;
    pool.close().await;

    Ok(rows
        .into_iter()
        .map(|(id, link)| {
            SeedRecord::new(
                id.unwrap_or_default(),
                link.map(|l| l.trim().to_string()).unwrap_or_default(),
            )
        })
        .collect())
}

/// `licita check`: validate the configuration and report on the input
/// table and any leftover cache.
pub async fn run_check(config: &Config) -> Result<()> {
    let input = &config.input;
    let pool = db::connect_existing(&input.db).await?;
    validate(&pool, config).await?;

    let rows: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quote_ident(&input.table)))
        .fetch_one(&pool)
        .await?;
    pool.close().await;

    println!("{:<16} {:<40} STATUS", "ITEM", "VALUE");
    println!("{:<16} {:<40} OK", "input db", input.db.display());
    println!("{:<16} {:<40} OK", "table", format!("{} ({} rows)", input.table, rows));
    println!(
        "{:<16} {:<40} OK",
        "columns",
        format!("{}, {}", input.id_column, input.link_column)
    );
    println!(
        "{:<16} {:<40} {}",
        "row limit",
        input
            .effective_limit(None)
            .map(|n| n.to_string())
            .unwrap_or_else(|| "none".to_string()),
        if rows == 0 { "EMPTY TABLE" } else { "OK" }
    );
    let cache_state = if config.cache.path.exists() {
        "LEFTOVER (will be reused)"
    } else {
        "ABSENT"
    };
    println!("{:<16} {:<40} {}", "cache", config.cache.path.display(), cache_state);

    Ok(())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use tempfile::TempDir;

    async fn numbered_db(path: &std::path::Path, n: usize) {
        let rows: Vec<(String, String)> = (0..n)
            .map(|i| (format!("EXP-{}", i), format!(" https://p.example/n/{} ", i)))
            .collect();
        let refs: Vec<(&str, &str)> = rows.iter().map(|(a, b)| (a.as_str(), b.as_str())).collect();
        seed_db(path, &refs).await;
    }

    #[tokio::test]
    async fn reads_rows_in_order_with_limit() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("licitaciones.db");
        numbered_db(&db, 5).await;

        let seeds = read_seeds(&config_for(&db, ""), Some(3)).await.unwrap();
        assert_eq!(seeds.len(), 3);
        assert_eq!(seeds[0], SeedRecord::new("EXP-0", "https://p.example/n/0"));
        assert_eq!(seeds[2].identifier, "EXP-2");

        let all = read_seeds(&config_for(&db, ""), None).await.unwrap();
        assert_eq!(all.len(), 5);
    }

    #[tokio::test]
    async fn missing_column_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("licitaciones.db");
        numbered_db(&db, 1).await;

        let err = read_seeds(&config_for(&db, "link_column = \"URL\"\n"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("URL"));
    }

    #[tokio::test]
    async fn missing_table_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let db = tmp.path().join("licitaciones.db");
        numbered_db(&db, 1).await;

        let err = read_seeds(&config_for(&db, "table = \"otra\"\n"), None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("otra"));
    }
}
