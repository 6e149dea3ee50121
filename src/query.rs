//! Read-back of loaded bars for charting.
//!
//! The store returns hits in no particular order, so the reader fetches a
//! bounded, unfiltered page and re-sorts it by date before use. Bars whose
//! date did not parse sort last.

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::loader;
use crate::models::{QueryFilter, Record};
use crate::store::SearchStore;

/// Largest page a single search may return under the store's default
/// `index.max_result_window`.
pub const MAX_RESULT_WINDOW: usize = 10_000;

fn check_limit(limit: usize) -> Result<()> {
    if limit == 0 || limit > MAX_RESULT_WINDOW {
        bail!(
            "query limit must be between 1 and {} (got {})",
            MAX_RESULT_WINDOW,
            limit
        );
    }
    Ok(())
}

/// Fetch up to `limit` bars from `collection`, sorted by date.
pub async fn fetch_series(
    store: &dyn SearchStore,
    collection: &str,
    limit: usize,
) -> Result<Vec<Record>> {
    check_limit(limit)?;
    let docs = store
        .query(collection, &QueryFilter::All, limit)
        .await
        .with_context(|| format!("Failed to query collection '{}'", collection))?;

    let mut records: Vec<Record> = docs.into_iter().map(|d| d.record).collect();
    records.sort_by_key(|r| r.date);
    Ok(records)
}

/// Render the four price series against date as a fixed-width table.
pub fn format_series(records: &[Record]) -> String {
    let mut out = format!(
        "{:<12} {:>12} {:>12} {:>12} {:>12}\n",
        "DATE", "CLOSE", "OPEN", "HIGH", "LOW"
    );
    out.push_str(&"-".repeat(64));
    out.push('\n');
    for r in records {
        out.push_str(&format!(
            "{:<12} {:>12.2} {:>12.2} {:>12.2} {:>12.2}\n",
            r.date.to_string(),
            r.close,
            r.open,
            r.high,
            r.low
        ));
    }
    out
}

/// Run the query command: connect, fetch, sort, print.
pub async fn run_query(config: &Config, collection: &str, limit: usize) -> Result<()> {
    check_limit(limit)?;
    let conn = loader::connect_elastic(&config.store).await?;
    let records = fetch_series(conn.store(), collection, limit).await?;

    println!("query {} (limit {})", collection, limit);
    println!("  bars: {}", records.len());
    println!();
    print!("{}", format_series(&records));
    Ok(())
}
