// System status display — DB stats, region/credential counts, per-stage
// filter counters, rate-gate fail-open count.

use anyhow::Result;
use std::path::Path;

use crate::db;
use crate::dispatcher::TaskMetrics;
use crate::pipeline::{FilterPipeline, StageStats};
use crate::ratelimit::RateGate;
use crate::upstream::UpstreamClient;

/// Trait so both the binary's Config and tests can call show().
pub trait HasDbPath {
    fn db_path(&self) -> &str;
}

/// Display system status to the terminal.
pub fn show(config: &impl HasDbPath) -> Result<()> {
    let db_path = config.db_path();

    if !Path::new(db_path).exists() {
        println!("Database: not initialized");
        println!("\nRun `wallwatch init` to set up the database.");
        return Ok(());
    }

    let conn = db::open(db_path)?;

    let file_size = std::fs::metadata(db_path)
        .map(|m| format_bytes(m.len()))
        .unwrap_or_else(|_| "unknown".to_string());
    println!("Database: {} ({})", db_path, file_size);

    let table_count = db::schema::table_count(&conn)?;
    println!("Tables: {table_count}");

    let regions = db::queries::list_active_regions(&conn)?;
    println!("Active regions: {}", regions.len());

    let credentials = db::queries::list_all_credentials(&conn)?;
    let eligible = credentials.iter().filter(|c| c.is_eligible_for_scan()).count();
    println!("Credentials: {} total, {} eligible", credentials.len(), eligible);

    let scan_state = db::queries::get_all_scan_state(&conn)?;
    let last_scans = scan_state.iter().filter(|(k, _)| k.starts_with("carousel:last_scan_at:")).count();
    if last_scans == 0 {
        println!("Last scan: never");
    } else {
        println!("Regions scanned at least once: {last_scans}");
    }

    match scan_state.iter().find(|(k, _)| k == "carousel:min_interval_minutes") {
        Some((_, v)) => println!("Carousel min interval: {v} minutes"),
        None => println!(
            "Carousel min interval: default ({} minutes)",
            crate::carousel::DEFAULT_MIN_INTERVAL_MINUTES
        ),
    }

    Ok(())
}

/// Render per-stage filter statistics after a `FilterPipeline::run` call.
pub fn show_pipeline_stats(pipeline: &FilterPipeline) {
    println!("\nFilter pipeline stage statistics:");
    println!("  {:<24} {:>8} {:>8} {:>9} {:>8}", "stage", "checked", "passed", "rejected", "errored");
    for (name, stats) in pipeline.statistics() {
        print_stage_row(name, &stats);
    }
}

fn print_stage_row(name: &str, stats: &StageStats) {
    println!("  {:<24} {:>8} {:>8} {:>9} {:>8}", name, stats.checked, stats.passed, stats.rejected, stats.errored);
}

/// Render the ingestion rate gate's fail-open counter — a non-zero count
/// means the gate's own storage was unavailable at least once and admission
/// defaulted to "allow" rather than blocking ingestion.
pub fn show_rate_gate_stats(gate: &RateGate) {
    let fail_open = gate.fail_open_total();
    if fail_open > 0 {
        println!("Rate gate: {fail_open} admission(s) failed open");
    } else {
        println!("Rate gate: no fail-open admissions");
    }
}

/// Render aggregate TTL-cache hit/miss counts across every cached filter
/// stage.
pub fn show_cache_stats(pipeline: &FilterPipeline) {
    let (hits, misses) = pipeline.cache_stats();
    let total = hits + misses;
    if total == 0 {
        println!("Filter stage caches: no lookups yet");
    } else {
        println!("Filter stage caches: {hits}/{total} hits ({:.1}% hit ratio)", pipeline.cache_hit_ratio() * 100.0);
    }
}

/// Render per-task-kind invocation counts and average duration.
pub fn show_task_stats(metrics: &TaskMetrics) {
    println!("\nTask dispatch statistics:");
    println!("  {:<20} {:>6} {:>14}", "task", "count", "avg duration");
    for (kind, count, total) in metrics.snapshot() {
        let avg_ms = if count == 0 { 0.0 } else { total.as_secs_f64() * 1000.0 / count as f64 };
        println!("  {:<20} {:>6} {:>11.1}ms", kind.label(), count, avg_ms);
    }
}

/// Render the upstream client's request/error counters.
pub fn show_upstream_stats(client: &UpstreamClient) {
    let total = client.requests_total();
    if total == 0 {
        println!("Upstream requests: none made yet");
    } else {
        println!(
            "Upstream requests: {total} total, {} error(s) ({:.1}% error rate)",
            client.errors_total(),
            client.error_rate() * 100.0
        );
    }
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
