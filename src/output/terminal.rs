// Colored terminal output for digests, carousel/task status, and
// publication forecasts.
//
// This module handles all terminal-specific formatting: colors, tables.
// The CLI's display functions delegate here.

use colored::Colorize;

use crate::db::models::{CarouselTask, Post, TaskStatus};
use crate::engagement::{EngagementForecast, Recommendation};
use crate::mixer::DigestStats;
use crate::output::truncate_chars;

/// Display a mixed digest: one row per post, in the order the Content
/// Mixer chose, followed by the digest's category/sentiment breakdown.
pub fn display_digest(posts: &[Post], stats: &DigestStats) {
    if posts.is_empty() {
        println!("No posts selected for this digest.");
        return;
    }

    println!("\n{}", format!("=== Digest ({} posts) ===", posts.len()).bold());
    println!();
    println!("  {:>3}  {:<12} {:<10} {:>6}  {}", "#".dimmed(), "category".dimmed(), "sentiment".dimmed(), "score".dimmed(), "text".dimmed());
    println!("  {}", "-".repeat(90).dimmed());

    for (i, post) in posts.iter().enumerate() {
        let category = post.ai_category.as_deref().unwrap_or("novost");
        let sentiment = post.sentiment_label.as_deref().unwrap_or("neutral");
        let preview = truncate_chars(&post.text, 60);
        println!(
            "  {:>3}. {:<12} {:<10} {:>6.1}  {}",
            i + 1,
            category,
            colorize_sentiment(sentiment),
            post.ai_score,
            preview.dimmed(),
        );
    }

    println!();
    println!("  Average score: {:.1}", stats.average_score);
    println!("  Diversity: {:.2}", stats.diversity_score);
    print!("  Categories: ");
    let mut parts: Vec<String> = stats.categories.iter().map(|(k, v)| format!("{k}={v}")).collect();
    parts.sort();
    println!("{}", parts.join(", "));
}

/// Display a single carousel task's state.
pub fn display_task(task: &CarouselTask) {
    println!(
        "\n{}",
        format!("=== Task #{} ({}) ===", task.id, task.region_code).bold()
    );
    println!("  Credential: {}", task.credential_name);
    println!("  Status: {}", colorize_task_status(task.status));
    println!("  Queued: {}", task.queued_at);
    if let Some(started) = &task.started_at {
        println!("  Started: {started}");
    }
    if let Some(completed) = &task.completed_at {
        println!("  Completed: {completed}");
    }
    println!("  Posts retrieved: {}", task.posts_retrieved);
    if let Some(error) = &task.error {
        println!("  {} {}", "Error:".red(), error);
    }
}

/// Display an engagement forecast for a candidate publication time.
pub fn display_forecast(forecast: &EngagementForecast) {
    println!("\n{}", "=== Publication Forecast ===".bold());
    println!("  Forecast engagement: {:.1}", forecast.forecast);
    println!("  Historical average:  {:.1}", forecast.average);
    println!("  vs. average: {:+.1}%", forecast.vs_average_pct);
    println!("  Recommendation: {}", colorize_recommendation(forecast.recommendation));
}

fn colorize_sentiment(sentiment: &str) -> colored::ColoredString {
    match sentiment {
        "positive" => sentiment.green(),
        "negative" => sentiment.red(),
        _ => sentiment.dimmed(),
    }
}

fn colorize_task_status(status: TaskStatus) -> colored::ColoredString {
    match status {
        TaskStatus::Queued => "queued".dimmed(),
        TaskStatus::Running => "running".yellow(),
        TaskStatus::Completed => "completed".green(),
        TaskStatus::Failed => "failed".red().bold(),
    }
}

fn colorize_recommendation(recommendation: Recommendation) -> colored::ColoredString {
    match recommendation {
        Recommendation::StronglyRecommended => "strongly recommended".green().bold(),
        Recommendation::Recommended => "recommended".green(),
        Recommendation::Acceptable => "acceptable".dimmed(),
        Recommendation::NotRecommended => "not recommended".red(),
    }
}
