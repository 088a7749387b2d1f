//! The `FilterStage` trait and the result shape every stage returns.
//!
//! One trait covers every stage regardless of whether it consults the store,
//! a cache, or nothing at all — `kind` is metadata for stats/logging, not a
//! second trait hierarchy, per the single-interface shape this pipeline uses.

use async_trait::async_trait;

use crate::db::models::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// No I/O: string/number checks against the post itself.
    Pure,
    /// Reads the store (or a TTL cache in front of it).
    Store,
}

/// What a single stage decided about a post.
#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub passed: bool,
    pub reason: Option<String>,
    pub score_delta: f64,
    pub metadata: serde_json::Value,
}

impl FilterResult {
    pub fn pass() -> Self {
        Self { passed: true, ..Default::default() }
    }

    pub fn pass_with_delta(score_delta: f64) -> Self {
        Self { passed: true, score_delta, ..Default::default() }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self { passed: false, reason: Some(reason.into()), ..Default::default() }
    }
}

/// Read-only context a stage needs beyond the post itself — the store handle
/// plus whatever per-region configuration the stage consults.
pub struct FilterContext<'a> {
    pub db: &'a dyn crate::db::traits::Database,
    pub region_id: i64,
    /// Community category/config groups whose `OnlyMainNewsFilter` requires
    /// `owner_id == author_id`. Empty means "not configured".
    pub strict_main_news_groups: &'a [i64],
    /// The external id of the community a batch's posts were fetched from —
    /// resolved once per scan by the caller so `OnlyMainNewsFilter` stays a
    /// pure, I/O-free stage.
    pub community_external_id: i64,
    /// Set when the post's source region is a configured neighbor of the
    /// target region.
    pub is_neighbor_region: bool,
    pub max_age_hours: f64,
    pub min_views: u64,
    pub min_text_len: usize,
    pub max_text_len: usize,
    pub min_regional_matches: u32,
    pub allowed_categories: Option<&'a [String]>,
    pub blocked_categories: &'a [String],
    /// Region name/code-derived keywords used when no operator-supplied
    /// region keyword list exists.
    pub region_fallback_keywords: &'a [String],
    /// Unix seconds "now", injected so stages are deterministic in tests.
    pub now_unix: i64,
}

#[async_trait]
pub trait FilterStage: Send + Sync {
    fn name(&self) -> &'static str;
    fn priority(&self) -> u32;
    fn kind(&self) -> StageKind;

    /// Apply the stage. Errors are treated as fail-open "passed" by the
    /// runner — a stage itself should only return `Err` for genuine
    /// infrastructure faults (store unavailable, cache poisoned), never for
    /// a post simply failing the check (that's `FilterResult::reject`).
    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult>;

    /// `(hits, misses)` against this stage's TTL cache, if it has one.
    fn cache_stats(&self) -> Option<(u64, u64)> {
        None
    }
}
