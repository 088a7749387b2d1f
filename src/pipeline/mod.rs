//! The filter pipeline: an ordered chain of stages a post must pass
//! to move from `new` toward `accepted`.
//!
//! Stages run filter-major — each stage is applied across the whole
//! remaining batch before the next stage starts — so per-stage statistics
//! line up with a single pass over the data rather than per-post
//! bookkeeping.

pub mod cache;
pub mod content;
pub mod quality;
pub mod regional;
pub mod stage;
pub mod structural;

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::db::models::{Post, PostStatus};
use crate::db::traits::Database;

pub use stage::{FilterContext, FilterResult, FilterStage, StageKind};

/// Running totals for a single stage, reset independently of the others
/// Reset independently of the other stages on operator command.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StageStats {
    pub checked: u64,
    pub passed: u64,
    pub rejected: u64,
    pub errored: u64,
}

/// Summary of one `FilterPipeline::run` call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct PipelineReport {
    pub original_count: usize,
    pub passed_count: usize,
    pub rejected_count: usize,
    pub per_stage: Vec<(String, StageStats)>,
}

/// The ordered chain of stages, sorted ascending by priority at construction.
pub struct FilterPipeline {
    stages: Vec<Box<dyn FilterStage>>,
    stats: HashMap<&'static str, StageStats>,
}

impl FilterPipeline {
    pub fn new(mut stages: Vec<Box<dyn FilterStage>>) -> Self {
        stages.sort_by_key(|s| s.priority());
        let stats = stages.iter().map(|s| (s.name(), StageStats::default())).collect();
        Self { stages, stats }
    }

    /// The 14 stock stages at their assigned priorities.
    pub fn standard() -> Self {
        Self::new(vec![
            Box::new(structural::StructuralDuplicateFilter),
            Box::new(structural::DateFilter),
            Box::new(structural::BlacklistIdFilter::new()),
            Box::new(structural::OnlyMainNewsFilter),
            Box::new(content::TextLengthFilter),
            Box::new(content::MinimumViewsFilter),
            Box::new(content::TextDuplicateFullFilter),
            Box::new(content::TextDuplicateCoreFilter),
            Box::new(content::MediaDuplicateFilter::default()),
            Box::new(content::BlacklistWordFilter::new()),
            Box::new(content::SpamPatternFilter),
            Box::new(regional::RegionalRelevanceFilter::new()),
            Box::new(regional::NeighborRegionFilter),
            Box::new(quality::TextQualityFilter::default()),
            Box::new(quality::CategoryFilter),
        ])
    }

    /// Run every stage, in priority order, against `posts`. A post rejected
    /// by a stage is removed from the batch before the next stage runs and
    /// is persisted as `rejected` with the stage's reason. A stage that
    /// errors fails open: the error is logged, the post keeps moving, and
    /// the stage's `errored` counter is incremented instead of `rejected`
    /// or `passed`.
    pub async fn run(&mut self, db: &dyn Database, posts: Vec<Post>, ctx_base: &ContextFactory<'_>) -> anyhow::Result<PipelineReport> {
        let original_count = posts.len();
        let mut remaining = posts;
        let mut rejected_count = 0usize;

        for stage in &self.stages {
            if remaining.is_empty() {
                debug!(stage = stage.name(), "no posts remaining, skipping rest of pipeline");
                break;
            }

            let entry = self.stats.entry(stage.name()).or_default();
            let mut survivors = Vec::with_capacity(remaining.len());

            for mut post in remaining {
                entry.checked += 1;
                let ctx = ctx_base.build(&post);

                match stage.apply(&post, &ctx).await {
                    Ok(result) => {
                        if result.passed {
                            entry.passed += 1;
                            if result.score_delta != 0.0 {
                                post.adjust_score(result.score_delta);
                                db.update_post_score(post.id, post.ai_score).await?;
                            }
                            survivors.push(post);
                        } else {
                            entry.rejected += 1;
                            rejected_count += 1;
                            let reason = result.reason.unwrap_or_default();
                            debug!(stage = stage.name(), post_id = post.id, reason = %reason, "post rejected");
                            let is_spam = stage.name() == "SpamPattern" || reason.to_lowercase().contains("spam");
                            let status = if is_spam { PostStatus::Spam } else { PostStatus::Rejected };
                            post.transition_status(status);
                            db.update_post_status(post.id, status, Some(&reason)).await?;
                        }
                    }
                    Err(err) => {
                        warn!(stage = stage.name(), post_id = post.id, error = %err, "stage errored, failing open");
                        entry.errored += 1;
                        survivors.push(post);
                    }
                }
            }

            debug!(
                stage = stage.name(),
                passed = survivors.len(),
                rejected = entry.rejected,
                "stage complete"
            );
            remaining = survivors;
        }

        // Everything still in the batch survived every stage: these become
        // digest candidates, so persist the transition to `accepted`.
        for post in &mut remaining {
            post.transition_status(PostStatus::Accepted);
            db.update_post_status(post.id, PostStatus::Accepted, None).await?;
        }

        Ok(PipelineReport {
            original_count,
            passed_count: remaining.len(),
            rejected_count,
            per_stage: self.stats.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        })
    }

    /// Per-stage statistics, resettable on operator command.
    pub fn reset_statistics(&mut self) {
        for stats in self.stats.values_mut() {
            *stats = StageStats::default();
        }
    }

    pub fn statistics(&self) -> Vec<(&'static str, StageStats)> {
        self.stages.iter().map(|s| (s.name(), self.stats[s.name()].clone())).collect()
    }

    /// Aggregate `(hits, misses)` across every stage with a TTL cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        self.stages
            .iter()
            .filter_map(|s| s.cache_stats())
            .fold((0, 0), |(h, m), (sh, sm)| (h + sh, m + sm))
    }

    /// Fraction of cache lookups served from cache across every stage with
    /// a TTL cache. `0.0` if no stage has made a lookup yet.
    pub fn cache_hit_ratio(&self) -> f64 {
        let (hits, misses) = self.cache_stats();
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Builds a [`FilterContext`] for each post from batch-level facts resolved
/// once by the caller (region thresholds, strict-news groups, fallback
/// keywords) plus the per-post community relationship. Keeping this
/// resolution out of the stages is what lets most of them stay `Pure`,
/// with no store access of their own.
pub struct ContextFactory<'a> {
    pub db: &'a dyn Database,
    pub region_id: i64,
    pub strict_main_news_groups: Vec<i64>,
    pub community_external_id: i64,
    pub is_neighbor_region: bool,
    pub max_age_hours: f64,
    pub min_views: u64,
    pub min_text_len: usize,
    pub max_text_len: usize,
    pub min_regional_matches: u32,
    pub allowed_categories: Option<Vec<String>>,
    pub blocked_categories: Vec<String>,
    pub region_fallback_keywords: Vec<String>,
    pub now_unix: i64,
}

impl<'a> ContextFactory<'a> {
    fn build(&self, _post: &Post) -> FilterContext<'a> {
        FilterContext {
            db: self.db,
            region_id: self.region_id,
            strict_main_news_groups: &self.strict_main_news_groups,
            community_external_id: self.community_external_id,
            is_neighbor_region: self.is_neighbor_region,
            max_age_hours: self.max_age_hours,
            min_views: self.min_views,
            min_text_len: self.min_text_len,
            max_text_len: self.max_text_len,
            min_regional_matches: self.min_regional_matches,
            allowed_categories: self.allowed_categories.as_deref(),
            blocked_categories: &self.blocked_categories,
            region_fallback_keywords: &self.region_fallback_keywords,
            now_unix: self.now_unix,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteDatabase;

    fn post(id: i64, text: &str, views: u64) -> Post {
        Post {
            id,
            community_id: 1,
            region_id: 1,
            external_owner_id: -1,
            external_post_id: id,
            published_at: 1_700_000_000,
            text: text.to_string(),
            attachments: vec![],
            views,
            likes: 0,
            reposts: 0,
            comments: 0,
            ai_category: None,
            ai_score: 50.0,
            sentiment_label: None,
            status: PostStatus::New,
            rejection_reason: None,
            fingerprint_lip: format!("-1_{id}"),
            fingerprint_text_full: format!("full{id}"),
            fingerprint_text_core: format!("core{id}"),
            fingerprint_media: vec![],
            fingerprint_version: 1,
            created_at: String::new(),
        }
    }

    async fn test_db() -> SqliteDatabase {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::schema::create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    #[tokio::test]
    async fn pipeline_rejects_short_text_and_passes_good_post() {
        let db = test_db().await;
        let good = post(1, "это нормальный текст новости про наш город сегодня вечером", 200);
        let bad = post(2, "short", 200);
        db.insert_post(&good).await.unwrap();
        db.insert_post(&bad).await.unwrap();

        let mut pipeline = FilterPipeline::standard();
        let ctx = ContextFactory {
            db: &db,
            region_id: 1,
            strict_main_news_groups: vec![],
            community_external_id: -1,
            is_neighbor_region: false,
            max_age_hours: 72.0,
            min_views: 0,
            min_text_len: 10,
            max_text_len: 10_000,
            min_regional_matches: 0,
            allowed_categories: None,
            blocked_categories: vec![],
            region_fallback_keywords: vec![],
            now_unix: 1_700_000_100,
        };

        let report = pipeline.run(&db, vec![good, bad], &ctx).await.unwrap();
        assert_eq!(report.original_count, 2);
        assert_eq!(report.passed_count, 1);
        assert_eq!(report.rejected_count, 1);

        let stored_bad = db.find_post_by_lip("-1_2").await.unwrap().unwrap();
        assert_eq!(stored_bad.status, PostStatus::Rejected);

        let stored_good = db.find_post_by_lip("-1_1").await.unwrap().unwrap();
        assert_eq!(stored_good.status, PostStatus::Accepted);
    }

    #[tokio::test]
    async fn reset_statistics_clears_counters() {
        let mut pipeline = FilterPipeline::standard();
        let db = test_db().await;
        let ctx = ContextFactory {
            db: &db,
            region_id: 1,
            strict_main_news_groups: vec![],
            community_external_id: -1,
            is_neighbor_region: false,
            max_age_hours: 72.0,
            min_views: 0,
            min_text_len: 10,
            max_text_len: 10_000,
            min_regional_matches: 0,
            allowed_categories: None,
            blocked_categories: vec![],
            region_fallback_keywords: vec![],
            now_unix: 1_700_000_100,
        };
        let p = post(1, "текст с нормальной длиной для проверки статистики конвейера", 10);
        db.insert_post(&p).await.unwrap();
        pipeline.run(&db, vec![p], &ctx).await.unwrap();
        pipeline.reset_statistics();
        for (_, stats) in pipeline.statistics() {
            assert_eq!(stats.checked, 0);
        }
    }
}
