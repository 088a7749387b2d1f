//! Regional relevance stages.

use async_trait::async_trait;

use crate::db::models::Post;

use super::cache::TtlCache;
use super::stage::{FilterContext, FilterResult, FilterStage, StageKind};

/// Prio 60: require at least `min_regional_matches` keyword hits from the
/// region's configured keyword list, falling back to the region's own name
/// and code parts when no operator-supplied keywords exist. Bonus up to
/// +20 for strong matches.
pub struct RegionalRelevanceFilter {
    cache: TtlCache<i64, Vec<String>>,
}

impl RegionalRelevanceFilter {
    pub fn new() -> Self {
        Self { cache: TtlCache::default() }
    }

    pub fn invalidate(&self, region_id: i64) {
        self.cache.invalidate(&region_id);
    }
}

impl Default for RegionalRelevanceFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterStage for RegionalRelevanceFilter {
    fn name(&self) -> &'static str {
        "RegionalRelevance"
    }
    fn priority(&self) -> u32 {
        60
    }
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    fn cache_stats(&self) -> Option<(u64, u64)> {
        Some((self.cache.hits(), self.cache.misses()))
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        let region_id = ctx.region_id;
        let keywords = self
            .cache
            .get_or_refill(region_id, || ctx.db.list_region_keywords(region_id))
            .await?;

        let keywords = if keywords.is_empty() {
            fallback_keywords(ctx)
        } else {
            keywords
        };
        if keywords.is_empty() {
            // No keywords configured at all and no fallback could be built —
            // nothing to check against, so don't penalize the post.
            return Ok(FilterResult::pass());
        }

        let lowered = post.text.to_lowercase();
        let matches = keywords.iter().filter(|kw| !kw.is_empty() && lowered.contains(kw.as_str())).count() as u32;

        if matches < ctx.min_regional_matches {
            return Ok(FilterResult::reject(format!(
                "only {matches} regional keyword matches, need {}",
                ctx.min_regional_matches
            )));
        }
        let bonus = (matches as f64 * 5.0).min(20.0);
        Ok(FilterResult::pass_with_delta(bonus))
    }
}

/// Build a fallback keyword set from the region's own name/code when no
/// operator-supplied keyword list exists, the way the original filter
/// degrades gracefully rather than rejecting everything.
fn fallback_keywords(ctx: &FilterContext<'_>) -> Vec<String> {
    ctx.region_fallback_keywords.to_vec()
}

/// Prio 61: if a post arrived via a neighbor region's community, require one
/// of the configured "news" hashtags be present; +5 bonus on pass.
pub struct NeighborRegionFilter;

const NEWS_HASHTAGS: [&str; 3] = ["#новости", "#news", "новости"];

#[async_trait]
impl FilterStage for NeighborRegionFilter {
    fn name(&self) -> &'static str {
        "NeighborRegion"
    }
    fn priority(&self) -> u32 {
        61
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if !ctx.is_neighbor_region {
            return Ok(FilterResult::pass());
        }
        let lowered = post.text.to_lowercase();
        if !NEWS_HASHTAGS.iter().any(|tag| lowered.contains(tag)) {
            return Ok(FilterResult::reject("neighbor-region post missing news hashtag"));
        }
        Ok(FilterResult::pass_with_delta(5.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PostStatus;
    use crate::db::sqlite::SqliteDatabase;

    fn post(text: &str) -> Post {
        Post {
            id: 1,
            community_id: 1,
            region_id: 1,
            external_owner_id: -1,
            external_post_id: 1,
            published_at: 0,
            text: text.to_string(),
            attachments: vec![],
            views: 0,
            likes: 0,
            reposts: 0,
            comments: 0,
            ai_category: None,
            ai_score: 50.0,
            sentiment_label: None,
            status: PostStatus::New,
            rejection_reason: None,
            fingerprint_lip: "-1_1".into(),
            fingerprint_text_full: "full".into(),
            fingerprint_text_core: "core".into(),
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

    fn ctx<'a>(db: &'a dyn crate::db::traits::Database, fallback: &'a [String], neighbor: bool) -> FilterContext<'a> {
        FilterContext {
            db,
            region_id: 1,
            strict_main_news_groups: &[],
            community_external_id: -1,
            is_neighbor_region: neighbor,
            max_age_hours: 72.0,
            min_views: 0,
            min_text_len: 10,
            max_text_len: 10_000,
            min_regional_matches: 1,
            allowed_categories: None,
            blocked_categories: &[],
            region_fallback_keywords: fallback,
            now_unix: 0,
        }
    }

    #[tokio::test]
    async fn regional_relevance_requires_keyword_match() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();
        db.add_region_keyword(region_id, "питер").await.unwrap();
        let fallback = vec![];
        let c = ctx(&db, &fallback, false);
        let irrelevant = post("сегодня хорошая погода в другом городе");
        let result = RegionalRelevanceFilter::new().apply(&irrelevant, &c).await.unwrap();
        assert!(!result.passed);

        let relevant = post("новости питер сегодня");
        let result = RegionalRelevanceFilter::new().apply(&relevant, &c).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn neighbor_region_requires_news_hashtag() {
        let db = test_db().await;
        let fallback = vec![];
        let c = ctx(&db, &fallback, true);
        let no_tag = post("обычный пост без тега");
        let result = NeighborRegionFilter.apply(&no_tag, &c).await.unwrap();
        assert!(!result.passed);

        let with_tag = post("#новости из соседнего региона");
        let result = NeighborRegionFilter.apply(&with_tag, &c).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score_delta, 5.0);
    }
}
