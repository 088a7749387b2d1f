//! Quality and category stages — the last gate before a post is
//! considered accepted.

use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::OnceLock;

use crate::db::models::Post;

use super::stage::{FilterContext, FilterResult, FilterStage, StageKind};

const MIN_WORDS: usize = 3;

fn word_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[а-яёА-ЯЁa-zA-Z]{2,}").unwrap())
}

/// Versioned alongside the fingerprint normalization rules so a
/// future change to the emoji heuristic is traceable the same way.
const EMOJI_RATIO_HEURISTIC_VERSION: u32 = 1;

fn emoji_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\u{1F600}-\u{1F64F}\u{1F300}-\u{1F5FF}\u{1F680}-\u{1F6FF}\u{2600}-\u{26FF}\u{2700}-\u{27BF}]").unwrap()
    })
}

/// Prio 70: reject on too few meaningful words, excessive emoji, or
/// excessive punctuation; bonus for substantial text.
pub struct TextQualityFilter {
    min_words: usize,
}

impl TextQualityFilter {
    pub fn new(min_words: usize) -> Self {
        Self { min_words }
    }
}

impl Default for TextQualityFilter {
    fn default() -> Self {
        Self::new(MIN_WORDS)
    }
}

#[async_trait]
impl FilterStage for TextQualityFilter {
    fn name(&self) -> &'static str {
        "TextQuality"
    }
    fn priority(&self) -> u32 {
        70
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, _ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        let _ = EMOJI_RATIO_HEURISTIC_VERSION;
        if post.text.is_empty() {
            return Ok(if post.attachments.is_empty() {
                FilterResult::reject("no content")
            } else {
                FilterResult::pass()
            });
        }

        let word_count = word_pattern().find_iter(&post.text).count();
        if word_count < self.min_words {
            return Ok(FilterResult::reject(format!(
                "too few words: {word_count} (min {})",
                self.min_words
            )));
        }

        let char_count = post.text.chars().count().max(1);
        let emoji_count = emoji_pattern().find_iter(&post.text).count();
        if emoji_count as f64 > char_count as f64 * 0.3 {
            return Ok(FilterResult::reject(format!("too many emojis: {emoji_count}")));
        }

        let excess_punctuation = post
            .text
            .matches(|c| c == '!' || c == '?')
            .count();
        if has_punctuation_run(&post.text) && excess_punctuation > 5 {
            return Ok(FilterResult::pass_with_delta(-10.0));
        }

        let bonus = if word_count > 20 { 5.0 } else { 0.0 };
        Ok(FilterResult::pass_with_delta(bonus))
    }
}

/// True if `!`/`?` occurs 3+ times in a row anywhere in the text, matching
/// the original `[!?]{3,}` pattern without needing a regex for it.
fn has_punctuation_run(text: &str) -> bool {
    let mut run = 0;
    for c in text.chars() {
        if c == '!' || c == '?' {
            run += 1;
            if run >= 3 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// Prio 71: enforce an allow-list and/or block-list of target digest
/// categories. A post with no category assigned yet is passed through
/// unconditionally (category assignment happens upstream of the pipeline).
pub struct CategoryFilter;

#[async_trait]
impl FilterStage for CategoryFilter {
    fn name(&self) -> &'static str {
        "Category"
    }
    fn priority(&self) -> u32 {
        71
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        let Some(category) = post.ai_category.as_deref() else {
            return Ok(FilterResult::pass());
        };

        if ctx.blocked_categories.iter().any(|c| c == category) {
            return Ok(FilterResult::reject(format!("blocked category: {category}")));
        }
        if let Some(allowed) = ctx.allowed_categories {
            if !allowed.iter().any(|c| c == category) {
                return Ok(FilterResult::reject(format!("category not allowed: {category}")));
            }
        }
        Ok(FilterResult::pass())
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

    fn ctx(db: &dyn crate::db::traits::Database, allowed: Option<&[String]>, blocked: &[String]) -> FilterContext<'_> {
        FilterContext {
            db,
            region_id: 1,
            strict_main_news_groups: &[],
            community_external_id: -1,
            is_neighbor_region: false,
            max_age_hours: 72.0,
            min_views: 0,
            min_text_len: 10,
            max_text_len: 10_000,
            min_regional_matches: 1,
            allowed_categories: allowed,
            blocked_categories: blocked,
            region_fallback_keywords: &[],
            now_unix: 0,
        }
    }

    #[tokio::test]
    async fn text_quality_rejects_too_few_words() {
        let db = test_db().await;
        let c = ctx(&db, None, &[]);
        let p = post("ok wow");
        let result = TextQualityFilter::default().apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn text_quality_bonuses_long_text() {
        let db = test_db().await;
        let c = ctx(&db, None, &[]);
        let long_text = "слово ".repeat(25);
        let p = post(long_text.trim());
        let result = TextQualityFilter::default().apply(&p, &c).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score_delta, 5.0);
    }

    #[tokio::test]
    async fn category_filter_respects_block_list() {
        let db = test_db().await;
        let blocked = vec!["advertising".to_string()];
        let c = ctx(&db, None, &blocked);
        let mut p = post("reklama post here with enough words yes");
        p.ai_category = Some("advertising".to_string());
        let result = CategoryFilter.apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn category_filter_respects_allow_list() {
        let db = test_db().await;
        let allowed = vec!["news".to_string()];
        let c = ctx(&db, Some(&allowed), &[]);
        let mut p = post("some post");
        p.ai_category = Some("sports".to_string());
        let result = CategoryFilter.apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }
}
