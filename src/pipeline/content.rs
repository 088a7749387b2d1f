//! Content stages: text length, views, duplicate detection by
//! fingerprint, blacklisted words, spam patterns.

use async_trait::async_trait;
use regex_lite::Regex;
use std::sync::OnceLock;

use crate::db::models::Post;

use super::cache::TtlCache;
use super::stage::{FilterContext, FilterResult, FilterStage, StageKind};

/// Prio 30: reject posts with neither text nor media, or whose text falls
/// outside `[min_text_len, max_text_len]`.
pub struct TextLengthFilter;

#[async_trait]
impl FilterStage for TextLengthFilter {
    fn name(&self) -> &'static str {
        "TextLength"
    }
    fn priority(&self) -> u32 {
        30
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.text.is_empty() && post.attachments.is_empty() {
            return Ok(FilterResult::reject("no text and no media"));
        }
        let len = post.text.chars().count();
        if !post.text.is_empty() && len < ctx.min_text_len {
            return Ok(FilterResult::reject(format!("text too short: {len} chars")));
        }
        if len > ctx.max_text_len {
            return Ok(FilterResult::reject(format!("text too long: {len} chars")));
        }
        Ok(FilterResult::pass())
    }
}

/// Prio 31: reject posts with fewer than `min_views`; bonus up to +15 for
/// popular posts (views // 50, capped), following the original "Postopus"
/// rationale that view count is a proxy for interest.
pub struct MinimumViewsFilter;

#[async_trait]
impl FilterStage for MinimumViewsFilter {
    fn name(&self) -> &'static str {
        "MinimumViews"
    }
    fn priority(&self) -> u32 {
        31
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.views < ctx.min_views {
            return Ok(FilterResult::reject(format!("too few views: {}", post.views)));
        }
        let bonus = if post.views > 100 {
            ((post.views / 50) as f64).min(15.0)
        } else {
            0.0
        };
        Ok(FilterResult::pass_with_delta(bonus))
    }
}

/// Prio 40: reject if another post shares this one's full-text fingerprint.
pub struct TextDuplicateFullFilter;

#[async_trait]
impl FilterStage for TextDuplicateFullFilter {
    fn name(&self) -> &'static str {
        "TextDuplicateFull"
    }
    fn priority(&self) -> u32 {
        40
    }
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.fingerprint_text_full.is_empty() {
            return Ok(FilterResult::pass());
        }
        let dup = ctx
            .db
            .find_post_by_text_full(&post.fingerprint_text_full, &post.fingerprint_lip)
            .await?;
        match dup {
            Some(existing) => Ok(FilterResult::reject(format!(
                "full-text duplicate of post {}",
                existing.id
            ))),
            None => Ok(FilterResult::pass()),
        }
    }
}

/// Prio 41: reject if another post shares this one's text-core fingerprint
/// (near-duplicate: same middle slice, different opener/closer).
pub struct TextDuplicateCoreFilter;

#[async_trait]
impl FilterStage for TextDuplicateCoreFilter {
    fn name(&self) -> &'static str {
        "TextDuplicateCore"
    }
    fn priority(&self) -> u32 {
        41
    }
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.fingerprint_text_core.is_empty() {
            return Ok(FilterResult::pass());
        }
        let dup = ctx
            .db
            .find_post_by_text_core(&post.fingerprint_text_core, &post.fingerprint_lip)
            .await?;
        match dup {
            Some(existing) => Ok(FilterResult::reject(format!(
                "core-text duplicate of post {}",
                existing.id
            ))),
            None => Ok(FilterResult::pass()),
        }
    }
}

/// Prio 42: reject if this post's media fingerprint set intersects another
/// post's, scanning only the most recent `recent_limit` posts.
pub struct MediaDuplicateFilter {
    recent_limit: u32,
}

impl MediaDuplicateFilter {
    pub fn new(recent_limit: u32) -> Self {
        Self { recent_limit }
    }
}

impl Default for MediaDuplicateFilter {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl FilterStage for MediaDuplicateFilter {
    fn name(&self) -> &'static str {
        "MediaDuplicate"
    }
    fn priority(&self) -> u32 {
        42
    }
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.fingerprint_media.is_empty() {
            return Ok(FilterResult::pass());
        }
        let dup = ctx
            .db
            .find_post_by_media_overlap(&post.fingerprint_media, &post.fingerprint_lip, self.recent_limit)
            .await?;
        match dup {
            Some(existing) => Ok(FilterResult::reject(format!(
                "media overlap with post {}",
                existing.id
            ))),
            None => Ok(FilterResult::pass()),
        }
    }
}

/// Prio 50: reject if any blacklisted token occurs in the (lowercased)
/// text. The word list is TTL-cached.
pub struct BlacklistWordFilter {
    cache: TtlCache<(), Vec<String>>,
}

impl BlacklistWordFilter {
    pub fn new() -> Self {
        Self { cache: TtlCache::default() }
    }

    pub fn invalidate(&self) {
        self.cache.invalidate(&());
    }
}

impl Default for BlacklistWordFilter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FilterStage for BlacklistWordFilter {
    fn name(&self) -> &'static str {
        "BlacklistWord"
    }
    fn priority(&self) -> u32 {
        50
    }
    fn kind(&self) -> StageKind {
        StageKind::Store
    }

    fn cache_stats(&self) -> Option<(u64, u64)> {
        Some((self.cache.hits(), self.cache.misses()))
    }

    async fn apply(&self, post: &Post, ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.text.is_empty() {
            return Ok(FilterResult::pass());
        }
        let words = self
            .cache
            .get_or_refill((), || ctx.db.list_blacklisted_words())
            .await?;
        let lowered = post.text.to_lowercase();
        for word in &words {
            if !word.is_empty() && lowered.contains(word.as_str()) {
                return Ok(FilterResult::reject(format!("blacklisted word: {word}")));
            }
        }
        Ok(FilterResult::pass())
    }
}

/// Prio 51: reject text matching any of a fixed set of spam patterns —
/// phone number openers, all-caps runs, repeated punctuation/characters,
/// money emoji, and link shorteners. The repeated-character check is
/// hand-rolled since regex-lite has no backreference support for
/// `(.)\1{n,}`.
pub struct SpamPatternFilter;

fn phone_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\+?[78]\d{10}").unwrap())
}

fn caps_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[А-ЯA-Z]{20,}").unwrap())
}

fn excess_punctuation_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[!?]{3,}").unwrap())
}

fn money_emoji_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\u{1F4B0}|\u{1F4B5}|\u{1F4B3}|\u{1F4B8}").unwrap())
}

fn short_url_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"bit\.ly|goo\.gl|clck\.ru").unwrap())
}

/// True if any single character repeats more than `run` times consecutively.
fn has_repeating_run(text: &str, run: usize) -> bool {
    let mut chars = text.chars();
    let Some(mut prev) = chars.next() else { return false };
    let mut count = 1usize;
    for c in chars {
        if c == prev {
            count += 1;
            if count > run {
                return true;
            }
        } else {
            prev = c;
            count = 1;
        }
    }
    false
}

#[async_trait]
impl FilterStage for SpamPatternFilter {
    fn name(&self) -> &'static str {
        "SpamPattern"
    }
    fn priority(&self) -> u32 {
        51
    }
    fn kind(&self) -> StageKind {
        StageKind::Pure
    }

    async fn apply(&self, post: &Post, _ctx: &FilterContext<'_>) -> anyhow::Result<FilterResult> {
        if post.text.is_empty() {
            return Ok(FilterResult::pass());
        }
        if phone_pattern().is_match(&post.text) {
            return Ok(FilterResult::reject("looks like a bare phone number"));
        }
        if caps_pattern().is_match(&post.text) {
            return Ok(FilterResult::reject("excessive capitalization"));
        }
        if has_repeating_run(&post.text, 10) {
            return Ok(FilterResult::reject("repeated character run"));
        }
        if money_emoji_pattern().is_match(&post.text) {
            return Ok(FilterResult::reject("money-emoji spam signature"));
        }
        if short_url_pattern().is_match(&post.text) {
            return Ok(FilterResult::reject("link-shortener spam signature"));
        }
        if excess_punctuation_pattern().find_iter(&post.text).count() > 5 {
            return Ok(FilterResult::pass_with_delta(-10.0));
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

    fn ctx(db: &dyn crate::db::traits::Database) -> FilterContext<'_> {
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
            allowed_categories: None,
            blocked_categories: &[],
            region_fallback_keywords: &[],
            now_unix: 0,
        }
    }

    #[tokio::test]
    async fn text_length_rejects_short_text() {
        let db = test_db().await;
        let c = ctx(&db);
        let p = post("too short");
        let result = TextLengthFilter.apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn text_length_passes_media_only() {
        let db = test_db().await;
        let c = ctx(&db);
        let mut p = post("");
        p.attachments = vec!["photo1".into()];
        let result = TextLengthFilter.apply(&p, &c).await.unwrap();
        assert!(result.passed);
    }

    #[tokio::test]
    async fn spam_pattern_catches_phone_number() {
        let db = test_db().await;
        let c = ctx(&db);
        let p = post("+79991234567 call now for a discount on tires");
        let result = SpamPatternFilter.apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn spam_pattern_catches_repeating_chars() {
        let db = test_db().await;
        let c = ctx(&db);
        let p = post(&format!("look at this {}", "a".repeat(15)));
        let result = SpamPatternFilter.apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }

    #[tokio::test]
    async fn spam_pattern_penalizes_excess_punctuation_without_rejecting() {
        let db = test_db().await;
        let c = ctx(&db);
        let p = post("wow!!! really?!?! amazing!!! no way?!?! true!!! what?!?!");
        let result = SpamPatternFilter.apply(&p, &c).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.score_delta, -10.0);
    }

    #[tokio::test]
    async fn blacklist_word_rejects_configured_word() {
        let db = test_db().await;
        db.add_blacklisted_word("казино").await.unwrap();
        let c = ctx(&db);
        let p = post("выиграй в казино прямо сейчас");
        let result = BlacklistWordFilter::new().apply(&p, &c).await.unwrap();
        assert!(!result.passed);
    }
}
