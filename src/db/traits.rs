// Database trait — backend-agnostic async interface for all DB operations.
//
// Implementors: SqliteDatabase (wraps rusqlite), PgDatabase (wraps sqlx).
// All methods are async so both sync (rusqlite via Mutex) and native async
// (sqlx) backends fit behind a single interface.
//
// The trait mirrors the existing queries.rs function signatures, so switching
// from direct Connection usage to `Arc<dyn Database>` is a straightforward
// mechanical replacement in callers.

use anyhow::Result;
use async_trait::async_trait;

use super::models::{
    CarouselTask, Category, Community, Credential, CredentialStatus, Digest, EngagementSample,
    Post, PostStatus, Region, RegionConfig,
};

#[async_trait]
pub trait Database: Send + Sync {
    // --- Lifecycle ---

    async fn table_count(&self) -> Result<i64>;

    // --- Scan state (scheduler bookkeeping: last_scan_at, currently_running) ---

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>>;
    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()>;
    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>>;

    // --- Regions ---

    async fn create_region(&self, code: &str, name: &str, primary_outlet_id: &str) -> Result<i64>;
    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>>;
    async fn get_region(&self, id: i64) -> Result<Option<Region>>;
    async fn list_active_regions(&self) -> Result<Vec<Region>>;
    async fn update_region_config(&self, region_id: i64, config: &RegionConfig) -> Result<()>;
    async fn add_neighbor_relationship(&self, region_a: i64, region_b: i64) -> Result<()>;
    async fn deactivate_region(&self, region_id: i64) -> Result<()>;

    // --- Communities ---

    #[allow(clippy::too_many_arguments)]
    async fn create_community(
        &self,
        region_id: i64,
        external_id: i64,
        screen_name: Option<&str>,
        name: &str,
        category: Category,
    ) -> Result<i64>;
    async fn get_community(&self, id: i64) -> Result<Option<Community>>;
    async fn list_active_communities_for_region(&self, region_id: i64) -> Result<Vec<Community>>;
    async fn mark_community_checked(&self, community_id: i64, posts_found: u32) -> Result<()>;
    async fn record_community_error(&self, community_id: i64) -> Result<()>;
    async fn deactivate_community(&self, community_id: i64) -> Result<()>;

    // --- Credentials ---

    async fn create_credential(&self, name: &str, secret: &str) -> Result<i64>;
    async fn get_credential_by_name(&self, name: &str) -> Result<Option<Credential>>;
    async fn list_all_credentials(&self) -> Result<Vec<Credential>>;
    async fn list_eligible_credentials(&self) -> Result<Vec<Credential>>;
    async fn mark_credential_status(
        &self,
        name: &str,
        status: CredentialStatus,
        error_message: Option<&str>,
    ) -> Result<()>;
    async fn touch_credential_last_used(&self, name: &str) -> Result<()>;

    // --- Posts ---

    async fn insert_post(&self, post: &Post) -> Result<i64>;
    async fn find_post_by_lip(&self, lip: &str) -> Result<Option<Post>>;
    async fn find_post_by_text_full(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>>;
    async fn find_post_by_text_core(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>>;
    async fn find_post_by_media_overlap(
        &self,
        media_ids: &[String],
        exclude_lip: &str,
        recent_limit: u32,
    ) -> Result<Option<Post>>;
    async fn update_post_status(&self, post_id: i64, status: PostStatus, reason: Option<&str>) -> Result<()>;
    async fn update_post_score(&self, post_id: i64, ai_score: f64) -> Result<()>;
    async fn update_post_sentiment(&self, post_id: i64, label: &str) -> Result<()>;
    async fn update_post_category(&self, post_id: i64, category: &str) -> Result<()>;
    async fn upsert_post_stats(
        &self,
        lip: &str,
        views: u64,
        likes: u64,
        reposts: u64,
        comments: u64,
    ) -> Result<()>;
    async fn list_candidate_posts_for_region(&self, region_id: i64, limit: u32) -> Result<Vec<Post>>;
    async fn list_accepted_posts_for_region_since(&self, region_id: i64, since_unix: i64) -> Result<Vec<Post>>;
    async fn count_accepted_posts_for_region(&self, region_id: i64) -> Result<u32>;
    /// Posts whose `fingerprint_version` predates `version`.
    async fn posts_needing_refingerprint(&self, version: u32) -> Result<Vec<Post>>;

    // --- Blacklists & regional keywords ---

    async fn is_id_blacklisted(&self, external_id: i64) -> Result<bool>;
    async fn add_blacklisted_id(&self, external_id: i64) -> Result<()>;
    async fn list_blacklisted_words(&self) -> Result<Vec<String>>;
    async fn add_blacklisted_word(&self, word: &str) -> Result<()>;
    async fn list_region_keywords(&self, region_id: i64) -> Result<Vec<String>>;
    async fn add_region_keyword(&self, region_id: i64, keyword: &str) -> Result<()>;

    // --- Engagement samples ---

    #[allow(clippy::too_many_arguments)]
    async fn upsert_engagement_sample(
        &self,
        region_id: i64,
        hour: u8,
        weekday: u8,
        sample_count: u32,
        avg_engagement: f64,
    ) -> Result<()>;
    async fn get_engagement_matrix(&self, region_id: i64) -> Result<Vec<EngagementSample>>;

    // --- Carousel tasks ---

    async fn create_carousel_task(&self, region_code: &str, credential_name: &str) -> Result<i64>;
    async fn mark_task_running(&self, task_id: i64) -> Result<()>;
    async fn mark_task_completed(&self, task_id: i64, posts_retrieved: u32) -> Result<()>;
    async fn mark_task_failed(&self, task_id: i64, error: &str) -> Result<()>;
    async fn get_task(&self, task_id: i64) -> Result<Option<CarouselTask>>;
    async fn median_posts_per_scan_last_24h(&self) -> Result<Option<f64>>;

    // --- Digests ---

    async fn insert_digest(
        &self,
        region_id: i64,
        category: &str,
        post_ids: &[i64],
        scheduled_at: &str,
        template_snapshot: &serde_json::Value,
    ) -> Result<i64>;
    async fn get_digest(&self, id: i64) -> Result<Option<Digest>>;
    async fn cancel_digest(&self, id: i64) -> Result<()>;
}
