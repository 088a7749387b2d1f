// SqliteDatabase — rusqlite backend implementing the Database trait.
//
// The Connection is wrapped in tokio::sync::Mutex because Connection is !Send.
// Trait methods lock the mutex, do synchronous rusqlite work, and return.
// The lock is never held across .await points — Rust enforces this because
// MutexGuard is !Send.
//
// The free functions in queries.rs remain unchanged so existing tests
// continue to work against Connection directly.

use anyhow::Result;
use async_trait::async_trait;
use rusqlite::Connection;
use tokio::sync::Mutex;

use super::models::{
    CarouselTask, Category, Community, Credential, CredentialStatus, Digest, EngagementSample,
    Post, PostStatus, Region, RegionConfig,
};
use super::traits::Database;

pub struct SqliteDatabase {
    conn: Mutex<Connection>,
}

impl SqliteDatabase {
    /// Wrap an already-opened rusqlite Connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn table_count(&self) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::schema::table_count(&conn)
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().await;
        super::queries::get_scan_state(&conn, key)
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::set_scan_state(&conn, key, value)
    }

    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn.lock().await;
        super::queries::get_all_scan_state(&conn)
    }

    async fn create_region(&self, code: &str, name: &str, primary_outlet_id: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::create_region(&conn, code, name, primary_outlet_id)
    }

    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>> {
        let conn = self.conn.lock().await;
        super::queries::get_region_by_code(&conn, code)
    }

    async fn get_region(&self, id: i64) -> Result<Option<Region>> {
        let conn = self.conn.lock().await;
        super::queries::get_region(&conn, id)
    }

    async fn list_active_regions(&self) -> Result<Vec<Region>> {
        let conn = self.conn.lock().await;
        super::queries::list_active_regions(&conn)
    }

    async fn update_region_config(&self, region_id: i64, config: &RegionConfig) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_region_config(&conn, region_id, config)
    }

    async fn add_neighbor_relationship(&self, region_a: i64, region_b: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::add_neighbor_relationship(&conn, region_a, region_b)
    }

    async fn deactivate_region(&self, region_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::deactivate_region(&conn, region_id)
    }

    async fn create_community(
        &self,
        region_id: i64,
        external_id: i64,
        screen_name: Option<&str>,
        name: &str,
        category: Category,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::create_community(&conn, region_id, external_id, screen_name, name, category)
    }

    async fn get_community(&self, id: i64) -> Result<Option<Community>> {
        let conn = self.conn.lock().await;
        super::queries::get_community(&conn, id)
    }

    async fn list_active_communities_for_region(&self, region_id: i64) -> Result<Vec<Community>> {
        let conn = self.conn.lock().await;
        super::queries::list_active_communities_for_region(&conn, region_id)
    }

    async fn mark_community_checked(&self, community_id: i64, posts_found: u32) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::mark_community_checked(&conn, community_id, posts_found)
    }

    async fn record_community_error(&self, community_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::record_community_error(&conn, community_id)
    }

    async fn deactivate_community(&self, community_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::deactivate_community(&conn, community_id)
    }

    async fn create_credential(&self, name: &str, secret: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::create_credential(&conn, name, secret)
    }

    async fn get_credential_by_name(&self, name: &str) -> Result<Option<Credential>> {
        let conn = self.conn.lock().await;
        super::queries::get_credential_by_name(&conn, name)
    }

    async fn list_all_credentials(&self) -> Result<Vec<Credential>> {
        let conn = self.conn.lock().await;
        super::queries::list_all_credentials(&conn)
    }

    async fn list_eligible_credentials(&self) -> Result<Vec<Credential>> {
        let conn = self.conn.lock().await;
        super::queries::list_eligible_credentials(&conn)
    }

    async fn mark_credential_status(
        &self,
        name: &str,
        status: CredentialStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::mark_credential_status(&conn, name, status, error_message)
    }

    async fn touch_credential_last_used(&self, name: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::touch_credential_last_used(&conn, name)
    }

    async fn insert_post(&self, post: &Post) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::insert_post(&conn, post)
    }

    async fn find_post_by_lip(&self, lip: &str) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        super::queries::find_post_by_lip(&conn, lip)
    }

    async fn find_post_by_text_full(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        super::queries::find_post_by_text_full(&conn, fingerprint, exclude_lip)
    }

    async fn find_post_by_text_core(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        super::queries::find_post_by_text_core(&conn, fingerprint, exclude_lip)
    }

    async fn find_post_by_media_overlap(
        &self,
        media_ids: &[String],
        exclude_lip: &str,
        recent_limit: u32,
    ) -> Result<Option<Post>> {
        let conn = self.conn.lock().await;
        super::queries::find_post_by_media_overlap(&conn, media_ids, exclude_lip, recent_limit)
    }

    async fn update_post_status(&self, post_id: i64, status: PostStatus, reason: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_post_status(&conn, post_id, status, reason)
    }

    async fn update_post_score(&self, post_id: i64, ai_score: f64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_post_score(&conn, post_id, ai_score)
    }

    async fn update_post_sentiment(&self, post_id: i64, label: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_post_sentiment(&conn, post_id, label)
    }

    async fn update_post_category(&self, post_id: i64, category: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::update_post_category(&conn, post_id, category)
    }

    async fn upsert_post_stats(
        &self,
        lip: &str,
        views: u64,
        likes: u64,
        reposts: u64,
        comments: u64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::upsert_post_stats(&conn, lip, views, likes, reposts, comments)
    }

    async fn list_candidate_posts_for_region(&self, region_id: i64, limit: u32) -> Result<Vec<Post>> {
        let conn = self.conn.lock().await;
        super::queries::list_candidate_posts_for_region(&conn, region_id, limit)
    }

    async fn list_accepted_posts_for_region_since(&self, region_id: i64, since_unix: i64) -> Result<Vec<Post>> {
        let conn = self.conn.lock().await;
        super::queries::list_accepted_posts_for_region_since(&conn, region_id, since_unix)
    }

    async fn count_accepted_posts_for_region(&self, region_id: i64) -> Result<u32> {
        let conn = self.conn.lock().await;
        super::queries::count_accepted_posts_for_region(&conn, region_id)
    }

    async fn posts_needing_refingerprint(&self, version: u32) -> Result<Vec<Post>> {
        let conn = self.conn.lock().await;
        super::queries::posts_needing_refingerprint(&conn, version)
    }

    async fn is_id_blacklisted(&self, external_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        super::queries::is_id_blacklisted(&conn, external_id)
    }

    async fn add_blacklisted_id(&self, external_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::add_blacklisted_id(&conn, external_id)
    }

    async fn list_blacklisted_words(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        super::queries::list_blacklisted_words(&conn)
    }

    async fn add_blacklisted_word(&self, word: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::add_blacklisted_word(&conn, word)
    }

    async fn list_region_keywords(&self, region_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        super::queries::list_region_keywords(&conn, region_id)
    }

    async fn add_region_keyword(&self, region_id: i64, keyword: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::add_region_keyword(&conn, region_id, keyword)
    }

    async fn upsert_engagement_sample(
        &self,
        region_id: i64,
        hour: u8,
        weekday: u8,
        sample_count: u32,
        avg_engagement: f64,
    ) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::upsert_engagement_sample(&conn, region_id, hour, weekday, sample_count, avg_engagement)
    }

    async fn get_engagement_matrix(&self, region_id: i64) -> Result<Vec<EngagementSample>> {
        let conn = self.conn.lock().await;
        super::queries::get_engagement_matrix(&conn, region_id)
    }

    async fn create_carousel_task(&self, region_code: &str, credential_name: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::create_carousel_task(&conn, region_code, credential_name)
    }

    async fn mark_task_running(&self, task_id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::mark_task_running(&conn, task_id)
    }

    async fn mark_task_completed(&self, task_id: i64, posts_retrieved: u32) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::mark_task_completed(&conn, task_id, posts_retrieved)
    }

    async fn mark_task_failed(&self, task_id: i64, error: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::mark_task_failed(&conn, task_id, error)
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<CarouselTask>> {
        let conn = self.conn.lock().await;
        super::queries::get_task(&conn, task_id)
    }

    async fn median_posts_per_scan_last_24h(&self) -> Result<Option<f64>> {
        let conn = self.conn.lock().await;
        super::queries::median_posts_per_scan_last_24h(&conn)
    }

    async fn insert_digest(
        &self,
        region_id: i64,
        category: &str,
        post_ids: &[i64],
        scheduled_at: &str,
        template_snapshot: &serde_json::Value,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        super::queries::insert_digest(&conn, region_id, category, post_ids, scheduled_at, template_snapshot)
    }

    async fn get_digest(&self, id: i64) -> Result<Option<Digest>> {
        let conn = self.conn.lock().await;
        super::queries::get_digest(&conn, id)
    }

    async fn cancel_digest(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        super::queries::cancel_digest(&conn, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PostStatus;
    use crate::db::schema::create_tables;

    async fn test_db() -> SqliteDatabase {
        let conn = Connection::open_in_memory().unwrap();
        create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    fn sample_post(region_id: i64, community_id: i64, owner: i64, post_id: i64) -> Post {
        Post {
            id: 0,
            community_id,
            region_id,
            external_owner_id: owner,
            external_post_id: post_id,
            published_at: 1_700_000_000,
            text: "Hello world".to_string(),
            attachments: vec![],
            views: 100,
            likes: 10,
            reposts: 2,
            comments: 1,
            ai_category: None,
            ai_score: 50.0,
            sentiment_label: None,
            status: PostStatus::New,
            rejection_reason: None,
            fingerprint_lip: format!("{owner}_{post_id}"),
            fingerprint_text_full: "hash-full".to_string(),
            fingerprint_text_core: "hash-core".to_string(),
            fingerprint_media: vec![],
            fingerprint_version: 1,
            created_at: String::new(),
        }
    }

    #[tokio::test]
    async fn test_scan_state_roundtrip() {
        let db = test_db().await;
        assert_eq!(db.get_scan_state("cursor").await.unwrap(), None);
        db.set_scan_state("cursor", "abc123").await.unwrap();
        assert_eq!(db.get_scan_state("cursor").await.unwrap(), Some("abc123".to_string()));
    }

    #[tokio::test]
    async fn test_region_and_community_roundtrip() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();
        let community_id = db
            .create_community(region_id, -100, Some("group"), "Group", Category::News)
            .await
            .unwrap();
        let community = db.get_community(community_id).await.unwrap().unwrap();
        assert_eq!(community.region_id, region_id);
        assert_eq!(community.category, Category::News);
    }

    #[tokio::test]
    async fn test_post_lip_uniqueness_surfaces_as_store_error() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();
        let community_id = db
            .create_community(region_id, -100, None, "Group", Category::News)
            .await
            .unwrap();
        let post = sample_post(region_id, community_id, -100, 1);
        db.insert_post(&post).await.unwrap();
        let duplicate = db.insert_post(&post).await;
        assert!(duplicate.is_err());
    }

    #[tokio::test]
    async fn test_find_post_by_lip() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();
        let community_id = db
            .create_community(region_id, -100, None, "Group", Category::News)
            .await
            .unwrap();
        let post = sample_post(region_id, community_id, -100, 1);
        db.insert_post(&post).await.unwrap();
        let found = db.find_post_by_lip("-100_1").await.unwrap();
        assert!(found.is_some());
        assert!(db.find_post_by_lip("-100_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_credential_eligibility() {
        let db = test_db().await;
        db.create_credential("main", "secret-token-value-long-enough").await.unwrap();
        assert!(db.list_eligible_credentials().await.unwrap().is_empty());
        db.mark_credential_status("main", CredentialStatus::Valid, None).await.unwrap();
        let eligible = db.list_eligible_credentials().await.unwrap();
        assert_eq!(eligible.len(), 1);
        assert!(eligible[0].is_eligible_for_scan());
    }

    #[tokio::test]
    async fn test_neighbor_relationship_is_symmetric() {
        let db = test_db().await;
        let a = db.create_region("spb", "SPb", "outlet-a").await.unwrap();
        let b = db.create_region("lo", "Leningrad Oblast", "outlet-b").await.unwrap();
        db.add_neighbor_relationship(a, b).await.unwrap();
        let region_a = db.get_region(a).await.unwrap().unwrap();
        let region_b = db.get_region(b).await.unwrap().unwrap();
        assert!(region_a.neighbors.contains(&"lo".to_string()));
        assert!(region_b.neighbors.contains(&"spb".to_string()));
    }
}
