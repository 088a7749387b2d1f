// PgDatabase — PostgreSQL backend implementing the Database trait.
//
// Uses sqlx PgPool for native async queries. All queries use runtime
// parameter binding (not compile-time macros) to avoid requiring
// DATABASE_URL at compile time.
//
// Key differences from SQLite:
// - TIMESTAMPTZ instead of TEXT for timestamps
// - JSONB instead of TEXT for structured data
// - $1/$2 parameter syntax (handled by sqlx)
// - GENERATED ALWAYS AS IDENTITY for auto-increment

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx_core::pool::Pool;
use sqlx_core::row::Row;
use sqlx_postgres::Postgres;

use super::models::{
    CarouselTask, Category, Community, Credential, CredentialStatus, Digest, EngagementSample,
    Post, PostStatus, Region, RegionConfig,
};
use super::traits::Database;

/// Type alias for the PostgreSQL connection pool.
pub type PgPool = Pool<Postgres>;

const SCHEMA_SQL: &str = "
    CREATE TABLE IF NOT EXISTS regions (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        primary_outlet_id TEXT NOT NULL,
        telegram_channel TEXT,
        neighbors JSONB NOT NULL DEFAULT '[]',
        local_hashtags JSONB NOT NULL DEFAULT '[]',
        config JSONB NOT NULL DEFAULT '{}',
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS communities (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        region_id BIGINT NOT NULL REFERENCES regions(id),
        external_id BIGINT NOT NULL,
        screen_name TEXT,
        name TEXT NOT NULL,
        category TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_checked TIMESTAMPTZ,
        post_count INTEGER NOT NULL DEFAULT 0,
        error_count INTEGER NOT NULL DEFAULT 0,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        UNIQUE(external_id, region_id)
    );

    CREATE TABLE IF NOT EXISTS credentials (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        secret TEXT NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        last_used TIMESTAMPTZ,
        last_validated TIMESTAMPTZ,
        status TEXT NOT NULL DEFAULT 'unknown',
        error_message TEXT,
        permissions JSONB NOT NULL DEFAULT '[]',
        user_info JSONB,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS posts (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        community_id BIGINT NOT NULL REFERENCES communities(id),
        region_id BIGINT NOT NULL REFERENCES regions(id),
        external_owner_id BIGINT NOT NULL,
        external_post_id BIGINT NOT NULL,
        published_at BIGINT NOT NULL,
        text TEXT NOT NULL DEFAULT '',
        attachments JSONB NOT NULL DEFAULT '[]',
        views BIGINT NOT NULL DEFAULT 0,
        likes BIGINT NOT NULL DEFAULT 0,
        reposts BIGINT NOT NULL DEFAULT 0,
        comments BIGINT NOT NULL DEFAULT 0,
        ai_category TEXT,
        ai_score DOUBLE PRECISION NOT NULL DEFAULT 50.0,
        sentiment_label TEXT,
        status TEXT NOT NULL DEFAULT 'new',
        rejection_reason TEXT,
        fingerprint_lip TEXT NOT NULL UNIQUE,
        fingerprint_text_full TEXT NOT NULL,
        fingerprint_text_core TEXT NOT NULL,
        fingerprint_media JSONB NOT NULL DEFAULT '[]',
        fingerprint_version INTEGER NOT NULL DEFAULT 1,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE INDEX IF NOT EXISTS idx_posts_text_full ON posts(fingerprint_text_full);
    CREATE INDEX IF NOT EXISTS idx_posts_text_core ON posts(fingerprint_text_core);
    CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status);
    CREATE INDEX IF NOT EXISTS idx_posts_region_status ON posts(region_id, status);
    CREATE INDEX IF NOT EXISTS idx_posts_published_at ON posts(published_at);

    CREATE TABLE IF NOT EXISTS engagement_samples (
        region_id BIGINT NOT NULL REFERENCES regions(id),
        hour INTEGER NOT NULL,
        weekday INTEGER NOT NULL,
        sample_count INTEGER NOT NULL DEFAULT 0,
        avg_engagement DOUBLE PRECISION NOT NULL DEFAULT 0.0,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        PRIMARY KEY (region_id, hour, weekday)
    );

    CREATE TABLE IF NOT EXISTS carousel_tasks (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        region_code TEXT NOT NULL,
        credential_name TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'queued',
        queued_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        started_at TIMESTAMPTZ,
        completed_at TIMESTAMPTZ,
        posts_retrieved INTEGER NOT NULL DEFAULT 0,
        error TEXT
    );

    CREATE INDEX IF NOT EXISTS idx_tasks_region ON carousel_tasks(region_code);

    CREATE TABLE IF NOT EXISTS digests (
        id BIGINT GENERATED ALWAYS AS IDENTITY PRIMARY KEY,
        region_id BIGINT NOT NULL REFERENCES regions(id),
        category TEXT NOT NULL,
        post_ids JSONB NOT NULL DEFAULT '[]',
        scheduled_at TIMESTAMPTZ NOT NULL,
        template_snapshot JSONB NOT NULL DEFAULT '{}',
        cancelled BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS scan_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    );

    CREATE TABLE IF NOT EXISTS blacklist_ids (
        external_id BIGINT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS blacklist_words (
        word TEXT PRIMARY KEY
    );

    CREATE TABLE IF NOT EXISTS region_keywords (
        region_id BIGINT NOT NULL REFERENCES regions(id),
        keyword TEXT NOT NULL,
        PRIMARY KEY (region_id, keyword)
    );
";

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    /// Connect to PostgreSQL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .with_context(|| format!("Failed to connect to PostgreSQL at {database_url}"))?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run the schema migration.
    ///
    /// Acquires a Postgres session-level advisory lock (key "WALLWTCH") so
    /// that concurrent processes (e.g. two app instances starting together)
    /// don't race to apply the same migration.
    ///
    /// Session-level advisory locks are bound to the backend session that
    /// acquired them, so the lock and unlock MUST run on the same physical
    /// connection. We acquire a dedicated connection (`lock_conn`) for this
    /// purpose and keep it alive for the duration of the migration. The
    /// unlock always runs even if the migration fails — we capture the
    /// migration result first, then unlock, then surface any error.
    async fn run_migrations(&self) -> Result<()> {
        // 0x57414C4C57544348 = ASCII "WALLWTCH" as a big-endian i64.
        const MIGRATION_LOCK_KEY: i64 = 0x57414C4C57544348_u64 as i64;

        let mut lock_conn = self
            .pool
            .acquire()
            .await
            .context("Failed to acquire connection for migration advisory lock")?;

        sqlx_core::query::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to acquire migration advisory lock")?;

        let migration_result: Result<()> = async {
            sqlx_core::query::query(
                "CREATE TABLE IF NOT EXISTS schema_version (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )",
            )
            .execute(&self.pool)
            .await?;

            let applied: bool =
                sqlx_core::query::query("SELECT COUNT(*) > 0 FROM schema_version WHERE version = $1")
                    .bind(1_i32)
                    .fetch_one(&self.pool)
                    .await
                    .map(|row| row.get::<bool, _>(0))
                    .unwrap_or(false);

            if !applied {
                // All DDL uses IF NOT EXISTS, so it is safe to retry if the
                // process is interrupted partway through.
                sqlx_core::raw_sql::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
                sqlx_core::query::query("INSERT INTO schema_version (version) VALUES (1)")
                    .execute(&self.pool)
                    .await?;
            }

            Ok(())
        }
        .await;

        let unlock_result = sqlx_core::query::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut *lock_conn)
            .await
            .context("Failed to release migration advisory lock");

        migration_result?;
        unlock_result?;

        Ok(())
    }

    fn row_to_region(row: &sqlx_core::postgres::PgRow) -> Result<Region> {
        let neighbors_json: serde_json::Value = row.try_get("neighbors")?;
        let hashtags_json: serde_json::Value = row.try_get("local_hashtags")?;
        let config_json: serde_json::Value = row.try_get("config")?;
        Ok(Region {
            id: row.try_get("id")?,
            code: row.try_get("code")?,
            name: row.try_get("name")?,
            primary_outlet_id: row.try_get("primary_outlet_id")?,
            telegram_channel: row.try_get("telegram_channel")?,
            neighbors: serde_json::from_value(neighbors_json).unwrap_or_default(),
            local_hashtags: serde_json::from_value(hashtags_json).unwrap_or_default(),
            config: serde_json::from_value(config_json).unwrap_or_else(|_| RegionConfig::default()),
            is_active: row.try_get("is_active")?,
            created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?.to_rfc3339(),
            updated_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")?.to_rfc3339(),
        })
    }

    fn row_to_community(row: &sqlx_core::postgres::PgRow) -> Result<Community> {
        let category_str: String = row.try_get("category")?;
        Ok(Community {
            id: row.try_get("id")?,
            region_id: row.try_get("region_id")?,
            external_id: row.try_get("external_id")?,
            screen_name: row.try_get("screen_name")?,
            name: row.try_get("name")?,
            category: Category::parse(&category_str).unwrap_or(Category::News),
            is_active: row.try_get("is_active")?,
            last_checked: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_checked")?
                .map(|t| t.to_rfc3339()),
            post_count: row.try_get::<i32, _>("post_count")? as u32,
            error_count: row.try_get::<i32, _>("error_count")? as u32,
            created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?.to_rfc3339(),
            updated_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")?.to_rfc3339(),
        })
    }

    fn row_to_credential(row: &sqlx_core::postgres::PgRow) -> Result<Credential> {
        let status_str: String = row.try_get("status")?;
        let permissions_json: serde_json::Value = row.try_get("permissions")?;
        Ok(Credential {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            secret: row.try_get("secret")?,
            is_active: row.try_get("is_active")?,
            last_used: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_used")?
                .map(|t| t.to_rfc3339()),
            last_validated: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("last_validated")?
                .map(|t| t.to_rfc3339()),
            status: CredentialStatus::parse(&status_str),
            error_message: row.try_get("error_message")?,
            permissions: serde_json::from_value(permissions_json).unwrap_or_default(),
            user_info: row.try_get("user_info")?,
            created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?.to_rfc3339(),
            updated_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")?.to_rfc3339(),
        })
    }

    fn row_to_post(row: &sqlx_core::postgres::PgRow) -> Result<Post> {
        let attachments_json: serde_json::Value = row.try_get("attachments")?;
        let media_json: serde_json::Value = row.try_get("fingerprint_media")?;
        let status_str: String = row.try_get("status")?;
        Ok(Post {
            id: row.try_get("id")?,
            community_id: row.try_get("community_id")?,
            region_id: row.try_get("region_id")?,
            external_owner_id: row.try_get("external_owner_id")?,
            external_post_id: row.try_get("external_post_id")?,
            published_at: row.try_get("published_at")?,
            text: row.try_get("text")?,
            attachments: serde_json::from_value(attachments_json).unwrap_or_default(),
            views: row.try_get::<i64, _>("views")? as u64,
            likes: row.try_get::<i64, _>("likes")? as u64,
            reposts: row.try_get::<i64, _>("reposts")? as u64,
            comments: row.try_get::<i64, _>("comments")? as u64,
            ai_category: row.try_get("ai_category")?,
            ai_score: row.try_get("ai_score")?,
            sentiment_label: row.try_get("sentiment_label")?,
            status: PostStatus::parse(&status_str),
            rejection_reason: row.try_get("rejection_reason")?,
            fingerprint_lip: row.try_get("fingerprint_lip")?,
            fingerprint_text_full: row.try_get("fingerprint_text_full")?,
            fingerprint_text_core: row.try_get("fingerprint_text_core")?,
            fingerprint_media: serde_json::from_value(media_json).unwrap_or_default(),
            fingerprint_version: row.try_get::<i32, _>("fingerprint_version")? as u32,
            created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?.to_rfc3339(),
        })
    }

    fn row_to_task(row: &sqlx_core::postgres::PgRow) -> Result<CarouselTask> {
        use super::models::TaskStatus;
        let status_str: String = row.try_get("status")?;
        Ok(CarouselTask {
            id: row.try_get("id")?,
            region_code: row.try_get("region_code")?,
            credential_name: row.try_get("credential_name")?,
            status: TaskStatus::parse(&status_str),
            queued_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("queued_at")?.to_rfc3339(),
            started_at: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("started_at")?
                .map(|t| t.to_rfc3339()),
            completed_at: row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>("completed_at")?
                .map(|t| t.to_rfc3339()),
            posts_retrieved: row.try_get::<i32, _>("posts_retrieved")? as u32,
            error: row.try_get("error")?,
        })
    }

    fn row_to_digest(row: &sqlx_core::postgres::PgRow) -> Result<Digest> {
        let post_ids_json: serde_json::Value = row.try_get("post_ids")?;
        Ok(Digest {
            id: row.try_get("id")?,
            region_id: row.try_get("region_id")?,
            category: row.try_get("category")?,
            post_ids: serde_json::from_value(post_ids_json).unwrap_or_default(),
            scheduled_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("scheduled_at")?.to_rfc3339(),
            template_snapshot: row.try_get("template_snapshot")?,
            cancelled: row.try_get("cancelled")?,
            created_at: row.try_get::<chrono::DateTime<chrono::Utc>, _>("created_at")?.to_rfc3339(),
        })
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn table_count(&self) -> Result<i64> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*) FROM information_schema.tables
             WHERE table_schema = 'public' AND table_type = 'BASE TABLE'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn get_scan_state(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx_core::query::query("SELECT value FROM scan_state WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_scan_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO scan_state (key, value, updated_at)
             VALUES ($1, $2, NOW())
             ON CONFLICT(key) DO UPDATE SET value = $2, updated_at = NOW()",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_all_scan_state(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx_core::query::query("SELECT key, value FROM scan_state")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect())
    }

    async fn create_region(&self, code: &str, name: &str, primary_outlet_id: &str) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO regions (code, name, primary_outlet_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(code)
        .bind(name)
        .bind(primary_outlet_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn get_region_by_code(&self, code: &str) -> Result<Option<Region>> {
        let row = sqlx_core::query::query("SELECT * FROM regions WHERE code = $1")
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_region).transpose()
    }

    async fn get_region(&self, id: i64) -> Result<Option<Region>> {
        let row = sqlx_core::query::query("SELECT * FROM regions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_region).transpose()
    }

    async fn list_active_regions(&self) -> Result<Vec<Region>> {
        let rows = sqlx_core::query::query("SELECT * FROM regions WHERE is_active = TRUE ORDER BY code")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_region).collect()
    }

    async fn update_region_config(&self, region_id: i64, config: &RegionConfig) -> Result<()> {
        let config_json = serde_json::to_value(config)?;
        sqlx_core::query::query(
            "UPDATE regions SET config = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(config_json)
        .bind(region_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn add_neighbor_relationship(&self, region_a: i64, region_b: i64) -> Result<()> {
        let a = self
            .get_region(region_a)
            .await?
            .context("add_neighbor_relationship: region_a not found")?;
        let b = self
            .get_region(region_b)
            .await?
            .context("add_neighbor_relationship: region_b not found")?;

        let mut a_neighbors = a.neighbors.clone();
        if !a_neighbors.contains(&b.code) {
            a_neighbors.push(b.code.clone());
        }
        let mut b_neighbors = b.neighbors.clone();
        if !b_neighbors.contains(&a.code) {
            b_neighbors.push(a.code.clone());
        }

        sqlx_core::query::query("UPDATE regions SET neighbors = $1, updated_at = NOW() WHERE id = $2")
            .bind(serde_json::to_value(&a_neighbors)?)
            .bind(region_a)
            .execute(&self.pool)
            .await?;
        sqlx_core::query::query("UPDATE regions SET neighbors = $1, updated_at = NOW() WHERE id = $2")
            .bind(serde_json::to_value(&b_neighbors)?)
            .bind(region_b)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_region(&self, region_id: i64) -> Result<()> {
        sqlx_core::query::query("UPDATE regions SET is_active = FALSE, updated_at = NOW() WHERE id = $1")
            .bind(region_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_community(
        &self,
        region_id: i64,
        external_id: i64,
        screen_name: Option<&str>,
        name: &str,
        category: Category,
    ) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO communities (region_id, external_id, screen_name, name, category)
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(region_id)
        .bind(external_id)
        .bind(screen_name)
        .bind(name)
        .bind(category.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn get_community(&self, id: i64) -> Result<Option<Community>> {
        let row = sqlx_core::query::query("SELECT * FROM communities WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_community).transpose()
    }

    async fn list_active_communities_for_region(&self, region_id: i64) -> Result<Vec<Community>> {
        let rows = sqlx_core::query::query(
            "SELECT * FROM communities WHERE region_id = $1 AND is_active = TRUE ORDER BY id",
        )
        .bind(region_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_community).collect()
    }

    async fn mark_community_checked(&self, community_id: i64, posts_found: u32) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE communities SET last_checked = NOW(), post_count = post_count + $1, updated_at = NOW()
             WHERE id = $2",
        )
        .bind(posts_found as i32)
        .bind(community_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_community_error(&self, community_id: i64) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE communities SET error_count = error_count + 1, updated_at = NOW() WHERE id = $1",
        )
        .bind(community_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn deactivate_community(&self, community_id: i64) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE communities SET is_active = FALSE, updated_at = NOW() WHERE id = $1",
        )
        .bind(community_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_credential(&self, name: &str, secret: &str) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO credentials (name, secret) VALUES ($1, $2)
             ON CONFLICT(name) DO UPDATE SET secret = $2, updated_at = NOW()
             RETURNING id",
        )
        .bind(name)
        .bind(secret)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn get_credential_by_name(&self, name: &str) -> Result<Option<Credential>> {
        let row = sqlx_core::query::query("SELECT * FROM credentials WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_credential).transpose()
    }

    async fn list_all_credentials(&self) -> Result<Vec<Credential>> {
        let rows = sqlx_core::query::query("SELECT * FROM credentials ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_credential).collect()
    }

    async fn list_eligible_credentials(&self) -> Result<Vec<Credential>> {
        let rows = sqlx_core::query::query(
            "SELECT * FROM credentials WHERE is_active = TRUE AND status = 'valid'
             ORDER BY last_used IS NOT NULL, last_used ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_credential).collect()
    }

    async fn mark_credential_status(
        &self,
        name: &str,
        status: CredentialStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE credentials SET status = $1, error_message = $2, last_validated = NOW(), updated_at = NOW()
             WHERE name = $3",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn touch_credential_last_used(&self, name: &str) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE credentials SET last_used = NOW(), updated_at = NOW() WHERE name = $1",
        )
        .bind(name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_post(&self, post: &Post) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO posts
                (community_id, region_id, external_owner_id, external_post_id, published_at, text,
                 attachments, views, likes, reposts, comments, ai_category, ai_score, sentiment_label,
                 status, rejection_reason, fingerprint_lip, fingerprint_text_full, fingerprint_text_core,
                 fingerprint_media, fingerprint_version)
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21)
             RETURNING id",
        )
        .bind(post.community_id)
        .bind(post.region_id)
        .bind(post.external_owner_id)
        .bind(post.external_post_id)
        .bind(post.published_at)
        .bind(&post.text)
        .bind(serde_json::to_value(&post.attachments)?)
        .bind(post.views as i64)
        .bind(post.likes as i64)
        .bind(post.reposts as i64)
        .bind(post.comments as i64)
        .bind(&post.ai_category)
        .bind(post.ai_score)
        .bind(&post.sentiment_label)
        .bind(post.status.as_str())
        .bind(&post.rejection_reason)
        .bind(&post.fingerprint_lip)
        .bind(&post.fingerprint_text_full)
        .bind(&post.fingerprint_text_core)
        .bind(serde_json::to_value(&post.fingerprint_media)?)
        .bind(post.fingerprint_version as i32)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn find_post_by_lip(&self, lip: &str) -> Result<Option<Post>> {
        let row = sqlx_core::query::query("SELECT * FROM posts WHERE fingerprint_lip = $1")
            .bind(lip)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_post).transpose()
    }

    async fn find_post_by_text_full(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>> {
        let row = sqlx_core::query::query(
            "SELECT * FROM posts WHERE fingerprint_text_full = $1 AND fingerprint_lip != $2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(fingerprint)
        .bind(exclude_lip)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_post).transpose()
    }

    async fn find_post_by_text_core(&self, fingerprint: &str, exclude_lip: &str) -> Result<Option<Post>> {
        let row = sqlx_core::query::query(
            "SELECT * FROM posts WHERE fingerprint_text_core = $1 AND fingerprint_lip != $2
             ORDER BY id DESC LIMIT 1",
        )
        .bind(fingerprint)
        .bind(exclude_lip)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::row_to_post).transpose()
    }

    async fn find_post_by_media_overlap(
        &self,
        media_ids: &[String],
        exclude_lip: &str,
        recent_limit: u32,
    ) -> Result<Option<Post>> {
        if media_ids.is_empty() {
            return Ok(None);
        }
        let rows = sqlx_core::query::query(
            "SELECT * FROM posts WHERE fingerprint_media != '[]' AND fingerprint_lip != $1
             ORDER BY id DESC LIMIT $2",
        )
        .bind(exclude_lip)
        .bind(recent_limit as i64)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let post = Self::row_to_post(row)?;
            if post.fingerprint_media.iter().any(|m| media_ids.contains(m)) {
                return Ok(Some(post));
            }
        }
        Ok(None)
    }

    async fn update_post_status(&self, post_id: i64, status: PostStatus, reason: Option<&str>) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE posts SET status = $1, rejection_reason = $2 WHERE id = $3",
        )
        .bind(status.as_str())
        .bind(reason)
        .bind(post_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_post_score(&self, post_id: i64, ai_score: f64) -> Result<()> {
        sqlx_core::query::query("UPDATE posts SET ai_score = $1 WHERE id = $2")
            .bind(ai_score)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_post_sentiment(&self, post_id: i64, label: &str) -> Result<()> {
        sqlx_core::query::query("UPDATE posts SET sentiment_label = $1 WHERE id = $2")
            .bind(label)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_post_category(&self, post_id: i64, category: &str) -> Result<()> {
        sqlx_core::query::query("UPDATE posts SET ai_category = $1 WHERE id = $2")
            .bind(category)
            .bind(post_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert_post_stats(
        &self,
        lip: &str,
        views: u64,
        likes: u64,
        reposts: u64,
        comments: u64,
    ) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE posts SET views = $1, likes = $2, reposts = $3, comments = $4 WHERE fingerprint_lip = $5",
        )
        .bind(views as i64)
        .bind(likes as i64)
        .bind(reposts as i64)
        .bind(comments as i64)
        .bind(lip)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_candidate_posts_for_region(&self, region_id: i64, limit: u32) -> Result<Vec<Post>> {
        let rows = sqlx_core::query::query(
            "SELECT * FROM posts WHERE region_id = $1 AND status = 'accepted' ORDER BY published_at DESC LIMIT $2",
        )
        .bind(region_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_post).collect()
    }

    async fn list_accepted_posts_for_region_since(&self, region_id: i64, since_unix: i64) -> Result<Vec<Post>> {
        let rows = sqlx_core::query::query(
            "SELECT * FROM posts WHERE region_id = $1 AND status = 'accepted' AND published_at >= $2
             ORDER BY published_at DESC",
        )
        .bind(region_id)
        .bind(since_unix)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_post).collect()
    }

    async fn count_accepted_posts_for_region(&self, region_id: i64) -> Result<u32> {
        let row = sqlx_core::query::query(
            "SELECT COUNT(*) FROM posts WHERE region_id = $1 AND status = 'accepted'",
        )
        .bind(region_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0) as u32)
    }

    async fn posts_needing_refingerprint(&self, version: u32) -> Result<Vec<Post>> {
        let rows = sqlx_core::query::query("SELECT * FROM posts WHERE fingerprint_version < $1")
            .bind(version as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::row_to_post).collect()
    }

    async fn is_id_blacklisted(&self, external_id: i64) -> Result<bool> {
        let row = sqlx_core::query::query("SELECT COUNT(*) > 0 FROM blacklist_ids WHERE external_id = $1")
            .bind(external_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<bool, _>(0))
    }

    async fn add_blacklisted_id(&self, external_id: i64) -> Result<()> {
        sqlx_core::query::query("INSERT INTO blacklist_ids (external_id) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(external_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_blacklisted_words(&self) -> Result<Vec<String>> {
        let rows = sqlx_core::query::query("SELECT word FROM blacklist_words")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    async fn add_blacklisted_word(&self, word: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO blacklist_words (word) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(word.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_region_keywords(&self, region_id: i64) -> Result<Vec<String>> {
        let rows = sqlx_core::query::query("SELECT keyword FROM region_keywords WHERE region_id = $1")
            .bind(region_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|r| r.get::<String, _>(0)).collect())
    }

    async fn add_region_keyword(&self, region_id: i64, keyword: &str) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO region_keywords (region_id, keyword) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(region_id)
        .bind(keyword.to_lowercase())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_engagement_sample(
        &self,
        region_id: i64,
        hour: u8,
        weekday: u8,
        sample_count: u32,
        avg_engagement: f64,
    ) -> Result<()> {
        sqlx_core::query::query(
            "INSERT INTO engagement_samples (region_id, hour, weekday, sample_count, avg_engagement, updated_at)
             VALUES ($1, $2, $3, $4, $5, NOW())
             ON CONFLICT(region_id, hour, weekday) DO UPDATE SET
                sample_count = $4, avg_engagement = $5, updated_at = NOW()",
        )
        .bind(region_id)
        .bind(hour as i32)
        .bind(weekday as i32)
        .bind(sample_count as i32)
        .bind(avg_engagement)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_engagement_matrix(&self, region_id: i64) -> Result<Vec<EngagementSample>> {
        let rows = sqlx_core::query::query(
            "SELECT * FROM engagement_samples WHERE region_id = $1 ORDER BY weekday, hour",
        )
        .bind(region_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(EngagementSample {
                    region_id: row.try_get("region_id")?,
                    hour: row.try_get::<i32, _>("hour")? as u8,
                    weekday: row.try_get::<i32, _>("weekday")? as u8,
                    sample_count: row.try_get::<i32, _>("sample_count")? as u32,
                    avg_engagement: row.try_get("avg_engagement")?,
                    updated_at: row
                        .try_get::<chrono::DateTime<chrono::Utc>, _>("updated_at")?
                        .to_rfc3339(),
                })
            })
            .collect()
    }

    async fn create_carousel_task(&self, region_code: &str, credential_name: &str) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO carousel_tasks (region_code, credential_name) VALUES ($1, $2) RETURNING id",
        )
        .bind(region_code)
        .bind(credential_name)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn mark_task_running(&self, task_id: i64) -> Result<()> {
        sqlx_core::query::query("UPDATE carousel_tasks SET status = 'running', started_at = NOW() WHERE id = $1")
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_task_completed(&self, task_id: i64, posts_retrieved: u32) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE carousel_tasks SET status = 'completed', completed_at = NOW(), posts_retrieved = $1
             WHERE id = $2",
        )
        .bind(posts_retrieved as i32)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_task_failed(&self, task_id: i64, error: &str) -> Result<()> {
        sqlx_core::query::query(
            "UPDATE carousel_tasks SET status = 'failed', completed_at = NOW(), error = $1 WHERE id = $2",
        )
        .bind(error)
        .bind(task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, task_id: i64) -> Result<Option<CarouselTask>> {
        let row = sqlx_core::query::query("SELECT * FROM carousel_tasks WHERE id = $1")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn median_posts_per_scan_last_24h(&self) -> Result<Option<f64>> {
        let rows = sqlx_core::query::query(
            "SELECT posts_retrieved FROM carousel_tasks
             WHERE status = 'completed' AND completed_at >= NOW() - INTERVAL '24 hours'
             ORDER BY posts_retrieved",
        )
        .fetch_all(&self.pool)
        .await?;

        if rows.is_empty() {
            return Ok(None);
        }
        let values: Vec<i64> = rows.iter().map(|r| r.get::<i32, _>(0) as i64).collect();
        let mid = values.len() / 2;
        let median = if values.len() % 2 == 0 {
            (values[mid - 1] + values[mid]) as f64 / 2.0
        } else {
            values[mid] as f64
        };
        Ok(Some(median))
    }

    async fn insert_digest(
        &self,
        region_id: i64,
        category: &str,
        post_ids: &[i64],
        scheduled_at: &str,
        template_snapshot: &serde_json::Value,
    ) -> Result<i64> {
        let row = sqlx_core::query::query(
            "INSERT INTO digests (region_id, category, post_ids, scheduled_at, template_snapshot)
             VALUES ($1, $2, $3, $4::timestamptz, $5) RETURNING id",
        )
        .bind(region_id)
        .bind(category)
        .bind(serde_json::to_value(post_ids)?)
        .bind(scheduled_at)
        .bind(template_snapshot)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get::<i64, _>(0))
    }

    async fn get_digest(&self, id: i64) -> Result<Option<Digest>> {
        let row = sqlx_core::query::query("SELECT * FROM digests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_digest).transpose()
    }

    async fn cancel_digest(&self, id: i64) -> Result<()> {
        sqlx_core::query::query("UPDATE digests SET cancelled = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
