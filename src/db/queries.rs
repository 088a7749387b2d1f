// Database queries — CRUD operations for all tables.
//
// Every database interaction goes through this module. This keeps SQL
// contained in one place and gives the rest of the app clean Rust interfaces.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use super::models::{
    CarouselTask, Category, Community, Credential, CredentialStatus, Digest, EngagementSample,
    Post, PostStatus, Region, RegionConfig, TaskStatus,
};

fn json_vec(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

// --- Scan state ---

pub fn get_scan_state(conn: &Connection, key: &str) -> Result<Option<String>> {
    let mut stmt = conn.prepare("SELECT value FROM scan_state WHERE key = ?1")?;
    let result = stmt.query_row(params![key], |row| row.get(0)).optional()?;
    Ok(result)
}

pub fn set_scan_state(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO scan_state (key, value, updated_at)
         VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
        params![key, value],
    )?;
    Ok(())
}

pub fn get_all_scan_state(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM scan_state")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Regions ---

fn row_to_region(row: &rusqlite::Row) -> rusqlite::Result<Region> {
    let neighbors_json: String = row.get("neighbors")?;
    let hashtags_json: String = row.get("local_hashtags")?;
    let config_json: String = row.get("config")?;
    Ok(Region {
        id: row.get("id")?,
        code: row.get("code")?,
        name: row.get("name")?,
        primary_outlet_id: row.get("primary_outlet_id")?,
        telegram_channel: row.get("telegram_channel")?,
        neighbors: json_vec(&neighbors_json),
        local_hashtags: json_vec(&hashtags_json),
        config: serde_json::from_str(&config_json).unwrap_or_default(),
        is_active: row.get::<_, i64>("is_active")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create_region(
    conn: &Connection,
    code: &str,
    name: &str,
    primary_outlet_id: &str,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO regions (code, name, primary_outlet_id) VALUES (?1, ?2, ?3)",
        params![code, name, primary_outlet_id],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_region_by_code(conn: &Connection, code: &str) -> Result<Option<Region>> {
    let mut stmt = conn.prepare("SELECT * FROM regions WHERE code = ?1")?;
    let result = stmt.query_row(params![code], row_to_region).optional()?;
    Ok(result)
}

pub fn get_region(conn: &Connection, id: i64) -> Result<Option<Region>> {
    let mut stmt = conn.prepare("SELECT * FROM regions WHERE id = ?1")?;
    let result = stmt.query_row(params![id], row_to_region).optional()?;
    Ok(result)
}

pub fn list_active_regions(conn: &Connection) -> Result<Vec<Region>> {
    let mut stmt = conn.prepare("SELECT * FROM regions WHERE is_active = 1 ORDER BY code")?;
    let rows = stmt
        .query_map([], row_to_region)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn update_region_config(conn: &Connection, region_id: i64, config: &RegionConfig) -> Result<()> {
    let json = serde_json::to_string(config)?;
    conn.execute(
        "UPDATE regions SET config = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![json, region_id],
    )?;
    Ok(())
}

/// Add a symmetric neighbor relationship: adding code X->Y also adds Y->X,
/// implemented as two transactional writes rather than a shared graph node.
pub fn add_neighbor_relationship(conn: &Connection, region_a: i64, region_b: i64) -> Result<()> {
    let a = get_region(conn, region_a)?;
    let b = get_region(conn, region_b)?;
    let (Some(a), Some(b)) = (a, b) else {
        anyhow::bail!("both regions must exist to add a neighbor relationship");
    };

    let mut a_neighbors = a.neighbors;
    if !a_neighbors.contains(&b.code) {
        a_neighbors.push(b.code.clone());
    }
    let mut b_neighbors = b.neighbors;
    if !b_neighbors.contains(&a.code) {
        b_neighbors.push(a.code.clone());
    }

    conn.execute(
        "UPDATE regions SET neighbors = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![serde_json::to_string(&a_neighbors)?, region_a],
    )?;
    conn.execute(
        "UPDATE regions SET neighbors = ?1, updated_at = datetime('now') WHERE id = ?2",
        params![serde_json::to_string(&b_neighbors)?, region_b],
    )?;
    Ok(())
}

pub fn deactivate_region(conn: &Connection, region_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE regions SET is_active = 0, updated_at = datetime('now') WHERE id = ?1",
        params![region_id],
    )?;
    Ok(())
}

// --- Communities ---

fn row_to_community(row: &rusqlite::Row) -> rusqlite::Result<Community> {
    let category_str: String = row.get("category")?;
    Ok(Community {
        id: row.get("id")?,
        region_id: row.get("region_id")?,
        external_id: row.get("external_id")?,
        screen_name: row.get("screen_name")?,
        name: row.get("name")?,
        category: Category::parse(&category_str).unwrap_or(Category::News),
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_checked: row.get("last_checked")?,
        post_count: row.get("post_count")?,
        error_count: row.get("error_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

#[allow(clippy::too_many_arguments)]
pub fn create_community(
    conn: &Connection,
    region_id: i64,
    external_id: i64,
    screen_name: Option<&str>,
    name: &str,
    category: Category,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO communities (region_id, external_id, screen_name, name, category)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![region_id, external_id, screen_name, name, category.as_str()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_community(conn: &Connection, id: i64) -> Result<Option<Community>> {
    let mut stmt = conn.prepare("SELECT * FROM communities WHERE id = ?1")?;
    let result = stmt.query_row(params![id], row_to_community).optional()?;
    Ok(result)
}

pub fn list_active_communities_for_region(conn: &Connection, region_id: i64) -> Result<Vec<Community>> {
    let mut stmt =
        conn.prepare("SELECT * FROM communities WHERE region_id = ?1 AND is_active = 1 ORDER BY id")?;
    let rows = stmt
        .query_map(params![region_id], row_to_community)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn mark_community_checked(conn: &Connection, community_id: i64, posts_found: u32) -> Result<()> {
    conn.execute(
        "UPDATE communities
         SET last_checked = datetime('now'), post_count = post_count + ?2, updated_at = datetime('now')
         WHERE id = ?1",
        params![community_id, posts_found],
    )?;
    Ok(())
}

pub fn record_community_error(conn: &Connection, community_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE communities SET error_count = error_count + 1, updated_at = datetime('now') WHERE id = ?1",
        params![community_id],
    )?;
    Ok(())
}

pub fn deactivate_community(conn: &Connection, community_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE communities SET is_active = 0, updated_at = datetime('now') WHERE id = ?1",
        params![community_id],
    )?;
    Ok(())
}

// --- Credentials ---

fn row_to_credential(row: &rusqlite::Row) -> rusqlite::Result<Credential> {
    let status_str: String = row.get("status")?;
    let permissions_json: String = row.get("permissions")?;
    let user_info_str: Option<String> = row.get("user_info")?;
    Ok(Credential {
        id: row.get("id")?,
        name: row.get("name")?,
        secret: row.get("secret")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        last_used: row.get("last_used")?,
        last_validated: row.get("last_validated")?,
        status: CredentialStatus::parse(&status_str),
        error_message: row.get("error_message")?,
        permissions: json_vec(&permissions_json),
        user_info: user_info_str.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn create_credential(conn: &Connection, name: &str, secret: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO credentials (name, secret) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET secret = ?2, updated_at = datetime('now')",
        params![name, secret],
    )?;
    let id: i64 = conn.query_row(
        "SELECT id FROM credentials WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(id)
}

pub fn get_credential_by_name(conn: &Connection, name: &str) -> Result<Option<Credential>> {
    let mut stmt = conn.prepare("SELECT * FROM credentials WHERE name = ?1")?;
    let result = stmt.query_row(params![name], row_to_credential).optional()?;
    Ok(result)
}

pub fn list_all_credentials(conn: &Connection) -> Result<Vec<Credential>> {
    let mut stmt = conn.prepare("SELECT * FROM credentials ORDER BY name")?;
    let rows = stmt
        .query_map([], row_to_credential)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Valid, active credentials not currently claimed by a running task,
/// ordered by `last_used` ascending (oldest first), so the scheduler
/// rotates through credentials evenly.
pub fn list_eligible_credentials(conn: &Connection) -> Result<Vec<Credential>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM credentials
         WHERE is_active = 1 AND status = 'valid'
         ORDER BY last_used IS NOT NULL, last_used ASC",
    )?;
    let rows = stmt
        .query_map([], row_to_credential)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn mark_credential_status(
    conn: &Connection,
    name: &str,
    status: CredentialStatus,
    error_message: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE credentials
         SET status = ?2, error_message = ?3, last_validated = datetime('now'), updated_at = datetime('now')
         WHERE name = ?1",
        params![name, status.as_str(), error_message],
    )?;
    Ok(())
}

pub fn touch_credential_last_used(conn: &Connection, name: &str) -> Result<()> {
    conn.execute(
        "UPDATE credentials SET last_used = datetime('now'), updated_at = datetime('now') WHERE name = ?1",
        params![name],
    )?;
    Ok(())
}

// --- Posts ---

fn row_to_post(row: &rusqlite::Row) -> rusqlite::Result<Post> {
    let attachments_json: String = row.get("attachments")?;
    let status_str: String = row.get("status")?;
    let media_json: String = row.get("fingerprint_media")?;
    Ok(Post {
        id: row.get("id")?,
        community_id: row.get("community_id")?,
        region_id: row.get("region_id")?,
        external_owner_id: row.get("external_owner_id")?,
        external_post_id: row.get("external_post_id")?,
        published_at: row.get("published_at")?,
        text: row.get("text")?,
        attachments: json_vec(&attachments_json),
        views: row.get::<_, i64>("views")? as u64,
        likes: row.get::<_, i64>("likes")? as u64,
        reposts: row.get::<_, i64>("reposts")? as u64,
        comments: row.get::<_, i64>("comments")? as u64,
        ai_category: row.get("ai_category")?,
        ai_score: row.get("ai_score")?,
        sentiment_label: row.get("sentiment_label")?,
        status: PostStatus::parse(&status_str),
        rejection_reason: row.get("rejection_reason")?,
        fingerprint_lip: row.get("fingerprint_lip")?,
        fingerprint_text_full: row.get("fingerprint_text_full")?,
        fingerprint_text_core: row.get("fingerprint_text_core")?,
        fingerprint_media: json_vec(&media_json),
        fingerprint_version: row.get("fingerprint_version")?,
        created_at: row.get("created_at")?,
    })
}

pub fn insert_post(conn: &Connection, post: &Post) -> Result<i64> {
    conn.execute(
        "INSERT INTO posts (
            community_id, region_id, external_owner_id, external_post_id, published_at,
            text, attachments, views, likes, reposts, comments,
            ai_category, ai_score, sentiment_label, status, rejection_reason,
            fingerprint_lip, fingerprint_text_full, fingerprint_text_core, fingerprint_media, fingerprint_version
        ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)",
        params![
            post.community_id,
            post.region_id,
            post.external_owner_id,
            post.external_post_id,
            post.published_at,
            post.text,
            serde_json::to_string(&post.attachments)?,
            post.views as i64,
            post.likes as i64,
            post.reposts as i64,
            post.comments as i64,
            post.ai_category,
            post.ai_score,
            post.sentiment_label,
            post.status.as_str(),
            post.rejection_reason,
            post.fingerprint_lip,
            post.fingerprint_text_full,
            post.fingerprint_text_core,
            serde_json::to_string(&post.fingerprint_media)?,
            post.fingerprint_version,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn find_post_by_lip(conn: &Connection, lip: &str) -> Result<Option<Post>> {
    let mut stmt = conn.prepare("SELECT * FROM posts WHERE fingerprint_lip = ?1")?;
    let result = stmt.query_row(params![lip], row_to_post).optional()?;
    Ok(result)
}

pub fn find_post_by_text_full(
    conn: &Connection,
    fingerprint: &str,
    exclude_lip: &str,
) -> Result<Option<Post>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM posts WHERE fingerprint_text_full = ?1 AND fingerprint_lip != ?2 LIMIT 1",
    )?;
    let result = stmt
        .query_row(params![fingerprint, exclude_lip], row_to_post)
        .optional()?;
    Ok(result)
}

pub fn find_post_by_text_core(
    conn: &Connection,
    fingerprint: &str,
    exclude_lip: &str,
) -> Result<Option<Post>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM posts WHERE fingerprint_text_core = ?1 AND fingerprint_lip != ?2 LIMIT 1",
    )?;
    let result = stmt
        .query_row(params![fingerprint, exclude_lip], row_to_post)
        .optional()?;
    Ok(result)
}

/// Find another post whose media fingerprint set intersects `media_ids`.
/// SQLite has no array-overlap operator, so this scans posts with any
/// non-empty media fingerprint and checks intersection in Rust. Bounded by
/// `recent_limit` to keep the scan cheap in the absence of a dedicated
/// media-fingerprint index table.
pub fn find_post_by_media_overlap(
    conn: &Connection,
    media_ids: &[String],
    exclude_lip: &str,
    recent_limit: u32,
) -> Result<Option<Post>> {
    if media_ids.is_empty() {
        return Ok(None);
    }
    let mut stmt = conn.prepare(
        "SELECT * FROM posts
         WHERE fingerprint_media != '[]' AND fingerprint_lip != ?1
         ORDER BY id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![exclude_lip, recent_limit], row_to_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    for post in rows {
        if post.fingerprint_media.iter().any(|m| media_ids.contains(m)) {
            return Ok(Some(post));
        }
    }
    Ok(None)
}

pub fn update_post_status(
    conn: &Connection,
    post_id: i64,
    status: PostStatus,
    reason: Option<&str>,
) -> Result<()> {
    conn.execute(
        "UPDATE posts SET status = ?2, rejection_reason = ?3 WHERE id = ?1",
        params![post_id, status.as_str(), reason],
    )?;
    Ok(())
}

pub fn update_post_score(conn: &Connection, post_id: i64, ai_score: f64) -> Result<()> {
    conn.execute(
        "UPDATE posts SET ai_score = ?2 WHERE id = ?1",
        params![post_id, ai_score],
    )?;
    Ok(())
}

pub fn update_post_sentiment(conn: &Connection, post_id: i64, label: &str) -> Result<()> {
    conn.execute(
        "UPDATE posts SET sentiment_label = ?2 WHERE id = ?1",
        params![post_id, label],
    )?;
    Ok(())
}

pub fn update_post_category(conn: &Connection, post_id: i64, category: &str) -> Result<()> {
    conn.execute(
        "UPDATE posts SET ai_category = ?2 WHERE id = ?1",
        params![post_id, category],
    )?;
    Ok(())
}

/// Upsert by LIP: refresh engagement stats without re-running filters.
pub fn upsert_post_stats(
    conn: &Connection,
    lip: &str,
    views: u64,
    likes: u64,
    reposts: u64,
    comments: u64,
) -> Result<()> {
    conn.execute(
        "UPDATE posts SET views = ?2, likes = ?3, reposts = ?4, comments = ?5 WHERE fingerprint_lip = ?1",
        params![lip, views as i64, likes as i64, reposts as i64, comments as i64],
    )?;
    Ok(())
}

pub fn list_candidate_posts_for_region(
    conn: &Connection,
    region_id: i64,
    limit: u32,
) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM posts WHERE region_id = ?1 AND status = 'accepted'
         ORDER BY published_at DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![region_id, limit], row_to_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn list_accepted_posts_for_region_since(
    conn: &Connection,
    region_id: i64,
    since_unix: i64,
) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM posts WHERE region_id = ?1 AND status = 'accepted' AND published_at >= ?2",
    )?;
    let rows = stmt
        .query_map(params![region_id, since_unix], row_to_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn count_accepted_posts_for_region(conn: &Connection, region_id: i64) -> Result<u32> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE region_id = ?1 AND status = 'accepted'",
        params![region_id],
        |row| row.get(0),
    )?;
    Ok(count as u32)
}

/// Posts whose `fingerprint_version` predates `version`, for re-derivation
/// migrations when the normalization rules change.
pub fn posts_needing_refingerprint(conn: &Connection, version: u32) -> Result<Vec<Post>> {
    let mut stmt = conn.prepare("SELECT * FROM posts WHERE fingerprint_version < ?1")?;
    let rows = stmt
        .query_map(params![version], row_to_post)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Blacklists & regional keywords (operator-maintained data) ---

pub fn is_id_blacklisted(conn: &Connection, external_id: i64) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM blacklist_ids WHERE external_id = ?1)",
        params![external_id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

pub fn add_blacklisted_id(conn: &Connection, external_id: i64) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO blacklist_ids (external_id) VALUES (?1)",
        params![external_id],
    )?;
    Ok(())
}

pub fn list_blacklisted_words(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT word FROM blacklist_words")?;
    let rows = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

pub fn add_blacklisted_word(conn: &Connection, word: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO blacklist_words (word) VALUES (?1)",
        params![word.to_lowercase()],
    )?;
    Ok(())
}

pub fn list_region_keywords(conn: &Connection, region_id: i64) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT keyword FROM region_keywords WHERE region_id = ?1")?;
    let rows = stmt
        .query_map(params![region_id], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<String>>>()?;
    Ok(rows)
}

pub fn add_region_keyword(conn: &Connection, region_id: i64, keyword: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO region_keywords (region_id, keyword) VALUES (?1, ?2)",
        params![region_id, keyword.to_lowercase()],
    )?;
    Ok(())
}

// --- Engagement samples ---

fn row_to_sample(row: &rusqlite::Row) -> rusqlite::Result<EngagementSample> {
    Ok(EngagementSample {
        region_id: row.get("region_id")?,
        hour: row.get::<_, i64>("hour")? as u8,
        weekday: row.get::<_, i64>("weekday")? as u8,
        sample_count: row.get("sample_count")?,
        avg_engagement: row.get("avg_engagement")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn upsert_engagement_sample(
    conn: &Connection,
    region_id: i64,
    hour: u8,
    weekday: u8,
    sample_count: u32,
    avg_engagement: f64,
) -> Result<()> {
    conn.execute(
        "INSERT INTO engagement_samples (region_id, hour, weekday, sample_count, avg_engagement, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
         ON CONFLICT(region_id, hour, weekday) DO UPDATE SET
            sample_count = ?4, avg_engagement = ?5, updated_at = datetime('now')",
        params![region_id, hour, weekday, sample_count, avg_engagement],
    )?;
    Ok(())
}

pub fn get_engagement_matrix(conn: &Connection, region_id: i64) -> Result<Vec<EngagementSample>> {
    let mut stmt = conn.prepare("SELECT * FROM engagement_samples WHERE region_id = ?1")?;
    let rows = stmt
        .query_map(params![region_id], row_to_sample)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

// --- Carousel tasks ---

fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<CarouselTask> {
    let status_str: String = row.get("status")?;
    Ok(CarouselTask {
        id: row.get("id")?,
        region_code: row.get("region_code")?,
        credential_name: row.get("credential_name")?,
        status: TaskStatus::parse(&status_str),
        queued_at: row.get("queued_at")?,
        started_at: row.get("started_at")?,
        completed_at: row.get("completed_at")?,
        posts_retrieved: row.get("posts_retrieved")?,
        error: row.get("error")?,
    })
}

pub fn create_carousel_task(conn: &Connection, region_code: &str, credential_name: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO carousel_tasks (region_code, credential_name) VALUES (?1, ?2)",
        params![region_code, credential_name],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn mark_task_running(conn: &Connection, task_id: i64) -> Result<()> {
    conn.execute(
        "UPDATE carousel_tasks SET status = 'running', started_at = datetime('now') WHERE id = ?1",
        params![task_id],
    )?;
    Ok(())
}

pub fn mark_task_completed(conn: &Connection, task_id: i64, posts_retrieved: u32) -> Result<()> {
    conn.execute(
        "UPDATE carousel_tasks
         SET status = 'completed', completed_at = datetime('now'), posts_retrieved = ?2
         WHERE id = ?1",
        params![task_id, posts_retrieved],
    )?;
    Ok(())
}

pub fn mark_task_failed(conn: &Connection, task_id: i64, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE carousel_tasks SET status = 'failed', completed_at = datetime('now'), error = ?2 WHERE id = ?1",
        params![task_id, error],
    )?;
    Ok(())
}

pub fn get_task(conn: &Connection, task_id: i64) -> Result<Option<CarouselTask>> {
    let mut stmt = conn.prepare("SELECT * FROM carousel_tasks WHERE id = ?1")?;
    let result = stmt.query_row(params![task_id], row_to_task).optional()?;
    Ok(result)
}

/// Median posts-per-completed-scan over the last 24h, for frequency
/// self-tuning. Returns `None` if there were no completed scans.
pub fn median_posts_per_scan_last_24h(conn: &Connection) -> Result<Option<f64>> {
    let mut stmt = conn.prepare(
        "SELECT posts_retrieved FROM carousel_tasks
         WHERE status = 'completed' AND completed_at >= datetime('now', '-1 day')
         ORDER BY posts_retrieved",
    )?;
    let mut values: Vec<i64> = stmt
        .query_map([], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    if values.is_empty() {
        return Ok(None);
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    let median = if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) as f64 / 2.0
    } else {
        values[mid] as f64
    };
    Ok(Some(median))
}

// --- Digests ---

fn row_to_digest(row: &rusqlite::Row) -> rusqlite::Result<Digest> {
    let post_ids_json: String = row.get("post_ids")?;
    let template_json: String = row.get("template_snapshot")?;
    Ok(Digest {
        id: row.get("id")?,
        region_id: row.get("region_id")?,
        category: row.get("category")?,
        post_ids: serde_json::from_str(&post_ids_json).unwrap_or_default(),
        scheduled_at: row.get("scheduled_at")?,
        template_snapshot: serde_json::from_str(&template_json).unwrap_or(serde_json::json!({})),
        cancelled: row.get::<_, i64>("cancelled")? != 0,
        created_at: row.get("created_at")?,
    })
}

pub fn insert_digest(
    conn: &Connection,
    region_id: i64,
    category: &str,
    post_ids: &[i64],
    scheduled_at: &str,
    template_snapshot: &serde_json::Value,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO digests (region_id, category, post_ids, scheduled_at, template_snapshot)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            region_id,
            category,
            serde_json::to_string(post_ids)?,
            scheduled_at,
            serde_json::to_string(template_snapshot)?,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn get_digest(conn: &Connection, id: i64) -> Result<Option<Digest>> {
    let mut stmt = conn.prepare("SELECT * FROM digests WHERE id = ?1")?;
    let result = stmt.query_row(params![id], row_to_digest).optional()?;
    Ok(result)
}

/// A digest is immutable once scheduled; "cancellation" marks the old row
/// cancelled rather than mutating it.
pub fn cancel_digest(conn: &Connection, id: i64) -> Result<()> {
    conn.execute("UPDATE digests SET cancelled = 1 WHERE id = ?1", params![id])?;
    Ok(())
}
