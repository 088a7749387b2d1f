//! Carousel Scheduler: decides which region to scan next, under a
//! per-region cooldown and a global concurrency cap, and self-tunes that
//! cooldown from recent yield.
//!
//! Scan state (`last_scan_at[region]`, `currently_running`, per-credential
//! in-use flags) lives in the store's generic scan-state key/value table
//! rather than new columns, keeping ad hoc scheduler bookkeeping out of the
//! main entity tables.

use tracing::{info, warn};

use crate::db::models::{Credential, CredentialStatus, Region};
use crate::db::traits::Database;

pub const DEFAULT_MIN_INTERVAL_MINUTES: u32 = 60;
pub const DEFAULT_MAX_CONCURRENT_SCANS: u32 = 2;

const MIN_INTERVAL_FLOOR: u32 = 15;
const MIN_INTERVAL_CEILING: u32 = 240;
const TUNING_FACTOR: f64 = 1.25;
const LOW_YIELD_THRESHOLD: f64 = 5.0;
const HIGH_YIELD_THRESHOLD: f64 = 30.0;

const SCAN_STATE_INTERVAL_KEY: &str = "carousel:min_interval_minutes";

fn last_scan_key(region_code: &str) -> String {
    format!("carousel:last_scan_at:{region_code}")
}

fn running_key(region_code: &str) -> String {
    format!("carousel:running:{region_code}")
}

fn credential_in_use_key(name: &str) -> String {
    format!("carousel:credential_in_use:{name}")
}

pub struct CarouselScheduler {
    max_concurrent_scans: u32,
}

impl Default for CarouselScheduler {
    fn default() -> Self {
        Self { max_concurrent_scans: DEFAULT_MAX_CONCURRENT_SCANS }
    }
}

impl CarouselScheduler {
    pub fn new(max_concurrent_scans: u32) -> Self {
        Self { max_concurrent_scans }
    }

    async fn min_interval_minutes(&self, db: &dyn Database) -> anyhow::Result<u32> {
        match db.get_scan_state(SCAN_STATE_INTERVAL_KEY).await? {
            Some(raw) => Ok(raw.parse().unwrap_or(DEFAULT_MIN_INTERVAL_MINUTES)),
            None => Ok(DEFAULT_MIN_INTERVAL_MINUTES),
        }
    }

    async fn currently_running_count(&self, db: &dyn Database) -> anyhow::Result<u32> {
        let all = db.get_all_scan_state().await?;
        Ok(all.iter().filter(|(k, v)| k.starts_with("carousel:running:") && v == "1").count() as u32)
    }

    async fn last_scan_at(&self, db: &dyn Database, region_code: &str) -> anyhow::Result<i64> {
        match db.get_scan_state(&last_scan_key(region_code)).await? {
            Some(raw) => Ok(raw.parse().unwrap_or(0)),
            None => Ok(0),
        }
    }

    async fn is_running(&self, db: &dyn Database, region_code: &str) -> anyhow::Result<bool> {
        Ok(db.get_scan_state(&running_key(region_code)).await?.as_deref() == Some("1"))
    }

    async fn credential_in_use(&self, db: &dyn Database, name: &str) -> anyhow::Result<bool> {
        Ok(db.get_scan_state(&credential_in_use_key(name)).await?.as_deref() == Some("1"))
    }

    /// Picks the first active, non-running region whose cooldown has
    /// elapsed and that has a free, valid credential, honoring the global
    /// concurrency cap.
    pub async fn select_next(&self, db: &dyn Database, now_unix: i64) -> anyhow::Result<Option<(Region, Credential)>> {
        if self.currently_running_count(db).await? >= self.max_concurrent_scans {
            return Ok(None);
        }

        let min_interval_secs = self.min_interval_minutes(db).await? as i64 * 60;
        let active_regions = db.list_active_regions().await?;

        let mut candidates = Vec::new();
        for region in active_regions {
            if self.is_running(db, &region.code).await? {
                continue;
            }
            let last_scan = self.last_scan_at(db, &region.code).await?;
            if now_unix - last_scan >= min_interval_secs {
                candidates.push((region, last_scan));
            }
        }
        if candidates.is_empty() {
            return Ok(None);
        }

        candidates.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.code.cmp(&b.0.code)));
        let (region, _) = candidates.into_iter().next().unwrap();

        let mut eligible_credentials = db.list_eligible_credentials().await?;
        let mut available = Vec::new();
        for credential in eligible_credentials.drain(..) {
            if !self.credential_in_use(db, &credential.name).await? {
                available.push(credential);
            }
        }
        if available.is_empty() {
            return Ok(None);
        }
        available.sort_by(|a, b| a.last_used.cmp(&b.last_used));
        let credential = available.into_iter().next().unwrap();

        Ok(Some((region, credential)))
    }

    /// Mark a region/credential pair as actively scanning (called by the
    /// Work Dispatcher right before invoking the Upstream Client).
    pub async fn mark_scan_started(&self, db: &dyn Database, region_code: &str, credential_name: &str) -> anyhow::Result<()> {
        db.set_scan_state(&running_key(region_code), "1").await?;
        db.set_scan_state(&credential_in_use_key(credential_name), "1").await?;
        db.touch_credential_last_used(credential_name).await?;
        Ok(())
    }

    /// Release the region/credential pair and record `now_unix` as the
    /// region's new `last_scan_at`.
    pub async fn mark_scan_finished(&self, db: &dyn Database, region_code: &str, credential_name: &str, now_unix: i64) -> anyhow::Result<()> {
        db.set_scan_state(&last_scan_key(region_code), &now_unix.to_string()).await?;
        db.set_scan_state(&running_key(region_code), "0").await?;
        db.set_scan_state(&credential_in_use_key(credential_name), "0").await?;
        Ok(())
    }

    /// A credential whose task fails with "token invalid" is excluded
    /// from selection until revalidated.
    pub async fn invalidate_credential(&self, db: &dyn Database, name: &str, reason: &str) -> anyhow::Result<()> {
        warn!(credential = name, reason, "invalidating credential");
        db.mark_credential_status(name, CredentialStatus::Invalid, Some(reason)).await?;
        db.set_scan_state(&credential_in_use_key(name), "0").await?;
        Ok(())
    }

    /// Examine the median posts-per-scan over the last 24h and adjust
    /// `min_interval_minutes` within [15, 240]. Returns the (possibly
    /// unchanged) interval.
    pub async fn tune_frequency(&self, db: &dyn Database) -> anyhow::Result<u32> {
        let current = self.min_interval_minutes(db).await?;
        let median = match db.median_posts_per_scan_last_24h().await? {
            Some(m) => m,
            None => return Ok(current),
        };

        let adjusted = if median < LOW_YIELD_THRESHOLD {
            ((current as f64 * TUNING_FACTOR).round() as u32).min(MIN_INTERVAL_CEILING)
        } else if median > HIGH_YIELD_THRESHOLD {
            ((current as f64 / TUNING_FACTOR).round() as u32).max(MIN_INTERVAL_FLOOR)
        } else {
            current
        };

        if adjusted != current {
            info!(from = current, to = adjusted, median, "tuning carousel min_interval_minutes");
            db.set_scan_state(SCAN_STATE_INTERVAL_KEY, &adjusted.to_string()).await?;
        }
        Ok(adjusted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::SqliteDatabase;

    async fn test_db() -> SqliteDatabase {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::schema::create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    #[tokio::test]
    async fn selects_oldest_region_with_earliest_credential() {
        let db = test_db().await;
        db.create_region("akv", "Akvitaniya", "outlet-akv").await.unwrap();
        db.create_region("brk", "Berkutsk", "outlet-brk").await.unwrap();
        db.create_credential("cred-a", "secret-a").await.unwrap();
        db.create_credential("cred-b", "secret-b").await.unwrap();
        db.mark_credential_status("cred-a", CredentialStatus::Valid, None).await.unwrap();
        db.mark_credential_status("cred-b", CredentialStatus::Valid, None).await.unwrap();

        let scheduler = CarouselScheduler::default();
        let selected = scheduler.select_next(&db, 10_000).await.unwrap();
        let (region, credential) = selected.expect("a region/credential pair should be selected");
        assert_eq!(region.code, "akv");
        assert!(credential.name == "cred-a" || credential.name == "cred-b");
    }

    #[tokio::test]
    async fn respects_min_interval_cooldown() {
        let db = test_db().await;
        db.create_region("akv", "Akvitaniya", "outlet-akv").await.unwrap();
        db.create_credential("cred-a", "secret-a").await.unwrap();
        db.mark_credential_status("cred-a", CredentialStatus::Valid, None).await.unwrap();

        let scheduler = CarouselScheduler::default();
        scheduler.mark_scan_started(&db, "akv", "cred-a").await.unwrap();
        scheduler.mark_scan_finished(&db, "akv", "cred-a", 0).await.unwrap();

        let too_soon = scheduler.select_next(&db, 30 * 60).await.unwrap();
        assert!(too_soon.is_none());

        let after_cooldown = scheduler.select_next(&db, 61 * 60).await.unwrap();
        assert!(after_cooldown.is_some());
    }

    #[tokio::test]
    async fn respects_concurrency_cap() {
        let db = test_db().await;
        db.create_region("akv", "Akvitaniya", "outlet-akv").await.unwrap();
        db.create_region("brk", "Berkutsk", "outlet-brk").await.unwrap();
        db.create_credential("cred-a", "secret-a").await.unwrap();
        db.mark_credential_status("cred-a", CredentialStatus::Valid, None).await.unwrap();

        let scheduler = CarouselScheduler::new(1);
        scheduler.mark_scan_started(&db, "akv", "cred-a").await.unwrap();

        let selected = scheduler.select_next(&db, 100_000).await.unwrap();
        assert!(selected.is_none());
    }

    #[tokio::test]
    async fn tunes_frequency_up_on_low_yield() {
        let db = test_db().await;
        for i in 0..5 {
            let task_id = db.create_carousel_task("akv", "cred-a").await.unwrap();
            db.mark_task_running(task_id).await.unwrap();
            db.mark_task_completed(task_id, 2).await.unwrap();
            let _ = i;
        }
        let scheduler = CarouselScheduler::default();
        let interval = scheduler.tune_frequency(&db).await.unwrap();
        assert!(interval > DEFAULT_MIN_INTERVAL_MINUTES);
    }
}
