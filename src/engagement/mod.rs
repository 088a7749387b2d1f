//! Engagement Scorer: an `E[hour][weekday]` matrix of historical
//! engagement per region, used to recommend publication times.
//!
//! Pure functions over a small configurable-weights struct with a
//! `Default` impl.

use chrono::{DateTime, Datelike, Timelike, Utc};

use crate::db::models::Post;
use crate::db::traits::Database;
use crate::mixer::TimeSlot;

pub const DEFAULT_WINDOW_DAYS: u32 = 90;
pub const MIN_WINDOW_DAYS: u32 = 7;
pub const MAX_WINDOW_DAYS: u32 = 365;

/// Below this many accepted posts the matrix is too sparse to trust.
const COLD_START_MIN_POSTS: usize = 20;

const STRONGLY_RECOMMENDED_PCT: f64 = 25.0;
const RECOMMENDED_PCT: f64 = 10.0;
const NOT_RECOMMENDED_PCT: f64 = -10.0;

const DEFAULT_HOUR: u32 = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    StronglyRecommended,
    Recommended,
    Acceptable,
    NotRecommended,
}

impl Recommendation {
    fn from_vs_average_pct(pct: f64) -> Self {
        if pct >= STRONGLY_RECOMMENDED_PCT {
            Recommendation::StronglyRecommended
        } else if pct >= RECOMMENDED_PCT {
            Recommendation::Recommended
        } else if pct <= NOT_RECOMMENDED_PCT {
            Recommendation::NotRecommended
        } else {
            Recommendation::Acceptable
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngagementForecast {
    pub forecast: f64,
    pub average: f64,
    pub vs_average_pct: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CalendarSlot {
    pub day_offset: u32,
    pub slot: &'static str,
    pub hour: u32,
    pub forecast: f64,
    pub recommendation: Recommendation,
}

/// `E[hour][weekday]`: `weekday` is `0..=6` via `chrono`'s
/// `num_days_from_monday`, `hour` is `0..=23`.
struct Matrix {
    sum: [[f64; 7]; 24],
    count: [[u32; 7]; 24],
    overall_average: f64,
}

impl Matrix {
    fn build(posts: &[Post]) -> Self {
        let mut sum = [[0.0; 7]; 24];
        let mut count = [[0u32; 7]; 24];
        let mut total = 0.0;
        let mut total_count = 0u32;

        for post in posts {
            let Some(dt) = DateTime::<Utc>::from_timestamp(post.published_at, 0) else { continue };
            let hour = dt.hour() as usize;
            let weekday = dt.weekday().num_days_from_monday() as usize;
            let engagement = post.engagement() as f64;
            sum[hour][weekday] += engagement;
            count[hour][weekday] += 1;
            total += engagement;
            total_count += 1;
        }

        let overall_average = if total_count > 0 { total / total_count as f64 } else { 0.0 };
        Self { sum, count, overall_average }
    }

    fn average_at(&self, hour: u32, weekday: u32) -> f64 {
        let (h, w) = (hour as usize, weekday as usize);
        if self.count[h][w] == 0 {
            0.0
        } else {
            self.sum[h][w] / self.count[h][w] as f64
        }
    }

    /// Hour in `range` with the highest average engagement for `weekday`,
    /// ties broken by the lowest hour.
    fn best_hour_in_range(&self, range: std::ops::RangeInclusive<u32>, weekday: u32) -> u32 {
        let mut best = *range.start();
        let mut best_avg = self.average_at(best, weekday);
        for hour in range {
            let avg = self.average_at(hour, weekday);
            if avg > best_avg {
                best = hour;
                best_avg = avg;
            }
        }
        best
    }
}

pub struct EngagementScorer {
    window_days: u32,
}

impl EngagementScorer {
    pub fn new(window_days: u32) -> Self {
        Self { window_days: window_days.clamp(MIN_WINDOW_DAYS, MAX_WINDOW_DAYS) }
    }

    async fn matrix_for(
        &self,
        db: &dyn Database,
        region_id: i64,
        category: Option<&str>,
        now_unix: i64,
    ) -> anyhow::Result<(Matrix, usize)> {
        let since = now_unix - self.window_days as i64 * 86_400;
        let mut posts = db.list_accepted_posts_for_region_since(region_id, since).await?;
        if let Some(category) = category {
            posts.retain(|p| p.ai_category.as_deref() == Some(category));
        }
        let count = posts.len();
        Ok((Matrix::build(&posts), count))
    }

    /// The `(hour, minute)` with maximum `E`, optionally restricted to
    /// a slot's hour range. `minute` is always 0.
    pub async fn optimal_time(
        &self,
        db: &dyn Database,
        region_id: i64,
        category: Option<&str>,
        slot: Option<TimeSlot>,
        now_unix: i64,
    ) -> anyhow::Result<(u32, u32)> {
        let (matrix, sample_count) = self.matrix_for(db, region_id, category, now_unix).await?;
        if sample_count < COLD_START_MIN_POSTS {
            return Ok((DEFAULT_HOUR, 0));
        }

        let weekday = DateTime::<Utc>::from_timestamp(now_unix, 0)
            .map(|dt| dt.weekday().num_days_from_monday())
            .unwrap_or(0);
        let range = slot.map(|s| s.hour_range()).unwrap_or(0..=23);
        let hour = matrix.best_hour_in_range(range, weekday);
        Ok((hour, 0))
    }

    /// Forecast for a specific `(region, when)` against the region's
    /// overall average.
    pub async fn engagement_forecast(
        &self,
        db: &dyn Database,
        region_id: i64,
        category: Option<&str>,
        when_unix: i64,
    ) -> anyhow::Result<EngagementForecast> {
        let (matrix, sample_count) = self.matrix_for(db, region_id, category, when_unix).await?;
        if sample_count < COLD_START_MIN_POSTS {
            return Ok(EngagementForecast {
                forecast: 0.0,
                average: 0.0,
                vs_average_pct: 0.0,
                recommendation: Recommendation::Acceptable,
            });
        }

        let dt = DateTime::<Utc>::from_timestamp(when_unix, 0).unwrap_or_else(Utc::now);
        let weekday = dt.weekday().num_days_from_monday();
        let forecast = matrix.average_at(dt.hour(), weekday);
        let average = matrix.overall_average;
        let vs_average_pct = if average > 0.0 { (forecast - average) / average * 100.0 } else { 0.0 };

        Ok(EngagementForecast {
            forecast,
            average,
            vs_average_pct,
            recommendation: Recommendation::from_vs_average_pct(vs_average_pct),
        })
    }

    /// Whether publishing right now is advisable, allowing up to
    /// `tolerance_hours` of slack before the region's best nearby slot.
    pub async fn should_publish_now(
        &self,
        db: &dyn Database,
        region_id: i64,
        category: Option<&str>,
        now_unix: i64,
        tolerance_hours: f64,
    ) -> anyhow::Result<(bool, String)> {
        let forecast = self.engagement_forecast(db, region_id, category, now_unix).await?;
        if forecast.recommendation != Recommendation::NotRecommended {
            return Ok((true, format!("{:?} (vs average {:+.1}%)", forecast.recommendation, forecast.vs_average_pct)));
        }

        let (best_hour, _) = self.optimal_time(db, region_id, category, None, now_unix).await?;
        let current_hour = DateTime::<Utc>::from_timestamp(now_unix, 0).unwrap_or_else(Utc::now).hour();
        let hours_away = hour_distance(current_hour, best_hour);
        if hours_away as f64 <= tolerance_hours {
            Ok((true, format!("below average but optimal hour {best_hour} is only {hours_away}h away")))
        } else {
            Ok((false, format!("below average, optimal hour {best_hour} is {hours_away}h away")))
        }
    }

    /// Chronologically ordered recommended slots for the next `days`
    /// days, one entry per slot that clears the acceptable threshold.
    pub async fn publication_calendar(
        &self,
        db: &dyn Database,
        region_id: i64,
        category: Option<&str>,
        days: u32,
        now_unix: i64,
    ) -> anyhow::Result<Vec<CalendarSlot>> {
        let mut calendar = Vec::new();
        let slots = [
            ("morning", TimeSlot::Morning),
            ("afternoon", TimeSlot::Afternoon),
            ("evening", TimeSlot::Evening),
        ];

        for day_offset in 0..days {
            let day_start = now_unix + day_offset as i64 * 86_400;
            for (label, slot) in slots {
                let (hour, _) = self.optimal_time(db, region_id, category, Some(slot), day_start).await?;
                let bucket_unix = day_start - (day_start.rem_euclid(86_400)) + hour as i64 * 3600;
                let forecast = self.engagement_forecast(db, region_id, category, bucket_unix).await?;
                if forecast.recommendation != Recommendation::NotRecommended {
                    calendar.push(CalendarSlot {
                        day_offset,
                        slot: label,
                        hour,
                        forecast: forecast.forecast,
                        recommendation: forecast.recommendation,
                    });
                }
            }
        }

        Ok(calendar)
    }
}

impl Default for EngagementScorer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_DAYS)
    }
}

fn hour_distance(a: u32, b: u32) -> u32 {
    let diff = (a as i32 - b as i32).abs() as u32;
    diff.min(24 - diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PostStatus;
    use crate::db::sqlite::SqliteDatabase;

    async fn test_db() -> SqliteDatabase {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        crate::db::schema::create_tables(&conn).unwrap();
        SqliteDatabase::new(conn)
    }

    fn post(id: i64, published_at: i64, views: u64) -> Post {
        Post {
            id,
            community_id: 1,
            region_id: 1,
            external_owner_id: -1,
            external_post_id: id,
            published_at,
            text: "post".into(),
            attachments: vec![],
            views,
            likes: 0,
            reposts: 0,
            comments: 0,
            ai_category: None,
            ai_score: 50.0,
            sentiment_label: None,
            status: PostStatus::Accepted,
            rejection_reason: None,
            fingerprint_lip: format!("-1_{id}"),
            fingerprint_text_full: format!("full{id}"),
            fingerprint_text_core: format!("core{id}"),
            fingerprint_media: vec![],
            fingerprint_version: 1,
            created_at: String::new(),
        }
    }

    /// 2024-01-05 is a Friday.
    fn unix_at(day: u32, hour: u32) -> i64 {
        let base = DateTime::<Utc>::from_timestamp(1_704_412_800, 0).unwrap(); // 2024-01-05 00:00 UTC
        (base + chrono::Duration::days(day as i64) + chrono::Duration::hours(hour as i64)).timestamp()
    }

    #[tokio::test]
    async fn cold_start_returns_default_slot() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();
        let p = post(1, unix_at(0, 19), 1000);
        db.insert_post(&p).await.unwrap();

        let scorer = EngagementScorer::default();
        let now = unix_at(10, 12);
        let (hour, minute) = scorer.optimal_time(&db, region_id, None, None, now).await.unwrap();
        assert_eq!((hour, minute), (DEFAULT_HOUR, 0));
    }

    #[tokio::test]
    async fn selects_hour_with_outsized_engagement() {
        let db = test_db().await;
        let region_id = db.create_region("spb", "Saint Petersburg", "outlet-1").await.unwrap();

        for day in 0..30u32 {
            let hot = post(1000 + day as i64, unix_at(day, 19), 5000);
            db.insert_post(&hot).await.unwrap();
            for (i, h) in [6, 10, 13, 21].into_iter().enumerate() {
                let cold = post(2000 + day as i64 * 10 + i as i64, unix_at(day, h), 50);
                db.insert_post(&cold).await.unwrap();
            }
        }

        let scorer = EngagementScorer::default();
        let now = unix_at(30, 12);
        let (hour, _) = scorer.optimal_time(&db, region_id, None, Some(TimeSlot::Evening), now).await.unwrap();
        assert_eq!(hour, 19);

        let forecast = scorer.engagement_forecast(&db, region_id, None, unix_at(29, 19)).await.unwrap();
        assert!(forecast.vs_average_pct >= 100.0);
        assert_eq!(forecast.recommendation, Recommendation::StronglyRecommended);
    }
}
