// Composition tests — verifying that pure functions and DB-backed stages
// chain together correctly across the ingest -> filter -> mix -> forecast
// pipeline, without any network calls.

use wallwatch::db::models::{Category, Post, PostStatus};
use wallwatch::db::sqlite::SqliteDatabase;
use wallwatch::db::traits::Database;
use wallwatch::engagement::EngagementScorer;
use wallwatch::fingerprint::{fingerprint, FingerprintInput};
use wallwatch::mixer::{ContentMixer, TimeSlot};
use wallwatch::pipeline::{ContextFactory, FilterPipeline};
use wallwatch::sentiment::{SentimentLabel, SentimentLexicon};

async fn test_db() -> SqliteDatabase {
    let conn = rusqlite::Connection::open_in_memory().unwrap();
    wallwatch::db::schema::create_tables(&conn).unwrap();
    SqliteDatabase::new(conn)
}

fn base_context<'a>(db: &'a dyn Database, region_id: i64, community_external_id: i64, now_unix: i64) -> ContextFactory<'a> {
    ContextFactory {
        db,
        region_id,
        strict_main_news_groups: vec![],
        community_external_id,
        is_neighbor_region: false,
        max_age_hours: 72.0,
        min_views: 10,
        min_text_len: 20,
        max_text_len: 5000,
        min_regional_matches: 0,
        allowed_categories: None,
        blocked_categories: vec![],
        region_fallback_keywords: vec!["#акватория".to_string()],
        now_unix,
    }
}

fn build_post(community_id: i64, region_id: i64, owner_id: i64, post_id: i64, text: &str, views: u64, published_at: i64) -> Post {
    let fingerprints = fingerprint(&FingerprintInput { owner_id, post_id, text, media_ids: &[] });
    let sentiment = SentimentLexicon::default().analyze(text);
    let label = match sentiment.label {
        SentimentLabel::Positive => "positive",
        SentimentLabel::Neutral => "neutral",
        SentimentLabel::Negative => "negative",
    };
    Post {
        id: 0,
        community_id,
        region_id,
        external_owner_id: owner_id,
        external_post_id: post_id,
        published_at,
        text: text.to_string(),
        attachments: vec![],
        views,
        likes: views / 10,
        reposts: views / 50,
        comments: views / 100,
        ai_category: None,
        ai_score: 50.0,
        sentiment_label: Some(label.to_string()),
        status: PostStatus::New,
        rejection_reason: None,
        fingerprint_lip: fingerprints.lip,
        fingerprint_text_full: fingerprints.text_full,
        fingerprint_text_core: fingerprints.text_core,
        fingerprint_media: fingerprints.media,
        fingerprint_version: fingerprints.version,
        created_at: String::new(),
    }
}

/// End to end: a batch of fingerprinted, sentiment-tagged posts runs through
/// the standard Filter Pipeline, survivors are queryable as digest
/// candidates, and the Content Mixer assembles a diversity-ordered digest
/// from them.
#[tokio::test]
async fn ingest_filter_and_mix_round_trip() {
    let db = test_db().await;
    let region_id = db.create_region("akv", "Akvitaniya", "outlet-akv").await.unwrap();
    let community_id = db
        .create_community(region_id, 1001, Some("akv_news"), "Akvitaniya News", Category::News)
        .await
        .unwrap();

    let now = 1_700_000_000i64;
    let texts = [
        "Сегодня в Акватории прошёл большой городской праздник #акватория с концертом и ярмаркой для всех жителей района",
        "Ужасная трагедия произошла вчера вечером, жители в шоке и панике после страшной аварии в центре города",
        "Местная школа открыла новый кружок робототехники для детей, запись уже началась на этой неделе",
        "Полезные советы для дачников: как подготовить сад к зиме и сохранить урожай до весны в этом сезоне",
    ];

    let mut posts = Vec::new();
    for (i, text) in texts.iter().enumerate() {
        let post = build_post(community_id, region_id, 1001, 100 + i as i64, text, 500, now - 3600);
        let post_id = db.insert_post(&post).await.unwrap();
        let stored = db.find_post_by_lip(&post.fingerprint_lip).await.unwrap().unwrap();
        assert_eq!(stored.id, post_id);
        posts.push(stored);
    }
    assert_eq!(posts.len(), texts.len());

    let mut pipeline = FilterPipeline::standard();

    let ctx = base_context(&db, region_id, 1001, now);
    let report = pipeline.run(&db, posts, &ctx).await.unwrap();
    assert_eq!(report.original_count, texts.len());
    assert!(report.passed_count >= 1, "at least the clean local post should survive filtering");

    let survivors = db.list_candidate_posts_for_region(region_id, 50).await.unwrap();
    assert!(!survivors.is_empty());

    let mixer = ContentMixer;
    let digest = mixer.create_balanced_digest(&survivors, 10, TimeSlot::Morning);
    let stats = mixer.digest_stats(&digest);
    assert_eq!(stats.total_posts, digest.len());
    assert!(stats.average_score >= 0.0);
}

/// Re-ingesting the same (owner, post_id) pair is idempotent: the second
/// insert attempt is detected via the LIP fingerprint before a duplicate
/// row is created, and engagement stats on the existing row are refreshed
/// instead.
#[tokio::test]
async fn duplicate_post_is_detected_by_lip_before_insert() {
    let db = test_db().await;
    let region_id = db.create_region("nrd", "Nordland", "outlet-nrd").await.unwrap();
    let community_id = db
        .create_community(region_id, 2002, Some("nrd_news"), "Nordland News", Category::News)
        .await
        .unwrap();

    let text = "Городской совет утвердил новый план благоустройства центральной площади на следующий год";
    let post = build_post(community_id, region_id, 2002, 55, text, 100, 1_700_000_000);
    db.insert_post(&post).await.unwrap();

    let fingerprints = fingerprint(&FingerprintInput { owner_id: 2002, post_id: 55, text, media_ids: &[] });
    let existing = db.find_post_by_lip(&fingerprints.lip).await.unwrap();
    assert!(existing.is_some(), "second ingest attempt must find the existing row by LIP");

    db.upsert_post_stats(&fingerprints.lip, 400, 40, 8, 4).await.unwrap();
    let refreshed = db.find_post_by_lip(&fingerprints.lip).await.unwrap().unwrap();
    assert_eq!(refreshed.views, 400);
    assert_eq!(refreshed.likes, 40);
}

/// The Engagement Scorer never panics on a region with no accepted history
/// and degrades to a neutral forecast rather than erroring.
#[tokio::test]
async fn engagement_forecast_on_empty_history_is_neutral() {
    let db = test_db().await;
    let region_id = db.create_region("qst", "Questland", "outlet-qst").await.unwrap();

    let scorer = EngagementScorer::new(90);
    let forecast = scorer.engagement_forecast(&db, region_id, None, 1_700_000_000).await.unwrap();
    assert!(forecast.forecast >= 0.0);
    assert_eq!(forecast.vs_average_pct, 0.0);
}
