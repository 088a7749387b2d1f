// Data models — Rust structs that map to database rows.
//
// These are the types that flow through the application. They're separate
// from the database queries so other modules can use them without depending
// on rusqlite directly.

use serde::{Deserialize, Serialize};

/// Closed taxonomy of community categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Administration,
    Culture,
    Youth,
    Sports,
    PreschoolEducation,
    News,
    OrthodoxNews,
    Advertising,
    Entertainment,
    ScienceNews,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Administration => "administration",
            Category::Culture => "culture",
            Category::Youth => "youth",
            Category::Sports => "sports",
            Category::PreschoolEducation => "preschool_education",
            Category::News => "news",
            Category::OrthodoxNews => "orthodox_news",
            Category::Advertising => "advertising",
            Category::Entertainment => "entertainment",
            Category::ScienceNews => "science_news",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "administration" => Category::Administration,
            "culture" => Category::Culture,
            "youth" => Category::Youth,
            "sports" => Category::Sports,
            "preschool_education" => Category::PreschoolEducation,
            "news" => Category::News,
            "orthodox_news" => Category::OrthodoxNews,
            "advertising" => Category::Advertising,
            "entertainment" => Category::Entertainment,
            "science_news" => Category::ScienceNews,
            _ => return None,
        })
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A logical geographic grouping that owns communities and digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub primary_outlet_id: String,
    pub telegram_channel: Option<String>,
    pub neighbors: Vec<String>,
    pub local_hashtags: Vec<String>,
    pub config: RegionConfig,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// `Region.config` — the digest template document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionConfig {
    pub digest_template: DigestTemplateDoc,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestTemplateDoc {
    pub defaults: DigestTemplate,
    #[serde(default)]
    pub by_topic: std::collections::BTreeMap<String, DigestTemplate>,
}

/// One topic's (or the defaults') template settings. Every field is optional
/// so that merging `built_in_defaults ◁ region_defaults ◁ by_topic[topic]`
/// only overrides fields the more-specific layer actually sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestTemplate {
    pub title: Option<String>,
    pub footer: Option<String>,
    pub include_source_links: Option<bool>,
    pub include_topic_hashtag: Option<bool>,
    pub include_region_hashtags: Option<bool>,
    pub topic_hashtag_override: Option<String>,
}

impl DigestTemplate {
    /// Built-in fallback used as the base of every merge chain.
    pub fn built_in_defaults() -> Self {
        Self {
            title: Some("Дайджест".to_string()),
            footer: Some(String::new()),
            include_source_links: Some(true),
            include_topic_hashtag: Some(true),
            include_region_hashtags: Some(false),
            topic_hashtag_override: None,
        }
    }

    /// Override non-null fields of `self` with non-null fields of `more_specific`.
    pub fn overridden_by(&self, more_specific: &DigestTemplate) -> Self {
        Self {
            title: more_specific.title.clone().or_else(|| self.title.clone()),
            footer: more_specific.footer.clone().or_else(|| self.footer.clone()),
            include_source_links: more_specific.include_source_links.or(self.include_source_links),
            include_topic_hashtag: more_specific.include_topic_hashtag.or(self.include_topic_hashtag),
            include_region_hashtags: more_specific.include_region_hashtags.or(self.include_region_hashtags),
            topic_hashtag_override: more_specific
                .topic_hashtag_override
                .clone()
                .or_else(|| self.topic_hashtag_override.clone()),
        }
    }
}

impl DigestTemplateDoc {
    /// Effective settings for a topic: `built_in_defaults ◁ region_defaults ◁ by_topic[topic]`.
    pub fn effective(&self, topic: &str) -> DigestTemplate {
        let base = DigestTemplate::built_in_defaults().overridden_by(&self.defaults);
        match self.by_topic.get(topic) {
            Some(topic_template) => base.overridden_by(topic_template),
            None => base,
        }
    }
}

/// An upstream source bound to exactly one region. `external_id` is
/// signed: negative denotes a group-type source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: i64,
    pub region_id: i64,
    pub external_id: i64,
    pub screen_name: Option<String>,
    pub name: String,
    pub category: Category,
    pub is_active: bool,
    pub last_checked: Option<String>,
    pub post_count: u32,
    pub error_count: u32,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    Unknown,
    Valid,
    Invalid,
}

impl CredentialStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialStatus::Unknown => "unknown",
            CredentialStatus::Valid => "valid",
            CredentialStatus::Invalid => "invalid",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "valid" => CredentialStatus::Valid,
            "invalid" => CredentialStatus::Invalid,
            _ => CredentialStatus::Unknown,
        }
    }
}

/// An upstream access token. `secret` is never returned to an operator
/// surface unmasked — see [`Credential::masked_secret`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: i64,
    pub name: String,
    pub secret: String,
    pub is_active: bool,
    pub last_used: Option<String>,
    pub last_validated: Option<String>,
    pub status: CredentialStatus,
    pub error_message: Option<String>,
    pub permissions: Vec<String>,
    pub user_info: Option<serde_json::Value>,
    pub created_at: String,
    pub updated_at: String,
}

impl Credential {
    /// The secret is never returned in responses — always masked to
    /// first 20 chars + "…".
    pub fn masked_secret(&self) -> String {
        let prefix: String = self.secret.chars().take(20).collect();
        format!("{prefix}…")
    }

    pub fn is_eligible_for_scan(&self) -> bool {
        self.is_active && self.status == CredentialStatus::Valid
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    New,
    Accepted,
    Rejected,
    Spam,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::New => "new",
            PostStatus::Accepted => "accepted",
            PostStatus::Rejected => "rejected",
            PostStatus::Spam => "spam",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "accepted" => PostStatus::Accepted,
            "rejected" => PostStatus::Rejected,
            "spam" => PostStatus::Spam,
            _ => PostStatus::New,
        }
    }

    /// Once accepted/rejected, status does not revert.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Accepted | PostStatus::Rejected | PostStatus::Spam)
    }
}

/// The canonical post record. Both upstream-decoded posts and persisted
/// rows use this single shape; filter stages accept only this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    pub community_id: i64,
    pub region_id: i64,
    pub external_owner_id: i64,
    pub external_post_id: i64,
    pub published_at: i64,
    pub text: String,
    pub attachments: Vec<String>,
    pub views: u64,
    pub likes: u64,
    pub reposts: u64,
    pub comments: u64,
    pub ai_category: Option<String>,
    pub ai_score: f64,
    pub sentiment_label: Option<String>,
    pub status: PostStatus,
    pub rejection_reason: Option<String>,
    pub fingerprint_lip: String,
    pub fingerprint_text_full: String,
    pub fingerprint_text_core: String,
    pub fingerprint_media: Vec<String>,
    pub fingerprint_version: u32,
    pub created_at: String,
}

impl Post {
    /// `views + 2*likes + 3*reposts + 4*comments`.
    pub fn engagement(&self) -> u64 {
        self.views + 2 * self.likes + 3 * self.reposts + 4 * self.comments
    }

    /// Apply a filter-stage score delta, clamped to [0, 100].
    pub fn adjust_score(&mut self, delta: f64) {
        self.ai_score = (self.ai_score + delta).clamp(0.0, 100.0);
    }

    /// Status transitions to accepted/rejected/spam are one-way.
    pub fn transition_status(&mut self, new_status: PostStatus) {
        if self.status.is_terminal() {
            return;
        }
        self.status = new_status;
    }
}

/// Derived per-(region, hour, weekday) engagement aggregate.
/// `weekday` is 0=Monday..6=Sunday (chrono convention).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngagementSample {
    pub region_id: i64,
    pub hour: u8,
    pub weekday: u8,
    pub sample_count: u32,
    pub avg_engagement: f64,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskStatus::Running,
            "completed" => TaskStatus::Completed,
            "failed" => TaskStatus::Failed,
            _ => TaskStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// One scheduled scan of (region, credential).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarouselTask {
    pub id: i64,
    pub region_code: String,
    pub credential_name: String,
    pub status: TaskStatus,
    pub queued_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub posts_retrieved: u32,
    pub error: Option<String>,
}

/// An ordered, immutable-once-scheduled list of post references.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub id: i64,
    pub region_id: i64,
    pub category: String,
    pub post_ids: Vec<i64>,
    pub scheduled_at: String,
    pub template_snapshot: serde_json::Value,
    pub cancelled: bool,
    pub created_at: String,
}
