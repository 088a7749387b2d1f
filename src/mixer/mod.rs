//! Content Mixer: selects and orders posts into a digest under a
//! time-slot-specific category mix, with a sentiment safety valve and a
//! greedy diversity ordering pass.
//!
//! Selection fills each category's floor quota first, then tops up the
//! remainder by score across the whole candidate set; ordering then walks
//! the selected posts greedily, each step picking whichever remaining post
//! is least similar to the one just placed.

use std::collections::HashMap;

use crate::db::models::Post;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeSlot {
    Morning,
    Afternoon,
    Evening,
}

impl TimeSlot {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "morning" => Some(TimeSlot::Morning),
            "afternoon" => Some(TimeSlot::Afternoon),
            "evening" => Some(TimeSlot::Evening),
            _ => None,
        }
    }

    /// Hour range used by the Engagement Scorer's `slot` restriction;
    /// kept here too since the mixer and scorer share the same slot concept.
    pub fn hour_range(&self) -> std::ops::RangeInclusive<u32> {
        match self {
            TimeSlot::Morning => 6..=11,
            TimeSlot::Afternoon => 12..=17,
            TimeSlot::Evening => 18..=22,
        }
    }

    /// The slot's target category mix. Order matches the
    /// table below; fractions sum to 1.0.
    fn target_mix(&self) -> &'static [(&'static str, f64)] {
        match self {
            TimeSlot::Morning => &[
                ("novost", 0.40),
                ("admin", 0.20),
                ("kultura", 0.15),
                ("sport", 0.15),
                ("sosed", 0.10),
            ],
            TimeSlot::Afternoon => &[
                ("novost", 0.35),
                ("admin", 0.15),
                ("kultura", 0.20),
                ("sport", 0.20),
                ("sosed", 0.10),
            ],
            TimeSlot::Evening => &[
                ("novost", 0.30),
                ("admin", 0.10),
                ("kultura", 0.25),
                ("sport", 0.25),
                ("sosed", 0.10),
            ],
        }
    }
}

const DEFAULT_CATEGORY: &str = "novost";
const DEFAULT_SENTIMENT: &str = "neutral";
const NEGATIVE_REBALANCE_THRESHOLD: f64 = 0.30;
const NEGATIVE_KEEP_FRACTION: f64 = 0.20;

fn category_of(post: &Post) -> &str {
    post.ai_category.as_deref().unwrap_or(DEFAULT_CATEGORY)
}

fn sentiment_of(post: &Post) -> &str {
    post.sentiment_label.as_deref().unwrap_or(DEFAULT_SENTIMENT)
}

/// Per-category/per-sentiment histogram plus summary figures.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DigestStats {
    pub total_posts: usize,
    pub categories: HashMap<String, u32>,
    pub sentiment_distribution: HashMap<String, u32>,
    pub average_score: f64,
    pub diversity_score: f64,
}

/// Stateless mixer — every method is a pure function over its inputs,
/// plain structs with no internal state.
pub struct ContentMixer;

impl ContentMixer {
    /// Build an ordered digest of at most `max_posts` posts from
    /// `candidates`, targeting `slot`'s category mix.
    pub fn create_balanced_digest(&self, candidates: &[Post], max_posts: usize, slot: TimeSlot) -> Vec<Post> {
        if candidates.is_empty() || max_posts == 0 {
            return Vec::new();
        }

        let by_category = Self::group_by_category(candidates);
        let selected = Self::select_by_mix(&by_category, slot.target_mix(), max_posts);
        let balanced = Self::balance_sentiment(selected);
        Self::optimize_order(balanced)
    }

    fn group_by_category(posts: &[Post]) -> HashMap<&str, Vec<&Post>> {
        let mut by_category: HashMap<&str, Vec<&Post>> = HashMap::new();
        for post in posts {
            by_category.entry(category_of(post)).or_default().push(post);
        }
        for group in by_category.values_mut() {
            group.sort_by(|a, b| b.ai_score.total_cmp(&a.ai_score));
        }
        by_category
    }

    fn select_by_mix<'a>(
        by_category: &HashMap<&str, Vec<&'a Post>>,
        target_mix: &[(&str, f64)],
        max_posts: usize,
    ) -> Vec<&'a Post> {
        let mut selected: Vec<&Post> = Vec::new();
        let mut selected_ids = std::collections::HashSet::new();

        let mut ordered_mix: Vec<(&str, f64)> = target_mix.to_vec();
        ordered_mix.sort_by(|a, b| b.1.total_cmp(&a.1));

        for (category, ratio) in ordered_mix {
            let count_needed = (max_posts as f64 * ratio) as usize;
            if let Some(posts_in_category) = by_category.get(category) {
                for post in posts_in_category.iter().copied().take(count_needed) {
                    if selected_ids.insert(post.id) {
                        selected.push(post);
                    }
                }
            }
        }

        if selected.len() < max_posts {
            let mut remaining: Vec<&Post> = by_category
                .values()
                .flatten()
                .filter(|p| !selected_ids.contains(&p.id))
                .copied()
                .collect();
            remaining.sort_by(|a, b| b.ai_score.total_cmp(&a.ai_score));
            let need = max_posts - selected.len();
            for post in remaining.into_iter().take(need) {
                selected.push(post);
            }
        }

        selected.truncate(max_posts);
        selected
    }

    /// If more than 30% of the selected set is negative, keep only
    /// the top 20% (by score) negative posts and rely on the positive and
    /// neutral posts already selected to fill the rest — the vacated slots
    /// are not backfilled from a separate pool since `selected` already is
    /// the full candidate pool for this digest.
    fn balance_sentiment(selected: Vec<&Post>) -> Vec<&Post> {
        let total = selected.len();
        if total == 0 {
            return selected;
        }

        let mut positive = Vec::new();
        let mut neutral = Vec::new();
        let mut negative = Vec::new();
        for post in selected {
            match sentiment_of(post) {
                "positive" => positive.push(post),
                "negative" => negative.push(post),
                _ => neutral.push(post),
            }
        }

        let negative_pct = negative.len() as f64 / total as f64;
        if negative_pct <= NEGATIVE_REBALANCE_THRESHOLD {
            let mut all = positive;
            all.extend(neutral);
            all.extend(negative);
            return all;
        }

        negative.sort_by(|a, b| b.ai_score.total_cmp(&a.ai_score));
        let keep_count = (total as f64 * NEGATIVE_KEEP_FRACTION) as usize;
        negative.truncate(keep_count);

        let mut result = negative;
        result.extend(positive);
        result.extend(neutral);
        result
    }

    /// Start from the highest score, then greedily pick
    /// the remaining candidate that maximizes `+2` different category, `+1`
    /// different sentiment, `+ai_score/100` tiebreak.
    fn optimize_order(posts: Vec<&Post>) -> Vec<Post> {
        if posts.len() <= 2 {
            let mut sorted = posts;
            sorted.sort_by(|a, b| b.ai_score.total_cmp(&a.ai_score));
            return sorted.into_iter().cloned().collect();
        }

        let mut sorted: Vec<&Post> = posts;
        sorted.sort_by(|a, b| b.ai_score.total_cmp(&a.ai_score));

        let mut ordered: Vec<&Post> = vec![sorted[0]];
        let mut remaining: Vec<&Post> = sorted[1..].to_vec();

        while !remaining.is_empty() {
            let last = *ordered.last().unwrap();
            let (idx, _) = remaining
                .iter()
                .enumerate()
                .map(|(i, candidate)| (i, diversity_score(last, *candidate)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap();
            ordered.push(remaining.remove(idx));
        }

        ordered.into_iter().cloned().collect()
    }

    /// Category histogram, sentiment histogram, average score,
    /// diversity score (distinct categories / total).
    pub fn digest_stats(&self, posts: &[Post]) -> DigestStats {
        let mut categories: HashMap<String, u32> = HashMap::new();
        let mut sentiment_distribution: HashMap<String, u32> = HashMap::new();
        for post in posts {
            *categories.entry(category_of(post).to_string()).or_default() += 1;
            *sentiment_distribution.entry(sentiment_of(post).to_string()).or_default() += 1;
        }

        let average_score = if posts.is_empty() {
            0.0
        } else {
            posts.iter().map(|p| p.ai_score).sum::<f64>() / posts.len() as f64
        };
        let diversity_score = if posts.is_empty() {
            0.0
        } else {
            categories.len() as f64 / posts.len() as f64
        };

        DigestStats {
            total_posts: posts.len(),
            categories,
            sentiment_distribution,
            average_score: (average_score * 10.0).round() / 10.0,
            diversity_score,
        }
    }
}

fn diversity_score(reference: &Post, candidate: &Post) -> f64 {
    let mut score = 0.0;
    if category_of(candidate) != category_of(reference) {
        score += 2.0;
    }
    if sentiment_of(candidate) != sentiment_of(reference) {
        score += 1.0;
    }
    score + candidate.ai_score / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::PostStatus;

    fn post(id: i64, category: &str, score: f64, sentiment: &str) -> Post {
        Post {
            id,
            community_id: 1,
            region_id: 1,
            external_owner_id: -1,
            external_post_id: id,
            published_at: 0,
            text: format!("post {id}"),
            attachments: vec![],
            views: 0,
            likes: 0,
            reposts: 0,
            comments: 0,
            ai_category: Some(category.to_string()),
            ai_score: score,
            sentiment_label: Some(sentiment.to_string()),
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

    #[test]
    fn selects_by_mix_with_novost_majority() {
        let mut candidates = Vec::new();
        for (i, score) in (79..=90).rev().enumerate() {
            candidates.push(post(i as i64, "novost", score as f64, "positive"));
        }
        for (i, score) in [88, 87, 86, 85].into_iter().enumerate() {
            candidates.push(post(100 + i as i64, "sport", score as f64, "positive"));
        }
        for (i, score) in [87, 86].into_iter().enumerate() {
            candidates.push(post(200 + i as i64, "kultura", score as f64, "positive"));
        }
        for (i, score) in [84, 83].into_iter().enumerate() {
            candidates.push(post(300 + i as i64, "admin", score as f64, "positive"));
        }

        let mixer = ContentMixer;
        let digest = mixer.create_balanced_digest(&candidates, 10, TimeSlot::Afternoon);
        assert_eq!(digest.len(), 10);

        let novost_count = digest.iter().filter(|p| category_of(p) == "novost").count();
        assert!((3..=4).contains(&novost_count));
        assert_eq!(category_of(&digest[0]), "novost");
        assert_eq!(digest[0].ai_score, 90.0);
    }

    #[test]
    fn rebalances_excess_negative_sentiment_when_enough_backfill_exists() {
        let negatives: Vec<Post> = (0..10).map(|i| post(i, "novost", 80.0 - i as f64, "negative")).collect();
        let positives: Vec<Post> = (10..30).map(|i| post(i, "admin", 70.0, "positive")).collect();

        let mut selected: Vec<&Post> = negatives.iter().collect();
        selected.extend(positives.iter());

        let total = selected.len();
        let balanced = ContentMixer::balance_sentiment(selected);
        assert!(balanced.len() <= total);
        let negative_count = balanced.iter().filter(|p| sentiment_of(p) == "negative").count();
        assert!((negative_count as f64 / balanced.len() as f64) <= NEGATIVE_REBALANCE_THRESHOLD);
        assert_eq!(negative_count, 6);
    }

    #[test]
    fn digest_stats_reports_diversity_and_average() {
        let posts = vec![
            post(1, "novost", 90.0, "positive"),
            post(2, "sport", 80.0, "neutral"),
        ];
        let mixer = ContentMixer;
        let stats = mixer.digest_stats(&posts);
        assert_eq!(stats.total_posts, 2);
        assert_eq!(stats.average_score, 85.0);
        assert_eq!(stats.diversity_score, 1.0);
    }
}
