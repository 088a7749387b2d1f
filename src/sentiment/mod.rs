//! Keyword-count sentiment classifier: no NLU, no model weights, just
//! lexicon membership counts. The lexicon is data (`SentimentLexicon`), not
//! code, so an operator can swap it without a rebuild.

use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Emotions {
    pub joy: f64,
    pub sadness: f64,
    pub anger: f64,
    pub fear: f64,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SentimentResult {
    pub label: SentimentLabel,
    pub score: f64,
    pub emotions: Emotions,
    pub positive_hits: usize,
    pub neutral_hits: usize,
    pub negative_hits: usize,
}

pub struct SentimentLexicon {
    positive: HashSet<String>,
    negative: HashSet<String>,
    neutral: HashSet<String>,
    joy: HashSet<String>,
    sadness: HashSet<String>,
    anger: HashSet<String>,
    fear: HashSet<String>,
}

impl SentimentLexicon {
    pub fn from_words(
        positive: &[&str],
        negative: &[&str],
        neutral: &[&str],
        joy: &[&str],
        sadness: &[&str],
        anger: &[&str],
        fear: &[&str],
    ) -> Self {
        let to_set = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            positive: to_set(positive),
            negative: to_set(negative),
            neutral: to_set(neutral),
            joy: to_set(joy),
            sadness: to_set(sadness),
            anger: to_set(anger),
            fear: to_set(fear),
        }
    }

    pub fn analyze(&self, text: &str) -> SentimentResult {
        if text.is_empty() {
            return SentimentResult {
                label: SentimentLabel::Neutral,
                score: 0.5,
                emotions: Emotions::default(),
                positive_hits: 0,
                neutral_hits: 0,
                negative_hits: 0,
            };
        }

        let lower = text.to_lowercase();
        let positive_hits = count_hits(&lower, &self.positive);
        let negative_hits = count_hits(&lower, &self.negative);
        let neutral_hits = count_hits(&lower, &self.neutral);
        let total = positive_hits + negative_hits + neutral_hits;

        let (label, score) = if total == 0 {
            (SentimentLabel::Neutral, 0.5)
        } else if negative_hits > positive_hits && negative_hits > neutral_hits {
            (SentimentLabel::Negative, label_score(negative_hits, total))
        } else if positive_hits > negative_hits && positive_hits > neutral_hits {
            (SentimentLabel::Positive, label_score(positive_hits, total))
        } else {
            // Strictly-largest rule didn't pick a winner (including a genuine
            // three-way or two-way tie) — resolve to neutral.
            (SentimentLabel::Neutral, label_score(neutral_hits, total))
        };

        let emotions = self.analyze_emotions(&lower);

        SentimentResult {
            label,
            score,
            emotions,
            positive_hits,
            neutral_hits,
            negative_hits,
        }
    }

    fn analyze_emotions(&self, lower: &str) -> Emotions {
        let joy = count_hits(lower, &self.joy) as f64;
        let sadness = count_hits(lower, &self.sadness) as f64;
        let anger = count_hits(lower, &self.anger) as f64;
        let fear = count_hits(lower, &self.fear) as f64;
        let total = joy + sadness + anger + fear;

        if total == 0.0 {
            return Emotions::default();
        }

        Emotions {
            joy: joy / total,
            sadness: sadness / total,
            anger: anger / total,
            fear: fear / total,
        }
    }
}

/// Uniform scoring rule per label: `0.5 + (hits / total) * 0.5`, capped at 1.0.
fn label_score(hits: usize, total: usize) -> f64 {
    (0.5 + (hits as f64 / total as f64) * 0.5).min(1.0)
}

fn count_hits(haystack: &str, words: &HashSet<String>) -> usize {
    words.iter().filter(|w| haystack.contains(w.as_str())).count()
}

impl Default for SentimentLexicon {
    /// A small bundled Russian-language lexicon, grounded on the kind of
    /// word lists a regional-news sentiment classifier needs. Intended as a
    /// reasonable starting point; operators can supply their own with
    /// `SentimentLexicon::from_words`.
    fn default() -> Self {
        Self::from_words(
            &[
                "отлично", "замечательно", "прекрасно", "победа", "успех", "радость",
                "счастье", "праздник", "поздравляем", "награда", "открытие", "лучший",
                "помощь", "поддержка", "любовь", "дружба",
            ],
            &[
                "плохо", "ужасно", "опасно", "проблема", "трагедия", "катастрофа",
                "авария", "пожар", "погиб", "умер", "преступление", "кража",
                "болезнь", "паника", "закрыто", "отменено",
            ],
            &[
                "администрация", "правительство", "заседание", "постановление",
                "объявление", "информация", "собрание", "мероприятие", "акция",
            ],
            &["праздник", "радость", "победа", "счастье", "поздравление"],
            &["грусть", "скорбь", "траур", "утрата", "погиб"],
            &["возмущение", "протест", "скандал", "конфликт", "гнев"],
            &["опасность", "угроза", "тревога", "паника", "страх"],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_neutral_half() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("");
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.score, 0.5);
    }

    #[test]
    fn no_keyword_hits_is_neutral_half() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("the quick brown fox jumps over the lazy dog");
        assert_eq!(r.label, SentimentLabel::Neutral);
        assert_eq!(r.score, 0.5);
    }

    #[test]
    fn positive_words_win_positive() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("Отличная победа! Большой успех и радость для всех.");
        assert_eq!(r.label, SentimentLabel::Positive);
        assert!(r.score > 0.5 && r.score <= 1.0);
    }

    #[test]
    fn negative_words_win_negative() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("Страшная авария, погиб человек, трагедия и катастрофа.");
        assert_eq!(r.label, SentimentLabel::Negative);
        assert!(r.score > 0.5);
    }

    #[test]
    fn score_formula_matches_spec() {
        let lex = SentimentLexicon::default();
        // 2 positive hits among 2 total hits -> 0.5 + (2/2)*0.5 = 1.0
        let r = lex.analyze("успех и радость");
        assert_eq!(r.positive_hits, 2);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn emotions_normalize_to_one() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("праздник и победа, но также тревога и страх");
        let sum = r.emotions.joy + r.emotions.sadness + r.emotions.anger + r.emotions.fear;
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn emotions_all_zero_when_no_markers() {
        let lex = SentimentLexicon::default();
        let r = lex.analyze("администрация");
        assert_eq!(r.emotions.joy, 0.0);
        assert_eq!(r.emotions.sadness, 0.0);
        assert_eq!(r.emotions.anger, 0.0);
        assert_eq!(r.emotions.fear, 0.0);
    }
}
