//! Emotion summary and satisfaction score

use face_analysis::{Emotion, EmotionCategory};
use serde::{Deserialize, Serialize};

/// Category shares in percent (two decimals)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryPercentages {
    pub positive: f64,
    pub negative: f64,
    pub neutral: f64,
}

/// Category counts of an emotion history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmotionSummary {
    pub total: usize,
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
    pub percentages: CategoryPercentages,
}

impl EmotionSummary {
    pub fn from_emotions(emotions: &[Emotion]) -> Self {
        let mut summary = EmotionSummary::default();
        for emotion in emotions {
            match emotion.category() {
                EmotionCategory::Positive => summary.positive += 1,
                EmotionCategory::Negative => summary.negative += 1,
                EmotionCategory::Neutral => summary.neutral += 1,
            }
        }
        summary.total = emotions.len();

        if summary.total > 0 {
            let pct = |count: usize| round_to(count as f64 / summary.total as f64 * 100.0, 2);
            summary.percentages = CategoryPercentages {
                positive: pct(summary.positive),
                negative: pct(summary.negative),
                neutral: pct(summary.neutral),
            };
        }
        summary
    }
}

/// `baseline + (100 - baseline) * (positive share - negative share)`, one
/// decimal. Neutral emotions pull toward the baseline; 0.0 for an empty history.
pub fn satisfaction_score(emotions: &[Emotion], baseline: f64) -> f64 {
    if emotions.is_empty() {
        return 0.0;
    }

    let total = emotions.len() as f64;
    let balance: f64 = emotions
        .iter()
        .map(|e| e.category().score() as f64)
        .sum::<f64>()
        / total;

    round_to(baseline + (100.0 - baseline) * balance, 1)
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
