//! Face attribute types

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Dominant facial emotion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Disgust,
    Fear,
    Happy,
    Sad,
    Surprise,
    Neutral,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Angry,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Surprise,
        Emotion::Neutral,
    ];

    /// Get string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Disgust => "disgust",
            Emotion::Fear => "fear",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Surprise => "surprise",
            Emotion::Neutral => "neutral",
        }
    }

    /// Sentiment bucket used for the satisfaction score
    pub fn category(&self) -> EmotionCategory {
        match self {
            Emotion::Happy | Emotion::Surprise => EmotionCategory::Positive,
            Emotion::Angry | Emotion::Sad => EmotionCategory::Negative,
            Emotion::Neutral | Emotion::Disgust | Emotion::Fear => EmotionCategory::Neutral,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Emotion::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == lower)
            .ok_or_else(|| format!("Unknown emotion: {}", s))
    }
}

/// Emotion sentiment bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionCategory {
    Positive,
    Negative,
    Neutral,
}

impl EmotionCategory {
    /// Numeric score: 1 positive, 0 neutral, -1 negative
    pub fn score(&self) -> i8 {
        match self {
            EmotionCategory::Positive => 1,
            EmotionCategory::Neutral => 0,
            EmotionCategory::Negative => -1,
        }
    }
}

/// Apparent gender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    Man,
    Woman,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Man => "Man",
            Gender::Woman => "Woman",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which attributes to compute for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisActions {
    pub emotion: bool,
    pub age: bool,
    pub gender: bool,
}

impl AnalysisActions {
    /// Emotion plus demographics
    pub const ALL: AnalysisActions = AnalysisActions {
        emotion: true,
        age: true,
        gender: true,
    };

    /// Emotion only, once demographics are cached
    pub const EMOTION_ONLY: AnalysisActions = AnalysisActions {
        emotion: true,
        age: false,
        gender: false,
    };

    /// Whether age or gender is requested
    pub fn includes_demographics(&self) -> bool {
        self.age || self.gender
    }
}

impl Default for AnalysisActions {
    fn default() -> Self {
        Self::ALL
    }
}

/// Attributes returned by the external analysis call for the first face found
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSet {
    pub emotion: Emotion,
    /// Dominant emotion score (0.0 to 1.0)
    pub emotion_confidence: f32,
    pub age: Option<u32>,
    pub gender: Option<Gender>,
    /// Gender score (0.0 to 100.0)
    pub gender_confidence: Option<f32>,
}

impl AttributeSet {
    /// Emotion-only attributes
    pub fn emotion(emotion: Emotion, emotion_confidence: f32) -> Self {
        Self {
            emotion,
            emotion_confidence,
            age: None,
            gender: None,
            gender_confidence: None,
        }
    }

    /// Drop attributes that were not requested
    pub fn restricted_to(mut self, actions: AnalysisActions) -> Self {
        if !actions.age {
            self.age = None;
        }
        if !actions.gender {
            self.gender = None;
            self.gender_confidence = None;
        }
        self
    }
}
