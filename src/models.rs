use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const EMOTION_CHANNELS: [&str; 6] = ["sadness", "anger", "fear", "joy", "surprise", "disgust"];

/// Six channel means + intensity + variability + one-hot healing stage.
pub const CLUSTER_VECTOR_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct EmotionObservation {
    pub user_id: Uuid,
    pub sadness: f64,
    pub anger: f64,
    pub fear: f64,
    pub joy: f64,
    pub surprise: f64,
    pub disgust: f64,
    pub observed_at: DateTime<Utc>,
}

impl EmotionObservation {
    pub fn channels(&self) -> [f64; 6] {
        [
            self.sadness,
            self.anger,
            self.fear,
            self.joy,
            self.surprise,
            self.disgust,
        ]
    }

    pub fn peak_intensity(&self) -> f64 {
        self.channels().iter().copied().fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealingStage {
    Early,
    Processing,
    Integration,
    Growth,
}

impl HealingStage {
    pub const ALL: [HealingStage; 4] = [
        HealingStage::Early,
        HealingStage::Processing,
        HealingStage::Integration,
        HealingStage::Growth,
    ];

    pub fn ordinal(self) -> usize {
        match self {
            HealingStage::Early => 0,
            HealingStage::Processing => 1,
            HealingStage::Integration => 2,
            HealingStage::Growth => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealingStage::Early => "early",
            HealingStage::Processing => "processing",
            HealingStage::Integration => "integration",
            HealingStage::Growth => "growth",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "early" => Some(HealingStage::Early),
            "processing" => Some(HealingStage::Processing),
            "integration" => Some(HealingStage::Integration),
            "growth" => Some(HealingStage::Growth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserClusterProfile {
    pub user_id: Uuid,
    pub dominant_emotions: BTreeMap<String, f64>,
    pub emotion_intensity: f64,
    pub emotion_variability: f64,
    pub trauma_themes: Vec<String>,
    pub healing_stage: HealingStage,
    pub coping_patterns: Vec<String>,
    pub communication_style: Option<String>,
    pub support_preference: Option<String>,
    pub activity_level: Option<String>,
    pub cluster_vector: Vec<f64>,
    pub cluster_confidence: f64,
    pub last_clustered_at: DateTime<Utc>,
}

impl UserClusterProfile {
    /// Channel means in the fixed channel order; absent channels read as 0.
    pub fn emotion_means(&self) -> [f64; 6] {
        let mut means = [0.0; 6];
        for (i, channel) in EMOTION_CHANNELS.iter().enumerate() {
            means[i] = self.dominant_emotions.get(*channel).copied().unwrap_or(0.0);
        }
        means
    }
}

#[derive(Debug, Clone)]
pub struct Group {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub name: String,
    pub emotional_pattern: BTreeMap<String, f64>,
    pub trauma_themes: Vec<String>,
    pub healing_stage: HealingStage,
    pub member_count: i32,
    pub activity_score: f64,
    pub cohesion_score: f64,
    pub growth_potential: f64,
    pub confidence_score: f64,
    pub max_members: i32,
    pub is_active: bool,
    pub requires_approval: bool,
    pub last_ai_review: Option<DateTime<Utc>>,
    pub next_ai_review: Option<DateTime<Utc>>,
}

impl Group {
    /// Pattern means expanded to the fixed channel order; channels outside the
    /// stored top-5 pattern read as 0.
    pub fn pattern_means(&self) -> [f64; 6] {
        let mut means = [0.0; 6];
        for (i, channel) in EMOTION_CHANNELS.iter().enumerate() {
            means[i] = self.emotional_pattern.get(*channel).copied().unwrap_or(0.0);
        }
        means
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleStatus {
    Active,
    Paused,
    Closed,
}

impl CircleStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CircleStatus::Active => "active",
            CircleStatus::Paused => "paused",
            CircleStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(CircleStatus::Active),
            "paused" => Some(CircleStatus::Paused),
            "closed" => Some(CircleStatus::Closed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Circle {
    pub id: Uuid,
    pub shared_wound_group_id: Uuid,
    pub name: String,
    pub max_members: i32,
    pub status: CircleStatus,
    pub is_private: bool,
    pub requires_invitation: bool,
}

#[derive(Debug, Clone)]
pub struct CircleMembership {
    pub id: Uuid,
    pub circle_id: Uuid,
    pub user_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_active_at: Option<DateTime<Utc>>,
    pub message_count: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub groups_created: usize,
    pub groups_updated: usize,
    pub groups_merged: usize,
    pub groups_split: usize,
    pub groups_archived: usize,
    pub users_reassigned: usize,
    pub timestamp: DateTime<Utc>,
}

impl RunSummary {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            groups_created: 0,
            groups_updated: 0,
            groups_merged: 0,
            groups_split: 0,
            groups_archived: 0,
            users_reassigned: 0,
            timestamp,
        }
    }
}
