use crate::models::{Group, HealingStage, UserClusterProfile};

/// Per-channel weights in the fixed channel order. Fear carries the most
/// grouping signal, joy the least; both sides of a comparison are weighted
/// identically so self-similarity stays at 1.
pub const EMOTION_WEIGHTS: [f64; 6] = [1.1, 1.0, 1.3, 0.6, 0.8, 0.9];

/// Blend weights for `group_similarity`. Policy constants; stable within a
/// deployment so match rankings are reproducible.
const EMOTION_WEIGHT: f64 = 0.4;
const THEME_WEIGHT: f64 = 0.3;
const STAGE_WEIGHT: f64 = 0.2;
const BASE_AFFINITY: f64 = 0.1;

pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let len = a.len().min(b.len());
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for i in 0..len {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }
    if norm_a <= 0.0 || norm_b <= 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// Weighted cosine over the six channel means, clamped to be non-negative.
pub fn emotion_similarity(a: &[f64; 6], b: &[f64; 6]) -> f64 {
    let mut wa = [0.0; 6];
    let mut wb = [0.0; 6];
    for i in 0..6 {
        wa[i] = a[i] * EMOTION_WEIGHTS[i];
        wb[i] = b[i] * EMOTION_WEIGHTS[i];
    }
    cosine_similarity(&wa, &wb).max(0.0)
}

/// Jaccard index over theme tags; empty sets share nothing.
pub fn theme_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let set_a: std::collections::HashSet<&str> = a.iter().map(String::as_str).collect();
    let set_b: std::collections::HashSet<&str> = b.iter().map(String::as_str).collect();
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f64 / union as f64
}

pub fn stage_adjacency(a: HealingStage, b: HealingStage) -> f64 {
    let gap = a.ordinal().abs_diff(b.ordinal());
    match gap {
        0 => 1.0,
        1 => 0.5,
        _ => 0.0,
    }
}

/// How well a user fits an existing group, in [0,1].
pub fn group_similarity(profile: &UserClusterProfile, group: &Group) -> f64 {
    let emotion = emotion_similarity(&profile.emotion_means(), &group.pattern_means());
    let themes = theme_similarity(&profile.trauma_themes, &group.trauma_themes);
    let stage = stage_adjacency(profile.healing_stage, group.healing_stage);
    (EMOTION_WEIGHT * emotion + THEME_WEIGHT * themes + STAGE_WEIGHT * stage + BASE_AFFINITY)
        .clamp(0.0, 1.0)
}

/// Pattern-level similarity between two groups, used by the merge pass.
pub fn group_pair_similarity(a: &Group, b: &Group) -> f64 {
    let emotion = emotion_similarity(&a.pattern_means(), &b.pattern_means());
    let themes = theme_similarity(&a.trauma_themes, &b.trauma_themes);
    let stage = stage_adjacency(a.healing_stage, b.healing_stage);
    (EMOTION_WEIGHT * emotion + THEME_WEIGHT * themes + STAGE_WEIGHT * stage + BASE_AFFINITY)
        .clamp(0.0, 1.0)
}

/// Mean pairwise cosine over raw cluster vectors plus a small size bonus.
/// Undefined below two profiles, reported as 0.
pub fn group_confidence(vectors: &[&[f64]]) -> f64 {
    let n = vectors.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..n {
        for j in (i + 1)..n {
            total += cosine_similarity(vectors[i], vectors[j]);
            pairs += 1;
        }
    }
    let mean = total / pairs as f64;
    let size_bonus = ((n - 2) as f64 * 0.02).min(0.1);
    (mean + size_bonus).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::profile::build_cluster_vector;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn profile_with(means: [f64; 6], themes: &[&str], stage: HealingStage) -> UserClusterProfile {
        let mut dominant_emotions = BTreeMap::new();
        for (i, channel) in crate::models::EMOTION_CHANNELS.iter().enumerate() {
            dominant_emotions.insert((*channel).to_string(), means[i]);
        }
        UserClusterProfile {
            user_id: Uuid::new_v4(),
            dominant_emotions,
            emotion_intensity: 0.5,
            emotion_variability: 0.1,
            trauma_themes: themes.iter().map(|t| t.to_string()).collect(),
            healing_stage: stage,
            coping_patterns: Vec::new(),
            communication_style: None,
            support_preference: None,
            activity_level: None,
            cluster_vector: build_cluster_vector(&means, 0.5, 0.1, stage),
            cluster_confidence: 0.0,
            last_clustered_at: Utc::now(),
        }
    }

    fn group_with(means: [f64; 6], themes: &[&str], stage: HealingStage) -> Group {
        let mut emotional_pattern = BTreeMap::new();
        for (i, channel) in crate::models::EMOTION_CHANNELS.iter().enumerate() {
            emotional_pattern.insert((*channel).to_string(), means[i]);
        }
        let cfg = EngineConfig::default();
        Group {
            id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            name: "test".to_string(),
            emotional_pattern,
            trauma_themes: themes.iter().map(|t| t.to_string()).collect(),
            healing_stage: stage,
            member_count: 6,
            activity_score: 0.5,
            cohesion_score: 0.7,
            growth_potential: 0.5,
            confidence_score: 0.7,
            max_members: cfg.max_group_size,
            is_active: true,
            requires_approval: false,
            last_ai_review: None,
            next_ai_review: None,
        }
    }

    #[test]
    fn emotion_similarity_is_one_for_identical_nonzero_vectors() {
        let a = [0.6, 0.2, 0.7, 0.1, 0.2, 0.3];
        assert!((emotion_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn emotion_similarity_is_symmetric() {
        let a = [0.6, 0.2, 0.7, 0.1, 0.2, 0.3];
        let b = [0.1, 0.5, 0.2, 0.6, 0.1, 0.1];
        assert!((emotion_similarity(&a, &b) - emotion_similarity(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn zero_vector_yields_zero_similarity() {
        let zero = [0.0; 6];
        let a = [0.6, 0.2, 0.7, 0.1, 0.2, 0.3];
        assert_eq!(emotion_similarity(&zero, &a), 0.0);
    }

    #[test]
    fn theme_similarity_is_jaccard() {
        let a = vec!["loss".to_string(), "abandonment".to_string()];
        let b = vec!["loss".to_string(), "betrayal".to_string()];
        assert!((theme_similarity(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_theme_set_yields_zero() {
        let a: Vec<String> = Vec::new();
        let b = vec!["loss".to_string()];
        assert_eq!(theme_similarity(&a, &b), 0.0);
        assert_eq!(theme_similarity(&b, &a), 0.0);
    }

    #[test]
    fn stage_adjacency_tiers() {
        assert_eq!(
            stage_adjacency(HealingStage::Early, HealingStage::Early),
            1.0
        );
        assert_eq!(
            stage_adjacency(HealingStage::Early, HealingStage::Processing),
            0.5
        );
        assert_eq!(
            stage_adjacency(HealingStage::Early, HealingStage::Growth),
            0.0
        );
    }

    #[test]
    fn group_similarity_stays_in_unit_interval() {
        let means = [0.6, 0.2, 0.7, 0.1, 0.2, 0.3];
        let profile = profile_with(means, &["loss"], HealingStage::Processing);
        let group = group_with(means, &["loss"], HealingStage::Processing);
        let sim = group_similarity(&profile, &group);
        assert!(sim > 0.9);
        assert!(sim <= 1.0);

        let far_group = group_with(
            [0.0, 0.0, 0.0, 0.9, 0.1, 0.0],
            &["career"],
            HealingStage::Growth,
        );
        let far = group_similarity(&profile, &far_group);
        assert!((0.0..=1.0).contains(&far));
        assert!(far < sim);
    }

    #[test]
    fn group_confidence_undefined_below_two_profiles() {
        let v = build_cluster_vector(
            &[0.5, 0.2, 0.3, 0.1, 0.1, 0.1],
            0.5,
            0.1,
            HealingStage::Processing,
        );
        assert_eq!(group_confidence(&[]), 0.0);
        assert_eq!(group_confidence(&[&v]), 0.0);
    }

    #[test]
    fn group_confidence_bounded_for_similar_profiles() {
        let v1 = build_cluster_vector(
            &[0.5, 0.2, 0.3, 0.1, 0.1, 0.1],
            0.5,
            0.1,
            HealingStage::Processing,
        );
        let v2 = build_cluster_vector(
            &[0.52, 0.19, 0.31, 0.1, 0.1, 0.1],
            0.52,
            0.11,
            HealingStage::Processing,
        );
        let v3 = build_cluster_vector(
            &[0.48, 0.21, 0.29, 0.1, 0.1, 0.1],
            0.49,
            0.09,
            HealingStage::Processing,
        );
        let confidence = group_confidence(&[&v1, &v2, &v3]);
        assert!(confidence > 0.8);
        assert!(confidence <= 1.0);
    }
}
