use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::{
    EmotionObservation, HealingStage, UserClusterProfile, CLUSTER_VECTOR_LEN, EMOTION_CHANNELS,
};

pub fn window_start(now: DateTime<Utc>, cfg: &EngineConfig) -> DateTime<Utc> {
    now - Duration::days(cfg.observation_window_days.max(1))
}

/// Build a cluster profile from one user's observation history.
///
/// Returns `None` when fewer than `min_observations` observations fall inside
/// the trailing window. That is the insufficient-data case, not an error; the
/// caller simply skips the user this cycle.
pub fn build_profile(
    user_id: Uuid,
    observations: &[EmotionObservation],
    themes: &[String],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> Option<UserClusterProfile> {
    let cutoff = window_start(now, cfg);
    let mut windowed: Vec<&EmotionObservation> = observations
        .iter()
        .filter(|o| o.observed_at >= cutoff)
        .collect();
    if windowed.len() < cfg.min_observations {
        return None;
    }
    windowed.sort_by_key(|o| o.observed_at);

    let mut channel_sums = [0.0f64; 6];
    let mut peaks = Vec::with_capacity(windowed.len());
    for obs in &windowed {
        for (i, value) in obs.channels().iter().enumerate() {
            channel_sums[i] += value;
        }
        peaks.push(obs.peak_intensity());
    }

    let n = windowed.len() as f64;
    let mut dominant_emotions = BTreeMap::new();
    let mut means = [0.0f64; 6];
    for (i, channel) in EMOTION_CHANNELS.iter().enumerate() {
        means[i] = channel_sums[i] / n;
        dominant_emotions.insert((*channel).to_string(), means[i]);
    }

    let emotion_intensity = peaks.iter().sum::<f64>() / n;
    let emotion_variability = population_std(&peaks, emotion_intensity);
    let healing_stage = derive_healing_stage(&peaks);

    let mut trauma_themes: Vec<String> = themes.to_vec();
    trauma_themes.sort();
    trauma_themes.dedup();

    let cluster_vector = build_cluster_vector(
        &means,
        emotion_intensity,
        emotion_variability,
        healing_stage,
    );

    let span_days = (windowed[windowed.len() - 1].observed_at - windowed[0].observed_at)
        .num_days()
        .max(1) as f64;
    let per_week = windowed.len() as f64 / (span_days / 7.0);

    Some(UserClusterProfile {
        user_id,
        dominant_emotions,
        emotion_intensity,
        emotion_variability,
        trauma_themes,
        healing_stage,
        coping_patterns: derive_coping_patterns(emotion_variability, healing_stage),
        communication_style: Some(communication_style(emotion_variability).to_string()),
        support_preference: Some(support_preference(&means).to_string()),
        activity_level: Some(activity_level(per_week).to_string()),
        cluster_vector,
        cluster_confidence: 0.0,
        last_clustered_at: now,
    })
}

/// Fixed layout: six channel means, intensity, variability, one-hot stage.
/// The order is a contract; any reordering breaks vector comparability.
pub fn build_cluster_vector(
    means: &[f64; 6],
    intensity: f64,
    variability: f64,
    stage: HealingStage,
) -> Vec<f64> {
    let mut vector = Vec::with_capacity(CLUSTER_VECTOR_LEN);
    vector.extend_from_slice(means);
    vector.push(intensity);
    vector.push(variability);
    for candidate in HealingStage::ALL {
        vector.push(if candidate == stage { 1.0 } else { 0.0 });
    }
    vector
}

/// Map the intensity trend onto the stage ladder: high recent distress reads
/// as early, a clear decline with low residual as growth, a mild decline as
/// integration, everything else as processing. Thresholds are policy, and any
/// monotonic decreasing-distress mapping would satisfy the same intent.
pub fn derive_healing_stage(peaks: &[f64]) -> HealingStage {
    match peaks {
        [] => return HealingStage::Early,
        [only] => {
            return if *only > 0.7 {
                HealingStage::Early
            } else {
                HealingStage::Processing
            }
        }
        _ => {}
    }
    let mid = (peaks.len() / 2).max(1);
    let (earlier, recent) = peaks.split_at(mid);
    let earlier_mean = earlier.iter().sum::<f64>() / earlier.len() as f64;
    let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
    let trend = recent_mean - earlier_mean;

    if recent_mean > 0.7 {
        HealingStage::Early
    } else if trend <= -0.15 && recent_mean < 0.4 {
        HealingStage::Growth
    } else if trend < 0.0 {
        HealingStage::Integration
    } else {
        HealingStage::Processing
    }
}

fn population_std(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance =
        values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

fn derive_coping_patterns(variability: f64, stage: HealingStage) -> Vec<String> {
    let mut patterns = Vec::new();
    if variability < 0.1 {
        patterns.push("steady-regulation".to_string());
    }
    if matches!(stage, HealingStage::Integration | HealingStage::Growth) {
        patterns.push("recovery-oriented".to_string());
    }
    patterns
}

fn communication_style(variability: f64) -> &'static str {
    if variability >= 0.25 {
        "expressive"
    } else {
        "measured"
    }
}

fn support_preference(means: &[f64; 6]) -> &'static str {
    let top = means
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);
    match EMOTION_CHANNELS[top] {
        "sadness" => "validation",
        "anger" => "space",
        "fear" => "grounding",
        "joy" => "celebration",
        _ => "listening",
    }
}

fn activity_level(observations_per_week: f64) -> &'static str {
    if observations_per_week >= 5.0 {
        "high"
    } else if observations_per_week >= 2.0 {
        "moderate"
    } else {
        "low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(days_ago: i64, channels: [f64; 6]) -> EmotionObservation {
        EmotionObservation {
            user_id: Uuid::new_v4(),
            sadness: channels[0],
            anger: channels[1],
            fear: channels[2],
            joy: channels[3],
            surprise: channels[4],
            disgust: channels[5],
            observed_at: Utc::now() - Duration::days(days_ago),
        }
    }

    fn flat_series(count: usize, level: f64) -> Vec<EmotionObservation> {
        (0..count)
            .map(|i| observation(i as i64, [level, 0.1, 0.1, 0.1, 0.1, 0.1]))
            .collect()
    }

    #[test]
    fn too_few_observations_yields_none() {
        let cfg = EngineConfig::default();
        let observations = flat_series(4, 0.5);
        let profile = build_profile(Uuid::new_v4(), &observations, &[], &cfg, Utc::now());
        assert!(profile.is_none());
    }

    #[test]
    fn observations_outside_window_do_not_count() {
        let cfg = EngineConfig::default();
        let mut observations = flat_series(4, 0.5);
        observations.push(observation(45, [0.9, 0.1, 0.1, 0.1, 0.1, 0.1]));
        let profile = build_profile(Uuid::new_v4(), &observations, &[], &cfg, Utc::now());
        assert!(profile.is_none());
    }

    #[test]
    fn vector_layout_is_fixed_and_deterministic() {
        let cfg = EngineConfig::default();
        let observations = flat_series(6, 0.5);
        let themes = vec!["loss".to_string()];
        let now = Utc::now();
        let a = build_profile(Uuid::new_v4(), &observations, &themes, &cfg, now).unwrap();
        let b = build_profile(Uuid::new_v4(), &observations, &themes, &cfg, now).unwrap();

        assert_eq!(a.cluster_vector.len(), CLUSTER_VECTOR_LEN);
        assert_eq!(a.cluster_vector, b.cluster_vector);
        // channel means occupy the first six slots in channel order
        assert!((a.cluster_vector[0] - 0.5).abs() < 1e-9);
        // one-hot stage occupies the last four slots
        let one_hot: f64 = a.cluster_vector[8..].iter().sum();
        assert!((one_hot - 1.0).abs() < 1e-9);
        assert!((a.cluster_vector[8 + a.healing_stage.ordinal()] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn intensity_and_variability_come_from_peaks() {
        let cfg = EngineConfig::default();
        let observations = vec![
            observation(0, [0.8, 0.1, 0.1, 0.1, 0.1, 0.1]),
            observation(1, [0.1, 0.6, 0.1, 0.1, 0.1, 0.1]),
            observation(2, [0.1, 0.1, 0.7, 0.1, 0.1, 0.1]),
            observation(3, [0.5, 0.1, 0.1, 0.1, 0.1, 0.1]),
            observation(4, [0.4, 0.1, 0.1, 0.1, 0.1, 0.1]),
        ];
        let profile = build_profile(Uuid::new_v4(), &observations, &[], &cfg, Utc::now()).unwrap();
        let expected_mean = (0.8 + 0.6 + 0.7 + 0.5 + 0.4) / 5.0;
        assert!((profile.emotion_intensity - expected_mean).abs() < 1e-9);
        assert!(profile.emotion_variability > 0.0);
    }

    #[test]
    fn themes_are_deduplicated_and_sorted() {
        let cfg = EngineConfig::default();
        let observations = flat_series(5, 0.5);
        let themes = vec![
            "loss".to_string(),
            "abandonment".to_string(),
            "loss".to_string(),
        ];
        let profile = build_profile(Uuid::new_v4(), &observations, &themes, &cfg, Utc::now()).unwrap();
        assert_eq!(profile.trauma_themes, vec!["abandonment", "loss"]);
    }

    #[test]
    fn high_recent_intensity_maps_to_early() {
        let peaks = vec![0.8, 0.85, 0.9, 0.85, 0.8, 0.9];
        assert_eq!(derive_healing_stage(&peaks), HealingStage::Early);
    }

    #[test]
    fn declining_intensity_with_low_residual_maps_to_growth() {
        let peaks = vec![0.7, 0.65, 0.6, 0.3, 0.25, 0.2];
        assert_eq!(derive_healing_stage(&peaks), HealingStage::Growth);
    }

    #[test]
    fn mild_decline_maps_to_integration() {
        let peaks = vec![0.55, 0.55, 0.55, 0.5, 0.5, 0.5];
        assert_eq!(derive_healing_stage(&peaks), HealingStage::Integration);
    }

    #[test]
    fn flat_moderate_intensity_maps_to_processing() {
        let peaks = vec![0.5, 0.5, 0.5, 0.5, 0.55, 0.5];
        assert_eq!(derive_healing_stage(&peaks), HealingStage::Processing);
    }
}
