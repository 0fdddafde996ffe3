use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ClusterAlgorithm {
    Density,
    Hierarchical,
    Centroid,
}

/// Every tunable policy constant in one place, passed explicitly to the
/// functions that need it. Defaults mirror the platform's grouping policy;
/// none of them are load-bearing for correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum observations before a profile can be built.
    pub min_observations: usize,
    /// Trailing window over emotion observations, in days.
    pub observation_window_days: i64,
    /// A profile older than this is stale and gets rebuilt.
    pub profile_refresh_days: i64,
    /// Smallest cluster that can become a group.
    pub min_group_size: usize,
    /// Members above this trigger a split attempt at review.
    pub max_group_size: i32,
    /// Minimum group_confidence for a cluster to materialize as a group.
    pub confidence_threshold: f64,
    /// Cohesion below this puts a group on the archive/reassign path.
    pub cohesion_threshold: f64,
    /// A theme must appear in this fraction of members to label the group.
    pub theme_frequency: f64,
    /// Days between automatic reviews of a group.
    pub review_interval_days: i64,
    /// Members-per-circle divisor when sizing circle capacity.
    pub circle_target_size: i32,
    /// Hard capacity of a newly created circle.
    pub circle_capacity: i32,
    /// Pattern similarity at which two active groups merge.
    pub merge_threshold: f64,
    /// Minimum similarity an outlier needs against a target group to move.
    pub outlier_reassign_threshold: f64,
    pub algorithm: ClusterAlgorithm,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_observations: 5,
            observation_window_days: 30,
            profile_refresh_days: 7,
            min_group_size: 5,
            max_group_size: 50,
            confidence_threshold: 0.6,
            cohesion_threshold: 0.4,
            theme_frequency: 0.3,
            review_interval_days: 7,
            circle_target_size: 7,
            circle_capacity: 8,
            merge_threshold: 0.85,
            outlier_reassign_threshold: 0.65,
            algorithm: ClusterAlgorithm::Density,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.min_group_size, 5);
        assert_eq!(cfg.max_group_size, 50);
        assert!((cfg.confidence_threshold - 0.6).abs() < 1e-9);
        assert!((cfg.cohesion_threshold - 0.4).abs() < 1e-9);
        assert!((cfg.theme_frequency - 0.3).abs() < 1e-9);
        assert_eq!(cfg.review_interval_days, 7);
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = EngineConfig {
            algorithm: ClusterAlgorithm::Centroid,
            ..EngineConfig::default()
        };
        let json = serde_json::to_string(&cfg).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.algorithm, ClusterAlgorithm::Centroid);
        assert_eq!(back.min_observations, cfg.min_observations);
    }
}
