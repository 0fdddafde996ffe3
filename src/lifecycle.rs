//! Group lifecycle decisions: materializing clusters as groups, periodic
//! review (keep / archive / shed outliers / split), and the merge pass.
//! Everything here is pure; the engine applies the decisions transactionally.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::clustering::run_clustering;
use crate::config::EngineConfig;
use crate::models::{CircleMembership, Group, HealingStage, UserClusterProfile, EMOTION_CHANNELS};
use crate::similarity::{cosine_similarity, group_confidence, group_pair_similarity};

/// Channels kept in a group's stored emotional pattern.
const PATTERN_TOP_K: usize = 5;
/// Weight of the recently-active member ratio vs. message volume.
const ACTIVITY_RECENCY_WEIGHT: f64 = 0.6;
/// Message count at which a member's volume contribution saturates.
const ACTIVITY_VOLUME_CAP: f64 = 50.0;
/// At most this fraction of a group is shed as outliers in one review.
const OUTLIER_FRACTION: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct GroupDraft {
    pub cluster_id: Uuid,
    pub name: String,
    pub emotional_pattern: BTreeMap<String, f64>,
    pub trauma_themes: Vec<String>,
    pub healing_stage: HealingStage,
    pub confidence_score: f64,
    pub member_ids: Vec<Uuid>,
}

#[derive(Debug, Clone)]
pub struct GroupScores {
    pub member_count: i32,
    pub activity_score: f64,
    pub cohesion_score: f64,
    pub growth_potential: f64,
}

#[derive(Debug, Clone)]
pub enum ReviewAction {
    Keep,
    Archive,
    ShedOutliers { user_ids: Vec<Uuid> },
    Split { retained: GroupDraft, spinoffs: Vec<GroupDraft> },
}

#[derive(Debug, Clone)]
pub struct ReviewPlan {
    pub scores: GroupScores,
    pub action: ReviewAction,
}

pub fn next_review(now: DateTime<Utc>, cfg: &EngineConfig) -> DateTime<Utc> {
    now + Duration::days(cfg.review_interval_days.max(1))
}

/// Materialize a candidate cluster as a group draft. `None` when the cluster
/// is too small or its confidence falls short; its members simply stay
/// unassigned until the next cycle.
pub fn draft_group(profiles: &[&UserClusterProfile], cfg: &EngineConfig) -> Option<GroupDraft> {
    if profiles.len() < cfg.min_group_size {
        return None;
    }
    let draft = aggregate_draft(profiles, cfg);
    if draft.confidence_score < cfg.confidence_threshold {
        return None;
    }
    Some(draft)
}

/// Summarize a member set without the confidence gate. Split spinoffs use
/// this directly: a split partitions an already-accepted group.
pub fn aggregate_draft(profiles: &[&UserClusterProfile], cfg: &EngineConfig) -> GroupDraft {
    let n = profiles.len() as f64;

    let mut channel_sums = [0.0f64; 6];
    for profile in profiles {
        for (i, value) in profile.emotion_means().iter().enumerate() {
            channel_sums[i] += value;
        }
    }
    let mut ranked: Vec<(usize, f64)> = channel_sums
        .iter()
        .map(|sum| sum / n)
        .enumerate()
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut emotional_pattern = BTreeMap::new();
    for (channel_idx, mean) in ranked.into_iter().take(PATTERN_TOP_K) {
        emotional_pattern.insert(EMOTION_CHANNELS[channel_idx].to_string(), mean);
    }

    let mut theme_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for profile in profiles {
        for theme in &profile.trauma_themes {
            *theme_counts.entry(theme.as_str()).or_insert(0) += 1;
        }
    }
    let trauma_themes: Vec<String> = theme_counts
        .into_iter()
        .filter(|&(_, count)| count as f64 / n >= cfg.theme_frequency)
        .map(|(theme, _)| theme.to_string())
        .collect();

    let healing_stage = plurality_stage(profiles);

    let vectors: Vec<&[f64]> = profiles.iter().map(|p| p.cluster_vector.as_slice()).collect();
    let confidence_score = group_confidence(&vectors);

    let cluster_id = content_cluster_id(&emotional_pattern, &trauma_themes, healing_stage);
    let name = group_name(&trauma_themes, &emotional_pattern, healing_stage);

    let mut member_ids: Vec<Uuid> = profiles.iter().map(|p| p.user_id).collect();
    member_ids.sort();

    GroupDraft {
        cluster_id,
        name,
        emotional_pattern,
        trauma_themes,
        healing_stage,
        confidence_score,
        member_ids,
    }
}

fn plurality_stage(profiles: &[&UserClusterProfile]) -> HealingStage {
    let mut counts = [0usize; 4];
    for profile in profiles {
        counts[profile.healing_stage.ordinal()] += 1;
    }
    let mut best = HealingStage::Early;
    let mut best_count = 0;
    for stage in HealingStage::ALL {
        if counts[stage.ordinal()] > best_count {
            best_count = counts[stage.ordinal()];
            best = stage;
        }
    }
    best
}

/// Content-derived id: identical defining characteristics always map to the
/// same UUID, so re-running creation against an unchanged population is a
/// no-op at the storage layer.
pub fn content_cluster_id(
    pattern: &BTreeMap<String, f64>,
    themes: &[String],
    stage: HealingStage,
) -> Uuid {
    let mut canonical = String::new();
    for (channel, mean) in pattern {
        canonical.push_str(channel);
        canonical.push(':');
        canonical.push_str(&format!("{:.2}", mean));
        canonical.push('|');
    }
    canonical.push(';');
    for theme in themes {
        canonical.push_str(theme);
        canonical.push('|');
    }
    canonical.push(';');
    canonical.push_str(stage.as_str());
    Uuid::new_v5(&Uuid::NAMESPACE_OID, canonical.as_bytes())
}

fn title_case(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut start = true;
    for ch in value.chars() {
        if ch == '_' || ch == '-' || ch == ' ' {
            out.push(' ');
            start = true;
        } else if start {
            out.extend(ch.to_uppercase());
            start = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn stage_label(stage: HealingStage) -> &'static str {
    match stage {
        HealingStage::Early => "Early Days",
        HealingStage::Processing => "Processing",
        HealingStage::Integration => "Integration",
        HealingStage::Growth => "Growth",
    }
}

fn group_name(
    themes: &[String],
    pattern: &BTreeMap<String, f64>,
    stage: HealingStage,
) -> String {
    if let Some(theme) = themes.first() {
        return format!("{} ({})", title_case(theme), stage_label(stage));
    }
    let dominant = pattern
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(channel, _)| channel.as_str())
        .unwrap_or("support");
    format!("Shared {} ({})", title_case(dominant), stage_label(stage))
}

/// Recompute a group's bookkeeping scores from its current members.
pub fn score_group(
    group: &Group,
    member_profiles: &[&UserClusterProfile],
    memberships: &[CircleMembership],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> GroupScores {
    let member_count = memberships.len() as i32;

    let activity_score = if memberships.is_empty() {
        0.0
    } else {
        let recency_cutoff = now - Duration::days(cfg.review_interval_days.max(1));
        let recent = memberships
            .iter()
            .filter(|m| m.last_active_at.map(|t| t >= recency_cutoff).unwrap_or(false))
            .count() as f64;
        let recent_ratio = recent / memberships.len() as f64;
        let mean_messages = memberships
            .iter()
            .map(|m| m.message_count as f64)
            .sum::<f64>()
            / memberships.len() as f64;
        let volume = (mean_messages / ACTIVITY_VOLUME_CAP).min(1.0);
        ACTIVITY_RECENCY_WEIGHT * recent_ratio + (1.0 - ACTIVITY_RECENCY_WEIGHT) * volume
    };

    let vectors: Vec<&[f64]> = member_profiles
        .iter()
        .map(|p| p.cluster_vector.as_slice())
        .collect();
    let cohesion_score = group_confidence(&vectors);

    let headroom = if group.max_members > 0 {
        (1.0 - member_count as f64 / group.max_members as f64).max(0.0)
    } else {
        0.0
    };
    let growth_potential =
        (0.5 * headroom + 0.3 * activity_score + 0.2 * cohesion_score).clamp(0.0, 1.0);

    GroupScores {
        member_count,
        activity_score,
        cohesion_score,
        growth_potential,
    }
}

/// One review cycle for one group. Branch order follows the lifecycle rules:
/// low cohesion is handled before oversize, and a failed split attempt keeps
/// the group as-is until the next cycle.
pub fn review_group(
    group: &Group,
    member_profiles: &[&UserClusterProfile],
    memberships: &[CircleMembership],
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> ReviewPlan {
    let scores = score_group(group, member_profiles, memberships, cfg, now);

    if scores.cohesion_score < cfg.cohesion_threshold {
        if (scores.member_count as usize) < cfg.min_group_size {
            return ReviewPlan {
                scores,
                action: ReviewAction::Archive,
            };
        }
        let user_ids = outlier_members(member_profiles, cfg);
        if !user_ids.is_empty() {
            return ReviewPlan {
                scores,
                action: ReviewAction::ShedOutliers { user_ids },
            };
        }
        return ReviewPlan {
            scores,
            action: ReviewAction::Keep,
        };
    }

    if scores.member_count > group.max_members {
        if let Some((retained, spinoffs)) = plan_split(member_profiles, cfg) {
            return ReviewPlan {
                scores,
                action: ReviewAction::Split { retained, spinoffs },
            };
        }
    }

    ReviewPlan {
        scores,
        action: ReviewAction::Keep,
    }
}

/// Members whose mean similarity to the rest of the group falls under the
/// cohesion threshold, least similar first, capped so one review never sheds
/// more than a fifth of the group.
fn outlier_members(member_profiles: &[&UserClusterProfile], cfg: &EngineConfig) -> Vec<Uuid> {
    let n = member_profiles.len();
    if n < 2 {
        return Vec::new();
    }
    let mut scored: Vec<(Uuid, f64)> = member_profiles
        .iter()
        .enumerate()
        .map(|(i, profile)| {
            let mean = member_profiles
                .iter()
                .enumerate()
                .filter(|(j, _)| *j != i)
                .map(|(_, other)| {
                    cosine_similarity(&profile.cluster_vector, &other.cluster_vector)
                })
                .sum::<f64>()
                / (n - 1) as f64;
            (profile.user_id, mean)
        })
        .collect();
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

    let cap = ((n as f64 * OUTLIER_FRACTION).floor() as usize).max(1);
    scored
        .into_iter()
        .filter(|(_, mean)| *mean < cfg.cohesion_threshold)
        .take(cap)
        .map(|(user_id, _)| user_id)
        .collect()
}

/// Re-cluster an oversize group's members alone. At least two valid
/// sub-clusters are required for a split; the first keeps the existing group
/// record, the rest become new groups. Members landing in no valid
/// sub-cluster stay with the retained part so nobody is lost.
fn plan_split(
    member_profiles: &[&UserClusterProfile],
    cfg: &EngineConfig,
) -> Option<(GroupDraft, Vec<GroupDraft>)> {
    let vectors: Vec<Vec<f64>> = member_profiles
        .iter()
        .map(|p| p.cluster_vector.clone())
        .collect();
    let run = run_clustering(&vectors, cfg.algorithm, cfg.min_group_size);
    if run.clusters.len() < 2 {
        return None;
    }

    let mut retained_members: Vec<&UserClusterProfile> = run.clusters[0]
        .iter()
        .map(|&i| member_profiles[i])
        .collect();
    // leftovers (noise or undersized sub-clusters) stay with the retained part
    for (i, assignment) in run.assignments.iter().enumerate() {
        if assignment.is_none() {
            retained_members.push(member_profiles[i]);
        }
    }

    let retained = aggregate_draft(&retained_members, cfg);
    let spinoffs: Vec<GroupDraft> = run.clusters[1..]
        .iter()
        .map(|cluster| {
            let members: Vec<&UserClusterProfile> =
                cluster.iter().map(|&i| member_profiles[i]).collect();
            aggregate_draft(&members, cfg)
        })
        .collect();

    Some((retained, spinoffs))
}

/// Pair up active groups whose stored patterns are near-duplicates. Greedy,
/// each group in at most one pair per cycle, and only when the union fits
/// under the size cap. The larger side absorbs the smaller.
pub fn plan_merges(groups: &[Group], cfg: &EngineConfig) -> Vec<(Uuid, Uuid)> {
    let mut taken = vec![false; groups.len()];
    let mut pairs = Vec::new();

    for i in 0..groups.len() {
        if taken[i] {
            continue;
        }
        for j in (i + 1)..groups.len() {
            if taken[j] {
                continue;
            }
            if groups[i].member_count + groups[j].member_count > cfg.max_group_size {
                continue;
            }
            if group_pair_similarity(&groups[i], &groups[j]) >= cfg.merge_threshold {
                let (absorbing, absorbed) = if groups[j].member_count > groups[i].member_count {
                    (groups[j].id, groups[i].id)
                } else {
                    (groups[i].id, groups[j].id)
                };
                pairs.push((absorbing, absorbed));
                taken[i] = true;
                taken[j] = true;
                break;
            }
        }
    }

    pairs
}
