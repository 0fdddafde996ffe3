use uuid::Uuid;

use crate::config::EngineConfig;
use crate::models::Group;

#[derive(Debug, Clone)]
pub struct CircleDraft {
    pub shared_wound_group_id: Uuid,
    pub name: String,
    pub max_members: i32,
    pub is_private: bool,
    pub requires_invitation: bool,
}

pub fn needed_circles(member_count: i32, cfg: &EngineConfig) -> i32 {
    (member_count / cfg.circle_target_size.max(1)).max(1)
}

pub fn circle_name(group_name: &str, index: i64) -> String {
    format!("{group_name} Circle {index}")
}

/// Circles needed to seat `member_count` members at once without breaching
/// per-circle capacity. The target-size divisor alone can undershoot (20
/// members / 7 rounds down to 2 circles of 10), so capacity wins.
pub fn seating_circles(member_count: usize, cfg: &EngineConfig) -> usize {
    let by_target = needed_circles(member_count as i32, cfg) as usize;
    let by_capacity = member_count.div_ceil(cfg.circle_capacity.max(1) as usize);
    by_target.max(by_capacity).max(1)
}

/// Circles to add so the group's conversational capacity keeps up with its
/// membership. Names continue the existing index so re-running creates
/// nothing new once capacity is met.
pub fn plan_circles(group: &Group, existing_active: i32, cfg: &EngineConfig) -> Vec<CircleDraft> {
    if !group.is_active || (group.member_count as usize) < cfg.min_group_size {
        return Vec::new();
    }
    let needed = needed_circles(group.member_count, cfg);
    if existing_active >= needed {
        return Vec::new();
    }
    (existing_active + 1..=needed)
        .map(|index| CircleDraft {
            shared_wound_group_id: group.id,
            name: circle_name(&group.name, index as i64),
            max_members: cfg.circle_capacity,
            is_private: true,
            requires_invitation: false,
        })
        .collect()
}

/// Spread members over `count` circles round-robin so no circle starts out
/// overloaded while another sits empty.
pub fn distribute_members(member_ids: &[Uuid], count: usize) -> Vec<Vec<Uuid>> {
    let count = count.max(1);
    let mut buckets: Vec<Vec<Uuid>> = vec![Vec::new(); count];
    for (i, user_id) in member_ids.iter().enumerate() {
        buckets[i % count].push(*user_id);
    }
    buckets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HealingStage;
    use std::collections::BTreeMap;

    fn group(member_count: i32, is_active: bool) -> Group {
        Group {
            id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            name: "Loss (Processing)".to_string(),
            emotional_pattern: BTreeMap::new(),
            trauma_themes: vec!["loss".to_string()],
            healing_stage: HealingStage::Processing,
            member_count,
            activity_score: 0.5,
            cohesion_score: 0.7,
            growth_potential: 0.5,
            confidence_score: 0.7,
            max_members: 50,
            is_active,
            requires_approval: false,
            last_ai_review: None,
            next_ai_review: None,
        }
    }

    #[test]
    fn small_group_still_gets_one_circle() {
        let cfg = EngineConfig::default();
        assert_eq!(needed_circles(5, &cfg), 1);
        let drafts = plan_circles(&group(5, true), 0, &cfg);
        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].name, "Loss (Processing) Circle 1");
        assert_eq!(drafts[0].max_members, 8);
        assert!(drafts[0].is_private);
        assert!(!drafts[0].requires_invitation);
    }

    #[test]
    fn capacity_scales_with_membership() {
        let cfg = EngineConfig::default();
        assert_eq!(needed_circles(14, &cfg), 2);
        assert_eq!(needed_circles(21, &cfg), 3);
        let drafts = plan_circles(&group(21, true), 1, &cfg);
        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[0].name, "Loss (Processing) Circle 2");
        assert_eq!(drafts[1].name, "Loss (Processing) Circle 3");
    }

    #[test]
    fn no_deficit_means_no_new_circles() {
        let cfg = EngineConfig::default();
        assert!(plan_circles(&group(14, true), 2, &cfg).is_empty());
    }

    #[test]
    fn inactive_or_tiny_groups_get_nothing() {
        let cfg = EngineConfig::default();
        assert!(plan_circles(&group(20, false), 0, &cfg).is_empty());
        assert!(plan_circles(&group(4, true), 0, &cfg).is_empty());
    }

    #[test]
    fn seating_respects_circle_capacity() {
        let cfg = EngineConfig::default();
        // 20 / 7 rounds down to 2 circles, but 2 circles of 8 cannot hold 20
        assert_eq!(seating_circles(20, &cfg), 3);
        assert_eq!(seating_circles(6, &cfg), 1);
        assert_eq!(seating_circles(56, &cfg), 8);
    }

    #[test]
    fn distribution_covers_everyone_evenly() {
        let members: Vec<Uuid> = (0..17).map(|_| Uuid::new_v4()).collect();
        let buckets = distribute_members(&members, 3);
        assert_eq!(buckets.len(), 3);
        let total: usize = buckets.iter().map(Vec::len).sum();
        assert_eq!(total, 17);
        assert!(buckets.iter().all(|b| b.len() >= 5 && b.len() <= 6));
    }
}
