use std::collections::HashMap;
use std::fmt::Write;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Group, HealingStage};

pub struct StageSummary {
    pub stage: HealingStage,
    pub group_count: usize,
    pub member_count: i64,
}

pub fn summarize_by_stage(groups: &[Group]) -> Vec<StageSummary> {
    let mut summaries: Vec<StageSummary> = HealingStage::ALL
        .iter()
        .map(|&stage| StageSummary {
            stage,
            group_count: 0,
            member_count: 0,
        })
        .collect();

    for group in groups {
        let entry = &mut summaries[group.healing_stage.ordinal()];
        entry.group_count += 1;
        entry.member_count += group.member_count as i64;
    }

    summaries.retain(|s| s.group_count > 0);
    summaries
}

pub fn build_report(
    generated_at: DateTime<Utc>,
    groups: &[Group],
    circle_counts: &HashMap<Uuid, i64>,
) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Shared-Wound Group Report");
    let _ = writeln!(
        output,
        "Generated {} ({} active groups)",
        generated_at.format("%Y-%m-%d %H:%M UTC"),
        groups.len()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Stage Mix");

    let summaries = summarize_by_stage(groups);
    if summaries.is_empty() {
        let _ = writeln!(output, "No active groups.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} groups, {} members",
                summary.stage.as_str(),
                summary.group_count,
                summary.member_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Groups by Cohesion");

    if groups.is_empty() {
        let _ = writeln!(output, "No active groups.");
    } else {
        let mut ranked: Vec<&Group> = groups.iter().collect();
        ranked.sort_by(|a, b| {
            b.cohesion_score
                .partial_cmp(&a.cohesion_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        for group in ranked.iter().take(20) {
            let circles = circle_counts.get(&group.id).copied().unwrap_or(0);
            let _ = writeln!(
                output,
                "- {} ({} members, {} circles) cohesion {:.2}, activity {:.2}, themes: {}",
                group.name,
                group.member_count,
                circles,
                group.cohesion_score,
                group.activity_score,
                if group.trauma_themes.is_empty() {
                    "none".to_string()
                } else {
                    group.trauma_themes.join(", ")
                }
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Review Schedule");

    let mut due_soon: Vec<&Group> = groups.iter().collect();
    due_soon.sort_by_key(|g| g.next_ai_review);
    if due_soon.is_empty() {
        let _ = writeln!(output, "Nothing scheduled.");
    } else {
        for group in due_soon.iter().take(5) {
            let when = group
                .next_ai_review
                .map(|t| t.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "unscheduled".to_string());
            let _ = writeln!(output, "- {} next review {}", group.name, when);
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn group(name: &str, stage: HealingStage, members: i32, cohesion: f64) -> Group {
        Group {
            id: Uuid::new_v4(),
            cluster_id: Uuid::new_v4(),
            name: name.to_string(),
            emotional_pattern: BTreeMap::new(),
            trauma_themes: vec!["loss".to_string()],
            healing_stage: stage,
            member_count: members,
            activity_score: 0.5,
            cohesion_score: cohesion,
            growth_potential: 0.5,
            confidence_score: 0.7,
            max_members: 50,
            is_active: true,
            requires_approval: false,
            last_ai_review: None,
            next_ai_review: Some(Utc::now()),
        }
    }

    #[test]
    fn stage_summary_counts_groups_and_members() {
        let groups = vec![
            group("A", HealingStage::Processing, 6, 0.8),
            group("B", HealingStage::Processing, 8, 0.7),
            group("C", HealingStage::Growth, 5, 0.9),
        ];
        let summaries = summarize_by_stage(&groups);
        assert_eq!(summaries.len(), 2);
        let processing = summaries
            .iter()
            .find(|s| s.stage == HealingStage::Processing)
            .unwrap();
        assert_eq!(processing.group_count, 2);
        assert_eq!(processing.member_count, 14);
    }

    #[test]
    fn report_lists_groups_in_cohesion_order() {
        let groups = vec![
            group("Quiet Harbor (Processing)", HealingStage::Processing, 6, 0.5),
            group("Loss (Integration)", HealingStage::Integration, 8, 0.9),
        ];
        let report = build_report(Utc::now(), &groups, &HashMap::new());
        let loss = report.find("Loss (Integration)").unwrap();
        let harbor = report.find("Quiet Harbor").unwrap();
        assert!(loss < harbor);
        assert!(report.contains("# Shared-Wound Group Report"));
    }

    #[test]
    fn empty_report_still_renders_sections() {
        let report = build_report(Utc::now(), &[], &HashMap::new());
        assert!(report.contains("No active groups."));
        assert!(report.contains("## Stage Mix"));
    }
}
