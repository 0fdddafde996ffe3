use std::collections::BTreeMap;

use anyhow::Context;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Row};
use uuid::Uuid;

use crate::circles::CircleDraft;
use crate::config::EngineConfig;
use crate::lifecycle::{GroupDraft, GroupScores};
use crate::models::{
    Circle, CircleMembership, CircleStatus, EmotionObservation, Group, HealingStage,
    UserClusterProfile,
};

/// Fixed key for the batch-run advisory lock; two concurrent `run` invocations
/// against the same database must never interleave.
const BATCH_LOCK_KEY: i64 = 0x574e_4443_4952;

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn try_batch_lock(conn: &mut PgConnection) -> anyhow::Result<bool> {
    let row = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
        .bind(BATCH_LOCK_KEY)
        .fetch_one(conn)
        .await?;
    Ok(row.get("locked"))
}

pub async fn release_batch_lock(conn: &mut PgConnection) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(BATCH_LOCK_KEY)
        .execute(conn)
        .await?;
    Ok(())
}

// ── Observations and themes ───────────────────────────────

pub async fn fetch_observations(
    pool: &PgPool,
    user_id: Uuid,
    since: DateTime<Utc>,
) -> anyhow::Result<Vec<EmotionObservation>> {
    let rows = sqlx::query(
        "SELECT user_id, sadness, anger, fear, joy, surprise, disgust, observed_at \
         FROM wound_circles.emotion_observations \
         WHERE user_id = $1 AND observed_at >= $2 \
         ORDER BY observed_at",
    )
    .bind(user_id)
    .bind(since)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| EmotionObservation {
            user_id: row.get("user_id"),
            sadness: row.get("sadness"),
            anger: row.get("anger"),
            fear: row.get("fear"),
            joy: row.get("joy"),
            surprise: row.get("surprise"),
            disgust: row.get("disgust"),
            observed_at: row.get("observed_at"),
        })
        .collect())
}

pub async fn fetch_user_themes(pool: &PgPool, user_id: Uuid) -> anyhow::Result<Vec<String>> {
    let rows = sqlx::query(
        "SELECT DISTINCT theme FROM wound_circles.user_themes WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.get("theme")).collect())
}

/// Users with enough observations in the window whose profile is missing or
/// older than the refresh cutoff.
pub async fn refresh_candidates(
    pool: &PgPool,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<Uuid>> {
    let window_start = now - Duration::days(cfg.observation_window_days.max(1));
    let stale_cutoff = now - Duration::days(cfg.profile_refresh_days.max(1));
    let rows = sqlx::query(
        "SELECT o.user_id \
         FROM wound_circles.emotion_observations o \
         LEFT JOIN wound_circles.cluster_profiles p ON p.user_id = o.user_id \
         WHERE o.observed_at >= $1 \
         GROUP BY o.user_id, p.last_clustered_at \
         HAVING COUNT(*) >= $2 \
            AND (p.last_clustered_at IS NULL OR p.last_clustered_at < $3)",
    )
    .bind(window_start)
    .bind(cfg.min_observations as i64)
    .bind(stale_cutoff)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|row| row.get("user_id")).collect())
}

// ── Profiles ──────────────────────────────────────────────

fn row_to_profile(row: &sqlx::postgres::PgRow) -> anyhow::Result<UserClusterProfile> {
    let dominant_emotions: BTreeMap<String, f64> =
        serde_json::from_value(row.get("dominant_emotions"))
            .context("malformed dominant_emotions")?;
    let trauma_themes: Vec<String> =
        serde_json::from_value(row.get("trauma_themes")).context("malformed trauma_themes")?;
    let coping_patterns: Vec<String> =
        serde_json::from_value(row.get("coping_patterns")).context("malformed coping_patterns")?;
    let cluster_vector: Vec<f64> =
        serde_json::from_value(row.get("cluster_vector")).context("malformed cluster_vector")?;
    let stage: String = row.get("healing_stage");
    let healing_stage = HealingStage::parse(&stage)
        .with_context(|| format!("unknown healing_stage {stage:?}"))?;

    Ok(UserClusterProfile {
        user_id: row.get("user_id"),
        dominant_emotions,
        emotion_intensity: row.get("emotion_intensity"),
        emotion_variability: row.get("emotion_variability"),
        trauma_themes,
        healing_stage,
        coping_patterns,
        communication_style: row.get("communication_style"),
        support_preference: row.get("support_preference"),
        activity_level: row.get("activity_level"),
        cluster_vector,
        cluster_confidence: row.get("cluster_confidence"),
        last_clustered_at: row.get("last_clustered_at"),
    })
}

const PROFILE_COLUMNS: &str = "user_id, dominant_emotions, emotion_intensity, \
    emotion_variability, trauma_themes, healing_stage, coping_patterns, \
    communication_style, support_preference, activity_level, cluster_vector, \
    cluster_confidence, last_clustered_at";

pub async fn upsert_profile(pool: &PgPool, profile: &UserClusterProfile) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO wound_circles.cluster_profiles \
         (user_id, dominant_emotions, emotion_intensity, emotion_variability, \
          trauma_themes, healing_stage, coping_patterns, communication_style, \
          support_preference, activity_level, cluster_vector, cluster_confidence, \
          last_clustered_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
         ON CONFLICT (user_id) DO UPDATE SET \
           dominant_emotions = EXCLUDED.dominant_emotions, \
           emotion_intensity = EXCLUDED.emotion_intensity, \
           emotion_variability = EXCLUDED.emotion_variability, \
           trauma_themes = EXCLUDED.trauma_themes, \
           healing_stage = EXCLUDED.healing_stage, \
           coping_patterns = EXCLUDED.coping_patterns, \
           communication_style = EXCLUDED.communication_style, \
           support_preference = EXCLUDED.support_preference, \
           activity_level = EXCLUDED.activity_level, \
           cluster_vector = EXCLUDED.cluster_vector, \
           cluster_confidence = EXCLUDED.cluster_confidence, \
           last_clustered_at = EXCLUDED.last_clustered_at",
    )
    .bind(profile.user_id)
    .bind(serde_json::to_value(&profile.dominant_emotions)?)
    .bind(profile.emotion_intensity)
    .bind(profile.emotion_variability)
    .bind(serde_json::to_value(&profile.trauma_themes)?)
    .bind(profile.healing_stage.as_str())
    .bind(serde_json::to_value(&profile.coping_patterns)?)
    .bind(&profile.communication_style)
    .bind(&profile.support_preference)
    .bind(&profile.activity_level)
    .bind(serde_json::to_value(&profile.cluster_vector)?)
    .bind(profile.cluster_confidence)
    .bind(profile.last_clustered_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_profile_confidence(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
    confidence: f64,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE wound_circles.cluster_profiles SET cluster_confidence = $2 \
         WHERE user_id = ANY($1)",
    )
    .bind(user_ids)
    .bind(confidence)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn fetch_profile(
    pool: &PgPool,
    user_id: Uuid,
) -> anyhow::Result<Option<UserClusterProfile>> {
    let row = sqlx::query(&format!(
        "SELECT {PROFILE_COLUMNS} FROM wound_circles.cluster_profiles WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?;
    row.as_ref().map(row_to_profile).transpose()
}

/// Profiles of users with no active circle membership under an active group.
pub async fn fetch_unassigned_profiles(pool: &PgPool) -> anyhow::Result<Vec<UserClusterProfile>> {
    let rows = sqlx::query(&format!(
        "SELECT {PROFILE_COLUMNS} FROM wound_circles.cluster_profiles p \
         WHERE NOT EXISTS ( \
             SELECT 1 FROM wound_circles.circle_memberships m \
             JOIN wound_circles.circles c ON c.id = m.circle_id \
             JOIN wound_circles.wound_groups g ON g.id = c.shared_wound_group_id \
             WHERE m.user_id = p.user_id \
               AND m.status = 'active' \
               AND c.status = 'active' \
               AND g.is_active)"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_profile).collect()
}

pub async fn fetch_profiles_for(
    conn: &mut PgConnection,
    user_ids: &[Uuid],
) -> anyhow::Result<Vec<UserClusterProfile>> {
    let rows = sqlx::query(&format!(
        "SELECT {PROFILE_COLUMNS} FROM wound_circles.cluster_profiles WHERE user_id = ANY($1)"
    ))
    .bind(user_ids)
    .fetch_all(conn)
    .await?;
    rows.iter().map(row_to_profile).collect()
}

// ── Groups ────────────────────────────────────────────────

fn row_to_group(row: &sqlx::postgres::PgRow) -> anyhow::Result<Group> {
    let emotional_pattern: BTreeMap<String, f64> =
        serde_json::from_value(row.get("emotional_pattern"))
            .context("malformed emotional_pattern")?;
    let trauma_themes: Vec<String> =
        serde_json::from_value(row.get("trauma_themes")).context("malformed trauma_themes")?;
    let stage: String = row.get("healing_stage");
    let healing_stage = HealingStage::parse(&stage)
        .with_context(|| format!("unknown healing_stage {stage:?}"))?;

    Ok(Group {
        id: row.get("id"),
        cluster_id: row.get("cluster_id"),
        name: row.get("name"),
        emotional_pattern,
        trauma_themes,
        healing_stage,
        member_count: row.get("member_count"),
        activity_score: row.get("activity_score"),
        cohesion_score: row.get("cohesion_score"),
        growth_potential: row.get("growth_potential"),
        confidence_score: row.get("confidence_score"),
        max_members: row.get("max_members"),
        is_active: row.get("is_active"),
        requires_approval: row.get("requires_approval"),
        last_ai_review: row.get("last_ai_review"),
        next_ai_review: row.get("next_ai_review"),
    })
}

const GROUP_COLUMNS: &str = "id, cluster_id, name, emotional_pattern, trauma_themes, \
    healing_stage, member_count, activity_score, cohesion_score, growth_potential, \
    confidence_score, max_members, is_active, requires_approval, last_ai_review, \
    next_ai_review";

pub async fn fetch_active_groups(pool: &PgPool) -> anyhow::Result<Vec<Group>> {
    let rows = sqlx::query(&format!(
        "SELECT {GROUP_COLUMNS} FROM wound_circles.wound_groups WHERE is_active ORDER BY name"
    ))
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_group).collect()
}

pub async fn fetch_group(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> anyhow::Result<Option<Group>> {
    let row = sqlx::query(&format!(
        "SELECT {GROUP_COLUMNS} FROM wound_circles.wound_groups WHERE id = $1"
    ))
    .bind(group_id)
    .fetch_optional(conn)
    .await?;
    row.as_ref().map(row_to_group).transpose()
}

pub async fn fetch_due_groups(pool: &PgPool, now: DateTime<Utc>) -> anyhow::Result<Vec<Group>> {
    let rows = sqlx::query(&format!(
        "SELECT {GROUP_COLUMNS} FROM wound_circles.wound_groups \
         WHERE is_active AND (next_ai_review IS NULL OR next_ai_review <= $1) \
         ORDER BY next_ai_review NULLS FIRST"
    ))
    .bind(now)
    .fetch_all(pool)
    .await?;
    rows.iter().map(row_to_group).collect()
}

pub async fn group_exists(conn: &mut PgConnection, cluster_id: Uuid) -> anyhow::Result<bool> {
    let row = sqlx::query(
        "SELECT EXISTS(SELECT 1 FROM wound_circles.wound_groups WHERE cluster_id = $1) AS found",
    )
    .bind(cluster_id)
    .fetch_one(conn)
    .await?;
    Ok(row.get("found"))
}

pub async fn insert_group(
    conn: &mut PgConnection,
    draft: &GroupDraft,
    cfg: &EngineConfig,
    now: DateTime<Utc>,
    next_review: DateTime<Utc>,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO wound_circles.wound_groups \
         (id, cluster_id, name, emotional_pattern, trauma_themes, healing_stage, \
          member_count, activity_score, cohesion_score, growth_potential, \
          confidence_score, max_members, is_active, requires_approval, \
          last_ai_review, next_ai_review) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8, 0.5, $8, $9, TRUE, FALSE, $10, $11)",
    )
    .bind(id)
    .bind(draft.cluster_id)
    .bind(&draft.name)
    .bind(serde_json::to_value(&draft.emotional_pattern)?)
    .bind(serde_json::to_value(&draft.trauma_themes)?)
    .bind(draft.healing_stage.as_str())
    .bind(draft.member_ids.len() as i32)
    .bind(draft.confidence_score)
    .bind(cfg.max_group_size)
    .bind(now)
    .bind(next_review)
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn update_group_review(
    conn: &mut PgConnection,
    group_id: Uuid,
    scores: &GroupScores,
    now: DateTime<Utc>,
    next_review: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE wound_circles.wound_groups SET \
           member_count = $2, activity_score = $3, cohesion_score = $4, \
           growth_potential = $5, last_ai_review = $6, next_ai_review = $7 \
         WHERE id = $1",
    )
    .bind(group_id)
    .bind(scores.member_count)
    .bind(scores.activity_score)
    .bind(scores.cohesion_score)
    .bind(scores.growth_potential)
    .bind(now)
    .bind(next_review)
    .execute(conn)
    .await?;
    Ok(())
}

/// Rewrite a group's aggregate summary after a split reshapes its membership.
pub async fn update_group_summary(
    conn: &mut PgConnection,
    group_id: Uuid,
    draft: &GroupDraft,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE wound_circles.wound_groups SET \
           emotional_pattern = $2, trauma_themes = $3, healing_stage = $4, \
           confidence_score = $5 \
         WHERE id = $1",
    )
    .bind(group_id)
    .bind(serde_json::to_value(&draft.emotional_pattern)?)
    .bind(serde_json::to_value(&draft.trauma_themes)?)
    .bind(draft.healing_stage.as_str())
    .bind(draft.confidence_score)
    .execute(conn)
    .await?;
    Ok(())
}

/// Terminal: deactivate the group and cascade closure to its circles.
pub async fn archive_group(conn: &mut PgConnection, group_id: Uuid) -> anyhow::Result<()> {
    sqlx::query("UPDATE wound_circles.wound_groups SET is_active = FALSE WHERE id = $1")
        .bind(group_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query(
        "UPDATE wound_circles.circles SET status = 'closed' WHERE shared_wound_group_id = $1",
    )
    .bind(group_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Keep the stored member_count equal to the live active-membership count.
pub async fn sync_member_count(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> anyhow::Result<i32> {
    let row = sqlx::query(
        "UPDATE wound_circles.wound_groups g SET member_count = ( \
             SELECT COUNT(*) FROM wound_circles.circle_memberships m \
             JOIN wound_circles.circles c ON c.id = m.circle_id \
             WHERE c.shared_wound_group_id = g.id \
               AND m.status = 'active' AND c.status = 'active') \
         WHERE g.id = $1 \
         RETURNING member_count",
    )
    .bind(group_id)
    .fetch_one(conn)
    .await?;
    Ok(row.get("member_count"))
}

// ── Circles and memberships ───────────────────────────────

pub async fn fetch_group_memberships(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> anyhow::Result<Vec<CircleMembership>> {
    let rows = sqlx::query(
        "SELECT m.id, m.circle_id, m.user_id, m.joined_at, m.last_active_at, m.message_count \
         FROM wound_circles.circle_memberships m \
         JOIN wound_circles.circles c ON c.id = m.circle_id \
         WHERE c.shared_wound_group_id = $1 \
           AND m.status = 'active' AND c.status = 'active'",
    )
    .bind(group_id)
    .fetch_all(conn)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| CircleMembership {
            id: row.get("id"),
            circle_id: row.get("circle_id"),
            user_id: row.get("user_id"),
            joined_at: row.get("joined_at"),
            last_active_at: row.get("last_active_at"),
            message_count: row.get("message_count"),
        })
        .collect())
}

pub async fn count_active_circles(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> anyhow::Result<i64> {
    let row = sqlx::query(
        "SELECT COUNT(*) AS circle_count FROM wound_circles.circles \
         WHERE shared_wound_group_id = $1 AND status = 'active'",
    )
    .bind(group_id)
    .fetch_one(conn)
    .await?;
    Ok(row.get("circle_count"))
}

pub async fn fetch_group_circles(pool: &PgPool, group_id: Uuid) -> anyhow::Result<Vec<Circle>> {
    let rows = sqlx::query(
        "SELECT id, shared_wound_group_id, name, max_members, status, is_private, \
                requires_invitation \
         FROM wound_circles.circles WHERE shared_wound_group_id = $1 \
         ORDER BY name",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let status: String = row.get("status");
            let status = CircleStatus::parse(&status)
                .with_context(|| format!("unknown circle status {status:?}"))?;
            Ok(Circle {
                id: row.get("id"),
                shared_wound_group_id: row.get("shared_wound_group_id"),
                name: row.get("name"),
                max_members: row.get("max_members"),
                status,
                is_private: row.get("is_private"),
                requires_invitation: row.get("requires_invitation"),
            })
        })
        .collect()
}

pub async fn fetch_active_circle_counts(
    pool: &PgPool,
) -> anyhow::Result<Vec<(Uuid, i64)>> {
    let rows = sqlx::query(
        "SELECT shared_wound_group_id, COUNT(*) AS circle_count \
         FROM wound_circles.circles WHERE status = 'active' \
         GROUP BY shared_wound_group_id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.get("shared_wound_group_id"), row.get("circle_count")))
        .collect())
}

pub async fn insert_circle(
    conn: &mut PgConnection,
    draft: &CircleDraft,
) -> anyhow::Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO wound_circles.circles \
         (id, shared_wound_group_id, name, max_members, status, is_private, requires_invitation) \
         VALUES ($1, $2, $3, $4, $5, $6, $7)",
    )
    .bind(id)
    .bind(draft.shared_wound_group_id)
    .bind(&draft.name)
    .bind(draft.max_members)
    .bind(CircleStatus::Active.as_str())
    .bind(draft.is_private)
    .bind(draft.requires_invitation)
    .execute(conn)
    .await?;
    Ok(id)
}

pub async fn insert_membership(
    conn: &mut PgConnection,
    circle_id: Uuid,
    user_id: Uuid,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO wound_circles.circle_memberships \
         (id, circle_id, user_id, status, joined_at) \
         VALUES ($1, $2, $3, 'active', $4) \
         ON CONFLICT (circle_id, user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(circle_id)
    .bind(user_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// An active circle in the group with room for one more member.
pub async fn find_open_circle(
    conn: &mut PgConnection,
    group_id: Uuid,
) -> anyhow::Result<Option<Uuid>> {
    let row = sqlx::query(
        "SELECT c.id FROM wound_circles.circles c \
         LEFT JOIN wound_circles.circle_memberships m \
           ON m.circle_id = c.id AND m.status = 'active' \
         WHERE c.shared_wound_group_id = $1 AND c.status = 'active' \
         GROUP BY c.id, c.max_members \
         HAVING COUNT(m.id) < c.max_members \
         ORDER BY COUNT(m.id) \
         LIMIT 1",
    )
    .bind(group_id)
    .fetch_optional(conn)
    .await?;
    Ok(row.map(|r| r.get("id")))
}

/// Move a user's active membership out of `from_group` into another circle.
pub async fn move_user_to_circle(
    conn: &mut PgConnection,
    user_id: Uuid,
    from_group: Uuid,
    to_circle: Uuid,
) -> anyhow::Result<()> {
    sqlx::query(
        "UPDATE wound_circles.circle_memberships SET circle_id = $3 \
         WHERE user_id = $1 AND status = 'active' AND circle_id IN ( \
             SELECT id FROM wound_circles.circles WHERE shared_wound_group_id = $2)",
    )
    .bind(user_id)
    .bind(from_group)
    .bind(to_circle)
    .execute(conn)
    .await?;
    Ok(())
}

// ── Seed and import ───────────────────────────────────────

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    // six grief-heavy users that should cluster together, plus three spread
    // profiles that should stay noise
    let grief_users = [
        "3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2",
        "0c22f1f1-9184-4fd4-9b21-28c68a6a89dc",
        "d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2",
        "7a1b9c3d-5e6f-4a8b-9c0d-1e2f3a4b5c6d",
        "8b2c0d4e-6f7a-4b9c-8d1e-2f3a4b5c6d7e",
        "9c3d1e5f-7a8b-4c0d-9e2f-3a4b5c6d7e8f",
    ];
    let outlier_users = [
        "1d4e2f6a-8b9c-4d1e-8f3a-4b5c6d7e8f9a",
        "2e5f3a7b-9c0d-4e2f-9a4b-5c6d7e8f9a0b",
        "3f6a4b8c-0d1e-4f3a-8b5c-6d7e8f9a0b1c",
    ];
    let now = Utc::now();

    for (u, user) in grief_users.iter().enumerate() {
        let user_id = Uuid::parse_str(user)?;
        for i in 0..6i64 {
            let wobble = ((u + i as usize) % 3) as f64 * 0.02;
            sqlx::query(
                "INSERT INTO wound_circles.emotion_observations \
                 (id, user_id, sadness, anger, fear, joy, surprise, disgust, observed_at, source_key) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (source_key) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(0.72 + wobble)
            .bind(0.18)
            .bind(0.45 + wobble)
            .bind(0.08)
            .bind(0.12)
            .bind(0.2)
            .bind(now - Duration::days(i * 4))
            .bind(format!("seed-{user}-{i}"))
            .execute(pool)
            .await?;
        }
        for theme in ["loss", "grief"] {
            sqlx::query(
                "INSERT INTO wound_circles.user_themes (user_id, theme, source) \
                 VALUES ($1, $2, 'life_event') ON CONFLICT DO NOTHING",
            )
            .bind(user_id)
            .bind(theme)
            .execute(pool)
            .await?;
        }
    }

    for (u, user) in outlier_users.iter().enumerate() {
        let user_id = Uuid::parse_str(user)?;
        for i in 0..6i64 {
            let mut channels = [0.1f64; 6];
            channels[(u + 2) % 6] = 0.85;
            sqlx::query(
                "INSERT INTO wound_circles.emotion_observations \
                 (id, user_id, sadness, anger, fear, joy, surprise, disgust, observed_at, source_key) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
                 ON CONFLICT (source_key) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(user_id)
            .bind(channels[0])
            .bind(channels[1])
            .bind(channels[2])
            .bind(channels[3])
            .bind(channels[4])
            .bind(channels[5])
            .bind(now - Duration::days(i * 4))
            .bind(format!("seed-{user}-{i}"))
            .execute(pool)
            .await?;
        }
    }

    Ok(())
}

pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        user_id: Uuid,
        sadness: f64,
        anger: f64,
        fear: f64,
        joy: f64,
        surprise: f64,
        disgust: f64,
        observed_at: DateTime<Utc>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", Uuid::new_v4()));

        let outcome = sqlx::query(
            "INSERT INTO wound_circles.emotion_observations \
             (id, user_id, sadness, anger, fear, joy, surprise, disgust, observed_at, source_key) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (source_key) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(row.user_id)
        .bind(row.sadness)
        .bind(row.anger)
        .bind(row.fear)
        .bind(row.joy)
        .bind(row.surprise)
        .bind(row.disgust)
        .bind(row.observed_at)
        .bind(source_key)
        .execute(pool)
        .await?;

        if outcome.rows_affected() > 0 {
            inserted += 1;
        }
    }

    Ok(inserted)
}
