//! One batch cycle: refresh stale profiles, cluster the unassigned, review
//! due groups, merge near-duplicates, top up circle capacity. Stages run in
//! that order because each feeds the next; per-entity work inside a stage is
//! isolated so one bad group never takes down the batch.

use chrono::{Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::circles::{self, CircleDraft};
use crate::clustering::run_clustering;
use crate::config::EngineConfig;
use crate::db;
use crate::lifecycle::{self, GroupDraft, ReviewAction};
use crate::models::{CircleStatus, Group, RunSummary, UserClusterProfile};
use crate::profile;
use crate::similarity::group_similarity;

pub async fn run_once(pool: &PgPool, cfg: &EngineConfig) -> anyhow::Result<RunSummary> {
    let now = Utc::now();

    // advisory lock lives on this connection for the whole run; a second
    // invocation bails out instead of interleaving with us
    let mut lock_conn = pool.acquire().await?;
    if !db::try_batch_lock(&mut lock_conn).await? {
        anyhow::bail!("another batch run is in progress; refusing to overlap");
    }

    let result = run_stages(pool, cfg, now).await;

    if let Err(error) = db::release_batch_lock(&mut lock_conn).await {
        warn!(%error, "failed to release batch advisory lock");
    }
    result
}

async fn run_stages(
    pool: &PgPool,
    cfg: &EngineConfig,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<RunSummary> {
    let mut summary = RunSummary::new(now);
    refresh_profiles(pool, cfg, now).await?;
    create_groups(pool, cfg, now, &mut summary).await?;
    review_groups(pool, cfg, now, &mut summary).await?;
    merge_groups(pool, cfg, &mut summary).await?;
    top_up_circles(pool, cfg).await?;
    info!(
        groups_created = summary.groups_created,
        groups_updated = summary.groups_updated,
        groups_merged = summary.groups_merged,
        groups_split = summary.groups_split,
        groups_archived = summary.groups_archived,
        users_reassigned = summary.users_reassigned,
        "batch cycle complete"
    );
    Ok(summary)
}

// ── Stage 1: profile refresh ──────────────────────────────

async fn refresh_profiles(
    pool: &PgPool,
    cfg: &EngineConfig,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let candidates = db::refresh_candidates(pool, cfg, now).await?;
    info!(count = candidates.len(), "refreshing stale cluster profiles");
    for user_id in candidates {
        if let Err(error) = refresh_one(pool, cfg, user_id, now).await {
            warn!(%user_id, %error, "profile refresh failed; skipping user");
        }
    }
    Ok(())
}

async fn refresh_one(
    pool: &PgPool,
    cfg: &EngineConfig,
    user_id: Uuid,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let observations =
        db::fetch_observations(pool, user_id, profile::window_start(now, cfg)).await?;
    let themes = db::fetch_user_themes(pool, user_id).await?;
    match profile::build_profile(user_id, &observations, &themes, cfg, now) {
        Some(built) => db::upsert_profile(pool, &built).await,
        // insufficient data is a skip, not an error
        None => Ok(()),
    }
}

// ── Stage 2: clustering and group creation ────────────────

async fn create_groups(
    pool: &PgPool,
    cfg: &EngineConfig,
    now: chrono::DateTime<Utc>,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let profiles = db::fetch_unassigned_profiles(pool).await?;
    if profiles.len() < cfg.min_group_size {
        info!(
            unassigned = profiles.len(),
            "not enough unassigned profiles to cluster"
        );
        return Ok(());
    }

    let vectors: Vec<Vec<f64>> = profiles.iter().map(|p| p.cluster_vector.clone()).collect();
    let run = run_clustering(&vectors, cfg.algorithm, cfg.min_group_size);
    info!(
        unassigned = profiles.len(),
        clusters = run.clusters.len(),
        discarded = run.discarded_clusters,
        silhouette = run.silhouette,
        calinski_harabasz = run.calinski_harabasz,
        algorithm = ?run.algorithm,
        "clustered unassigned profiles"
    );

    for cluster in &run.clusters {
        let members: Vec<&UserClusterProfile> = cluster.iter().map(|&i| &profiles[i]).collect();
        let Some(draft) = lifecycle::draft_group(&members, cfg) else {
            continue;
        };
        match materialize_group(pool, cfg, &draft, now).await {
            Ok(true) => summary.groups_created += 1,
            Ok(false) => {}
            Err(error) => {
                warn!(cluster_id = %draft.cluster_id, %error, "group creation failed; skipping");
            }
        }
    }
    Ok(())
}

/// Create one group with its circles and memberships in a single transaction.
/// Returns false when an identical group (same content-derived cluster_id)
/// already exists.
async fn materialize_group(
    pool: &PgPool,
    cfg: &EngineConfig,
    draft: &GroupDraft,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<bool> {
    let mut tx = pool.begin().await?;
    if db::group_exists(&mut *tx, draft.cluster_id).await? {
        tx.rollback().await?;
        return Ok(false);
    }

    let group_id = db::insert_group(
        &mut *tx,
        draft,
        cfg,
        now,
        lifecycle::next_review(now, cfg),
    )
    .await?;
    seat_members(&mut *tx, cfg, group_id, &draft.name, &draft.member_ids, now).await?;
    db::set_profile_confidence(&mut *tx, &draft.member_ids, draft.confidence_score).await?;
    db::sync_member_count(&mut *tx, group_id).await?;
    tx.commit().await?;

    info!(%group_id, name = %draft.name, members = draft.member_ids.len(), "created group");
    Ok(true)
}

/// Create circles sized for the member list and seat everyone round-robin.
async fn seat_members(
    conn: &mut PgConnection,
    cfg: &EngineConfig,
    group_id: Uuid,
    group_name: &str,
    member_ids: &[Uuid],
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<()> {
    let circle_count = circles::seating_circles(member_ids.len(), cfg);
    for (index, seat) in circles::distribute_members(member_ids, circle_count)
        .iter()
        .enumerate()
    {
        let circle_id = db::insert_circle(
            conn,
            &CircleDraft {
                shared_wound_group_id: group_id,
                name: circles::circle_name(group_name, index as i64 + 1),
                max_members: cfg.circle_capacity,
                is_private: true,
                requires_invitation: false,
            },
        )
        .await?;
        for user_id in seat {
            db::insert_membership(conn, circle_id, *user_id, now).await?;
        }
    }
    Ok(())
}

// ── Stage 3: group review ─────────────────────────────────

#[derive(Default)]
struct ReviewEffect {
    updated: bool,
    archived: bool,
    splits: usize,
    spinoffs: usize,
    reassigned: usize,
}

async fn review_groups(
    pool: &PgPool,
    cfg: &EngineConfig,
    now: chrono::DateTime<Utc>,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let due = db::fetch_due_groups(pool, now).await?;
    info!(count = due.len(), "reviewing due groups");
    for group in due {
        // each review is its own unit of work; a failure leaves the group due
        // for the next cycle and the rest of the batch untouched
        match review_one(pool, cfg, &group, now).await {
            Ok(effect) => {
                if effect.updated {
                    summary.groups_updated += 1;
                }
                if effect.archived {
                    summary.groups_archived += 1;
                }
                summary.groups_split += effect.splits;
                summary.groups_created += effect.spinoffs;
                summary.users_reassigned += effect.reassigned;
            }
            Err(error) => {
                warn!(group_id = %group.id, %error, "group review failed; skipping this cycle");
            }
        }
    }
    Ok(())
}

async fn review_one(
    pool: &PgPool,
    cfg: &EngineConfig,
    group: &Group,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<ReviewEffect> {
    // read-only context for outlier redistribution targets
    let active_groups = db::fetch_active_groups(pool).await?;

    let mut tx = pool.begin().await?;
    let memberships = db::fetch_group_memberships(&mut *tx, group.id).await?;
    let member_ids: Vec<Uuid> = memberships.iter().map(|m| m.user_id).collect();
    let profiles = db::fetch_profiles_for(&mut *tx, &member_ids).await?;
    let refs: Vec<&UserClusterProfile> = profiles.iter().collect();

    let plan = lifecycle::review_group(group, &refs, &memberships, cfg, now);
    let next = lifecycle::next_review(now, cfg);
    let mut effect = ReviewEffect::default();

    // the review stamp lands on every branch, archive included
    db::update_group_review(&mut *tx, group.id, &plan.scores, now, next).await?;

    match plan.action {
        ReviewAction::Keep => {
            effect.updated = true;
        }
        ReviewAction::Archive => {
            db::archive_group(&mut *tx, group.id).await?;
            effect.archived = true;
            info!(group_id = %group.id, cohesion = plan.scores.cohesion_score, "archived group");
        }
        ReviewAction::ShedOutliers { user_ids } => {
            effect.reassigned =
                reassign_outliers(&mut *tx, cfg, group, &active_groups, &user_ids, &profiles)
                    .await?;
            db::sync_member_count(&mut *tx, group.id).await?;
            effect.updated = true;
        }
        ReviewAction::Split { retained, spinoffs } => {
            for spinoff in &spinoffs {
                if spin_off_group(&mut *tx, cfg, group.id, spinoff, now).await? {
                    effect.spinoffs += 1;
                }
            }
            db::update_group_summary(&mut *tx, group.id, &retained).await?;
            db::sync_member_count(&mut *tx, group.id).await?;
            effect.splits = 1;
            effect.updated = true;
            info!(group_id = %group.id, spinoffs = effect.spinoffs, "split oversize group");
        }
    }

    tx.commit().await?;
    Ok(effect)
}

/// Best-effort: move each outlier to its best-matching active group, when one
/// clears the similarity bar and has headroom. No target is not an error.
async fn reassign_outliers(
    conn: &mut PgConnection,
    cfg: &EngineConfig,
    source: &Group,
    active_groups: &[Group],
    outliers: &[Uuid],
    profiles: &[UserClusterProfile],
) -> anyhow::Result<usize> {
    let mut moved = 0;
    for user_id in outliers {
        let Some(member) = profiles.iter().find(|p| p.user_id == *user_id) else {
            continue;
        };
        let mut best: Option<(&Group, f64)> = None;
        for candidate in active_groups {
            if candidate.id == source.id || candidate.member_count >= candidate.max_members {
                continue;
            }
            let similarity = group_similarity(member, candidate);
            if similarity < cfg.outlier_reassign_threshold {
                continue;
            }
            if best.map(|(_, s)| similarity > s).unwrap_or(true) {
                best = Some((candidate, similarity));
            }
        }
        let Some((target, similarity)) = best else {
            continue;
        };

        let circle_id = match db::find_open_circle(conn, target.id).await? {
            Some(circle_id) => circle_id,
            None => {
                let index = db::count_active_circles(conn, target.id).await? + 1;
                db::insert_circle(
                    conn,
                    &CircleDraft {
                        shared_wound_group_id: target.id,
                        name: circles::circle_name(&target.name, index),
                        max_members: cfg.circle_capacity,
                        is_private: true,
                        requires_invitation: false,
                    },
                )
                .await?
            }
        };
        db::move_user_to_circle(conn, *user_id, source.id, circle_id).await?;
        db::sync_member_count(conn, target.id).await?;
        info!(%user_id, from = %source.id, to = %target.id, similarity, "reassigned outlier");
        moved += 1;
    }
    Ok(moved)
}

/// Materialize one split partition as a fresh group and walk its members over
/// from the parent's circles. Returns false when a group with the same
/// defining characteristics already exists; those members then stay put.
async fn spin_off_group(
    conn: &mut PgConnection,
    cfg: &EngineConfig,
    parent_id: Uuid,
    draft: &GroupDraft,
    now: chrono::DateTime<Utc>,
) -> anyhow::Result<bool> {
    if db::group_exists(conn, draft.cluster_id).await? {
        warn!(cluster_id = %draft.cluster_id, "spinoff matches an existing group; members stay in place");
        return Ok(false);
    }
    let next = lifecycle::next_review(now, cfg);
    let group_id = db::insert_group(conn, draft, cfg, now, next).await?;

    let circle_count = circles::seating_circles(draft.member_ids.len(), cfg);
    for (index, seat) in circles::distribute_members(&draft.member_ids, circle_count)
        .iter()
        .enumerate()
    {
        let circle_id = db::insert_circle(
            conn,
            &CircleDraft {
                shared_wound_group_id: group_id,
                name: circles::circle_name(&draft.name, index as i64 + 1),
                max_members: cfg.circle_capacity,
                is_private: true,
                requires_invitation: false,
            },
        )
        .await?;
        for user_id in seat {
            db::move_user_to_circle(conn, *user_id, parent_id, circle_id).await?;
        }
    }
    db::sync_member_count(conn, group_id).await?;
    Ok(true)
}

// ── Stage 4: merge pass ───────────────────────────────────

async fn merge_groups(
    pool: &PgPool,
    cfg: &EngineConfig,
    summary: &mut RunSummary,
) -> anyhow::Result<()> {
    let groups = db::fetch_active_groups(pool).await?;
    let pairs = lifecycle::plan_merges(&groups, cfg);
    for (absorbing, absorbed) in pairs {
        match merge_one(pool, cfg, absorbing, absorbed).await {
            Ok(()) => summary.groups_merged += 1,
            Err(error) => {
                warn!(%absorbing, %absorbed, %error, "merge failed; skipping pair");
            }
        }
    }
    Ok(())
}

async fn merge_one(
    pool: &PgPool,
    cfg: &EngineConfig,
    absorbing: Uuid,
    absorbed: Uuid,
) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    let Some(target) = db::fetch_group(&mut *tx, absorbing).await? else {
        anyhow::bail!("absorbing group {absorbing} vanished mid-merge");
    };

    let memberships = db::fetch_group_memberships(&mut *tx, absorbed).await?;
    for membership in &memberships {
        let circle_id = match db::find_open_circle(&mut *tx, target.id).await? {
            Some(circle_id) => circle_id,
            None => {
                let index = db::count_active_circles(&mut *tx, target.id).await? + 1;
                db::insert_circle(
                    &mut *tx,
                    &CircleDraft {
                        shared_wound_group_id: target.id,
                        name: circles::circle_name(&target.name, index),
                        max_members: cfg.circle_capacity,
                        is_private: true,
                        requires_invitation: false,
                    },
                )
                .await?
            }
        };
        db::move_user_to_circle(&mut *tx, membership.user_id, absorbed, circle_id).await?;
    }

    db::archive_group(&mut *tx, absorbed).await?;
    db::sync_member_count(&mut *tx, absorbed).await?;
    db::sync_member_count(&mut *tx, absorbing).await?;
    tx.commit().await?;

    info!(%absorbing, %absorbed, moved = memberships.len(), "merged groups");
    Ok(())
}

// ── Stage 5: circle capacity ──────────────────────────────

async fn top_up_circles(pool: &PgPool, cfg: &EngineConfig) -> anyhow::Result<()> {
    let groups = db::fetch_active_groups(pool).await?;

    for group in groups {
        let existing = db::fetch_group_circles(pool, group.id)
            .await?
            .iter()
            .filter(|c| c.status == CircleStatus::Active)
            .count() as i32;
        let drafts = circles::plan_circles(&group, existing, cfg);
        if drafts.is_empty() {
            continue;
        }
        let mut tx = pool.begin().await?;
        for draft in &drafts {
            db::insert_circle(&mut *tx, draft).await?;
        }
        tx.commit().await?;
        info!(group_id = %group.id, added = drafts.len(), "topped up circle capacity");
    }
    Ok(())
}

// ── On-demand matching ────────────────────────────────────

/// Rank active groups for one user. A stale profile is rebuilt on the spot;
/// if the user no longer has enough observations the stale profile is reused,
/// and with no profile at all the result is simply empty.
pub async fn find_matching_groups(
    pool: &PgPool,
    cfg: &EngineConfig,
    user_id: Uuid,
    limit: usize,
) -> anyhow::Result<Vec<(Group, f64)>> {
    let now = Utc::now();
    let cached = db::fetch_profile(pool, user_id).await?;
    let fresh_enough = cached
        .as_ref()
        .map(|p| now - p.last_clustered_at <= Duration::days(cfg.profile_refresh_days.max(1)))
        .unwrap_or(false);

    let member_profile = if fresh_enough {
        cached
    } else {
        let observations =
            db::fetch_observations(pool, user_id, profile::window_start(now, cfg)).await?;
        let themes = db::fetch_user_themes(pool, user_id).await?;
        match profile::build_profile(user_id, &observations, &themes, cfg, now) {
            Some(rebuilt) => {
                db::upsert_profile(pool, &rebuilt).await?;
                Some(rebuilt)
            }
            None => cached,
        }
    };

    let Some(member_profile) = member_profile else {
        return Ok(Vec::new());
    };

    let groups = db::fetch_active_groups(pool).await?;
    let mut scored: Vec<(Group, f64)> = groups
        .into_iter()
        .map(|group| {
            let similarity = group_similarity(&member_profile, &group);
            (group, similarity)
        })
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}
