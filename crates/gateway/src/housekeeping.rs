//! Periodic maintenance loops: queue state flush, cache/lock pruning, and
//! the zombie-report sweep.
//!
//! The sweep is observability only — the repository's completion guard makes a
//! `Completed` report without content unreachable through this codebase;
//! anything the sweep finds came from an external writer.

use std::time::Duration;

use vg_domain::model::{completed_requires_content, ReportStatus};

use crate::state::AppState;

/// Scan for completed reports with no non-empty version. Returns how many
/// violations were found (also recorded to metrics and logged).
pub async fn zombie_report_sweep(state: &AppState) -> usize {
    let reports = match state.repo.list_reports().await {
        Ok(reports) => reports,
        Err(err) => {
            tracing::warn!(error = %err, "zombie sweep skipped, report listing failed");
            return 0;
        }
    };

    let mut zombies = 0usize;
    for report in reports
        .iter()
        .filter(|r| r.status == ReportStatus::Completed)
    {
        let versions = match state.repo.report_versions(report.id).await {
            Ok(versions) => versions,
            Err(err) => {
                tracing::warn!(report_id = %report.id, error = %err, "version read failed");
                continue;
            }
        };
        if completed_requires_content(ReportStatus::Completed, &versions).is_err() {
            zombies += 1;
            tracing::error!(
                report_id = %report.id,
                project_id = %report.project_id,
                versions = versions.len(),
                "zombie report: COMPLETED without viewable content"
            );
        }
    }
    if zombies > 0 {
        state.metrics.record_zombie_reports(zombies as u64);
    }
    zombies
}

/// Spawn all maintenance loops.
pub fn spawn_loops(state: AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    // Queue snapshot flush.
    {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(30));
            loop {
                interval.tick().await;
                state.queue.flush_if_dirty();
                state.metrics.set_queue_depth(state.queue.depth());
            }
        }));
    }

    // Cache, lock, and status-channel pruning.
    {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                interval.tick().await;
                let evicted = state.resolution_cache.purge_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "resolution cache entries expired");
                }
                state.creation_locks.prune_idle();
                state.status.prune_idle();
            }
        }));
    }

    // Zombie-report sweep.
    {
        let state = state.clone();
        handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(600));
            loop {
                interval.tick().await;
                let found = zombie_report_sweep(&state).await;
                if found > 0 {
                    tracing::error!(found, "zombie report sweep flagged violations");
                }
            }
        }));
    }

    handles
}

/// Shared maintenance spawn used by both `serve` and tests.
pub fn spawn_all(state: &AppState) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = spawn_loops(state.clone());
    handles.push(state.scheduler.clone().spawn_loop());
    handles.extend(state.coordinator.spawn_workers());
    handles
}
