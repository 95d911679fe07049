//! Snapshot validator — existence, freshness, and metadata-quality
//! checks, pure over repository data.
//!
//! "Valid" ⇔ capture succeeded, metadata present, at least the configured
//! minimum of HTML or extracted text, and an HTTP status in [200,399] when
//! one was recorded. "Stale" ⇔ newest valid snapshot older than the
//! configured stale window (default 7 days).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use vg_domain::config::PipelineConfig;
use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{Snapshot, SnapshotOwner};
use vg_domain::Result;
use vg_store::Repository;

#[derive(Clone, Debug, Serialize)]
pub struct ExistsCheck {
    pub exists: bool,
    pub age_days: Option<f64>,
    pub is_recent: bool,
}

#[derive(Clone, Debug, Serialize)]
pub struct MetadataCheck {
    pub is_valid: bool,
    pub has_content: bool,
    pub has_metadata: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ProjectCheck {
    pub total: usize,
    pub with_valid: usize,
    pub with_stale: usize,
    pub without_snapshots: usize,
    pub without_valid: usize,
}

#[derive(Clone, Debug)]
pub struct ValidatorConfig {
    pub freshness_window: chrono::Duration,
    pub stale_after: chrono::Duration,
    pub min_content_bytes: u64,
}

impl ValidatorConfig {
    pub fn from_pipeline(cfg: &PipelineConfig) -> Self {
        Self {
            freshness_window: cfg.freshness_window(),
            stale_after: chrono::Duration::days(cfg.stale_after_days),
            min_content_bytes: cfg.min_content_bytes,
        }
    }
}

pub struct SnapshotValidator {
    repo: Arc<dyn Repository>,
    cfg: ValidatorConfig,
}

impl SnapshotValidator {
    pub fn new(repo: Arc<dyn Repository>, cfg: ValidatorConfig) -> Self {
        Self { repo, cfg }
    }

    /// Pure metadata check over one snapshot.
    pub fn validate_snapshot(snapshot: &Snapshot, min_content_bytes: u64) -> MetadataCheck {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if !snapshot.capture_success {
            errors.push(format!(
                "capture failed: {}",
                snapshot.error_message.as_deref().unwrap_or("unknown")
            ));
        }

        let html_len = snapshot.metadata.html.as_deref().map_or(0, |h| h.len() as u64);
        let text_len = snapshot.metadata.text.as_deref().map_or(0, |t| t.len() as u64);
        let has_content = html_len >= min_content_bytes || text_len >= min_content_bytes;
        if !has_content {
            errors.push(format!(
                "content below {min_content_bytes} bytes (html={html_len}, text={text_len})"
            ));
        }

        let has_metadata = snapshot.metadata.html.is_some()
            || snapshot.metadata.text.is_some()
            || snapshot.metadata.title.is_some()
            || snapshot.metadata.http_status.is_some();
        if !has_metadata {
            errors.push("no capture metadata recorded".to_string());
        }

        match snapshot.metadata.http_status {
            Some(status) if !(200..=399).contains(&status) => {
                errors.push(format!("http status {status} outside [200,399]"));
            }
            None => warnings.push("no http status recorded".to_string()),
            _ => {}
        }
        if snapshot.metadata.title.is_none() {
            warnings.push("no page title extracted".to_string());
        }

        MetadataCheck {
            is_valid: errors.is_empty(),
            has_content,
            has_metadata,
            errors,
            warnings,
        }
    }

    /// Convenience predicate used by the collector and completeness checks.
    pub fn is_valid(&self, snapshot: &Snapshot) -> bool {
        Self::validate_snapshot(snapshot, self.cfg.min_content_bytes).is_valid
    }

    /// Existence + age of the newest snapshot for an owner.
    pub async fn verify_exists(&self, owner: SnapshotOwner) -> Result<ExistsCheck> {
        let now = Utc::now();
        Ok(match self.repo.latest_snapshot(owner).await? {
            Some(snapshot) => {
                let age = now - snapshot.created_at;
                ExistsCheck {
                    exists: true,
                    age_days: Some(age.num_seconds() as f64 / 86_400.0),
                    is_recent: age <= self.cfg.freshness_window,
                }
            }
            None => ExistsCheck {
                exists: false,
                age_days: None,
                is_recent: false,
            },
        })
    }

    /// Metadata check by snapshot id.
    pub async fn validate_metadata(&self, snapshot_id: Uuid) -> Result<MetadataCheck> {
        let snapshot = self
            .repo
            .snapshot(snapshot_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "snapshot not found"))?;
        Ok(Self::validate_snapshot(&snapshot, self.cfg.min_content_bytes))
    }

    /// Roll up snapshot health across every owner in a project.
    pub async fn check_project(&self, project_id: Uuid) -> Result<ProjectCheck> {
        let graph = self
            .repo
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;

        let mut owners: Vec<SnapshotOwner> = Vec::new();
        owners.extend(graph.products.iter().map(|p| SnapshotOwner::Product(p.id)));
        owners.extend(
            graph
                .competitors
                .iter()
                .map(|c| SnapshotOwner::Competitor(c.id)),
        );

        let now = Utc::now();
        let mut check = ProjectCheck {
            total: owners.len(),
            ..ProjectCheck::default()
        };
        for owner in owners {
            let history = self.repo.recent_snapshots(owner, 20).await?;
            if history.is_empty() {
                check.without_snapshots += 1;
                continue;
            }
            let newest_valid = history.iter().find(|s| self.is_valid(s));
            match newest_valid {
                Some(snapshot) => {
                    check.with_valid += 1;
                    if self.is_stale(snapshot, now) {
                        check.with_stale += 1;
                    }
                }
                None => check.without_valid += 1,
            }
        }
        Ok(check)
    }

    pub fn is_stale(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        snapshot.age(now) > self.cfg.stale_after
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::model::{Competitor, Product, Project, SnapshotMetadata};
    use vg_store::InMemoryRepository;

    fn cfg() -> ValidatorConfig {
        ValidatorConfig {
            freshness_window: chrono::Duration::hours(24),
            stale_after: chrono::Duration::days(7),
            min_content_bytes: 100,
        }
    }

    fn good_snapshot(owner: SnapshotOwner) -> Snapshot {
        Snapshot {
            id: Uuid::new_v4(),
            owner,
            created_at: Utc::now(),
            capture_success: true,
            error_message: None,
            metadata: SnapshotMetadata {
                html: Some("x".repeat(500)),
                text: Some("x".repeat(200)),
                title: Some("Page".into()),
                http_status: Some(200),
                content_length: Some(500),
                duration_ms: Some(120),
                extra: serde_json::Value::Null,
            },
        }
    }

    #[test]
    fn valid_snapshot_passes() {
        let check = SnapshotValidator::validate_snapshot(
            &good_snapshot(SnapshotOwner::Competitor(Uuid::new_v4())),
            100,
        );
        assert!(check.is_valid);
        assert!(check.has_content);
        assert!(check.has_metadata);
        assert!(check.errors.is_empty());
    }

    #[test]
    fn short_content_fails() {
        let mut snap = good_snapshot(SnapshotOwner::Competitor(Uuid::new_v4()));
        snap.metadata.html = Some("tiny".into());
        snap.metadata.text = Some("tiny".into());
        let check = SnapshotValidator::validate_snapshot(&snap, 100);
        assert!(!check.is_valid);
        assert!(!check.has_content);
    }

    #[test]
    fn bad_status_fails_missing_status_warns() {
        let mut snap = good_snapshot(SnapshotOwner::Competitor(Uuid::new_v4()));
        snap.metadata.http_status = Some(500);
        assert!(!SnapshotValidator::validate_snapshot(&snap, 100).is_valid);

        snap.metadata.http_status = None;
        let check = SnapshotValidator::validate_snapshot(&snap, 100);
        assert!(check.is_valid);
        assert!(check.warnings.iter().any(|w| w.contains("http status")));
    }

    #[test]
    fn failed_capture_is_invalid() {
        let mut snap = good_snapshot(SnapshotOwner::Competitor(Uuid::new_v4()));
        snap.capture_success = false;
        snap.error_message = Some("timeout: slow host".into());
        let check = SnapshotValidator::validate_snapshot(&snap, 100);
        assert!(!check.is_valid);
        assert!(check.errors.iter().any(|e| e.contains("timeout")));
    }

    async fn seeded_repo() -> (Arc<InMemoryRepository>, Uuid, SnapshotOwner, SnapshotOwner) {
        let repo = Arc::new(InMemoryRepository::new());
        let project = repo
            .create_project(Project::new("p", "u"))
            .await
            .unwrap();
        let product = repo
            .create_product(Product {
                id: Uuid::new_v4(),
                project_id: project.id,
                name: "Widget".into(),
                website: "https://widget.example".into(),
                positioning: None,
                industry: None,
                customer_description: None,
                problem_statement: None,
            })
            .await
            .unwrap();
        let competitor = repo
            .create_competitor(Competitor {
                id: Uuid::new_v4(),
                name: "Globex".into(),
                website: "https://globex.example".into(),
                description: None,
                industry: None,
            })
            .await
            .unwrap();
        repo.attach_competitor(project.id, competitor.id)
            .await
            .unwrap();
        (
            repo,
            project.id,
            SnapshotOwner::Product(product.id),
            SnapshotOwner::Competitor(competitor.id),
        )
    }

    #[tokio::test]
    async fn verify_exists_reports_age() {
        let (repo, _, product_owner, competitor_owner) = seeded_repo().await;
        let validator = SnapshotValidator::new(repo.clone(), cfg());

        let check = validator.verify_exists(competitor_owner).await.unwrap();
        assert!(!check.exists);
        assert!(check.age_days.is_none());

        repo.put_snapshot(product_owner, SnapshotMetadata::default(), true, None)
            .await
            .unwrap();
        let check = validator.verify_exists(product_owner).await.unwrap();
        assert!(check.exists);
        assert!(check.is_recent);
        assert!(check.age_days.unwrap() < 1.0);
    }

    #[tokio::test]
    async fn check_project_counts_owner_states() {
        let (repo, project_id, product_owner, competitor_owner) = seeded_repo().await;
        let validator = SnapshotValidator::new(repo.clone(), cfg());

        // Product gets a valid snapshot; competitor gets only a failed one.
        let md = SnapshotMetadata {
            html: Some("x".repeat(500)),
            http_status: Some(200),
            ..SnapshotMetadata::default()
        };
        repo.put_snapshot(product_owner, md, true, None).await.unwrap();
        repo.put_snapshot(
            competitor_owner,
            SnapshotMetadata::default(),
            false,
            Some("timeout".into()),
        )
        .await
        .unwrap();

        let check = validator.check_project(project_id).await.unwrap();
        assert_eq!(
            check,
            ProjectCheck {
                total: 2,
                with_valid: 1,
                with_stale: 0,
                without_snapshots: 0,
                without_valid: 1,
            }
        );
    }

    #[tokio::test]
    async fn validate_metadata_by_id() {
        let (repo, _, product_owner, _) = seeded_repo().await;
        let validator = SnapshotValidator::new(repo.clone(), cfg());

        let md = SnapshotMetadata {
            html: Some("x".repeat(500)),
            http_status: Some(200),
            ..SnapshotMetadata::default()
        };
        let snap = repo.put_snapshot(product_owner, md, true, None).await.unwrap();
        let check = validator.validate_metadata(snap.id).await.unwrap();
        assert!(check.is_valid);

        let err = validator.validate_metadata(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::OwnerNotFound);
    }
}
