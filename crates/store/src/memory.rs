//! In-memory repository.
//!
//! Locks are scoped so no guard is ever held across an await. Snapshots are
//! write-once; the completion guard lives in `update_report_status`.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use vg_domain::error::{Error, ErrorKind};
use vg_domain::model::{
    completed_requires_content, Competitor, Product, Project, ProjectGraph, Report,
    ReportSchedule, ReportSection, ReportStatus, ReportVersion, ReportVersionMetadata,
    Snapshot, SnapshotMetadata, SnapshotOwner,
};
use vg_domain::Result;

use crate::Repository;

#[derive(Default)]
pub struct InMemoryRepository {
    projects: RwLock<HashMap<Uuid, Project>>,
    products: RwLock<HashMap<Uuid, Product>>,
    competitors: RwLock<HashMap<Uuid, Competitor>>,
    snapshots: RwLock<Vec<Snapshot>>,
    reports: RwLock<HashMap<Uuid, Report>>,
    /// Versions keyed by report id, in insertion (= version) order.
    versions: RwLock<HashMap<Uuid, Vec<ReportVersion>>>,
    schedules: RwLock<HashMap<Uuid, ReportSchedule>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner_exists(&self, owner: SnapshotOwner) -> bool {
        match owner {
            SnapshotOwner::Product(id) => self.products.read().contains_key(&id),
            SnapshotOwner::Competitor(id) => self.competitors.read().contains_key(&id),
        }
    }

    fn snapshots_for(&self, owner: SnapshotOwner) -> Vec<Snapshot> {
        let mut rows: Vec<Snapshot> = self
            .snapshots
            .read()
            .iter()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    // ── Projects ─────────────────────────────────────────────────────

    async fn create_project(&self, project: Project) -> Result<Project> {
        let mut projects = self.projects.write();
        let duplicate = projects.values().any(|p| {
            p.owner_user_id == project.owner_user_id
                && p.name.eq_ignore_ascii_case(&project.name)
        });
        if duplicate {
            return Err(Error::new(ErrorKind::Duplicate, "Duplicate project name"));
        }
        projects.insert(project.id, project.clone());
        Ok(project)
    }

    async fn project(&self, id: Uuid) -> Result<Option<Project>> {
        Ok(self.projects.read().get(&id).cloned())
    }

    async fn find_project_with_graph(&self, id: Uuid) -> Result<Option<ProjectGraph>> {
        let project = match self.projects.read().get(&id).cloned() {
            Some(p) => p,
            None => return Ok(None),
        };
        let products = {
            let all = self.products.read();
            project
                .product_ids
                .iter()
                .filter_map(|pid| all.get(pid).cloned())
                .collect()
        };
        let competitors = {
            let all = self.competitors.read();
            project
                .competitor_ids
                .iter()
                .filter_map(|cid| all.get(cid).cloned())
                .collect()
        };
        Ok(Some(ProjectGraph {
            project,
            products,
            competitors,
        }))
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        Ok(self.projects.read().values().cloned().collect())
    }

    async fn create_product(&self, product: Product) -> Result<Product> {
        {
            let mut projects = self.projects.write();
            let project = projects.get_mut(&product.project_id).ok_or_else(|| {
                Error::new(ErrorKind::OwnerNotFound, "project not found for product")
            })?;
            if !project.product_ids.contains(&product.id) {
                project.product_ids.push(product.id);
                project.updated_at = Utc::now();
            }
        }
        self.products.write().insert(product.id, product.clone());
        Ok(product)
    }

    async fn create_competitor(&self, competitor: Competitor) -> Result<Competitor> {
        self.competitors
            .write()
            .insert(competitor.id, competitor.clone());
        Ok(competitor)
    }

    async fn attach_competitor(&self, project_id: Uuid, competitor_id: Uuid) -> Result<()> {
        if !self.competitors.read().contains_key(&competitor_id) {
            return Err(Error::new(ErrorKind::OwnerNotFound, "competitor not found"));
        }
        let mut projects = self.projects.write();
        let project = projects
            .get_mut(&project_id)
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;
        if !project.competitor_ids.contains(&competitor_id) {
            project.competitor_ids.push(competitor_id);
            project.updated_at = Utc::now();
        }
        Ok(())
    }

    // ── Snapshots ────────────────────────────────────────────────────

    async fn put_snapshot(
        &self,
        owner: SnapshotOwner,
        metadata: SnapshotMetadata,
        success: bool,
        error_message: Option<String>,
    ) -> Result<Snapshot> {
        if !self.owner_exists(owner) {
            return Err(Error::new(
                ErrorKind::OwnerNotFound,
                format!("snapshot owner {owner:?} not found"),
            ));
        }
        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            owner,
            created_at: Utc::now(),
            capture_success: success,
            error_message,
            metadata,
        };
        self.snapshots.write().push(snapshot.clone());
        Ok(snapshot)
    }

    async fn snapshot(&self, id: Uuid) -> Result<Option<Snapshot>> {
        Ok(self.snapshots.read().iter().find(|s| s.id == id).cloned())
    }

    async fn latest_snapshot(&self, owner: SnapshotOwner) -> Result<Option<Snapshot>> {
        Ok(self.snapshots_for(owner).into_iter().next())
    }

    async fn recent_snapshots(&self, owner: SnapshotOwner, n: usize) -> Result<Vec<Snapshot>> {
        Ok(self.snapshots_for(owner).into_iter().take(n).collect())
    }

    async fn owners_missing_snapshots(&self, project_id: Uuid) -> Result<Vec<SnapshotOwner>> {
        let graph = self
            .find_project_with_graph(project_id)
            .await?
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "project not found"))?;

        let covered: HashSet<SnapshotOwner> =
            self.snapshots.read().iter().map(|s| s.owner).collect();

        let mut missing = Vec::new();
        for p in &graph.products {
            let owner = SnapshotOwner::Product(p.id);
            if !covered.contains(&owner) {
                missing.push(owner);
            }
        }
        for c in &graph.competitors {
            let owner = SnapshotOwner::Competitor(c.id);
            if !covered.contains(&owner) {
                missing.push(owner);
            }
        }
        Ok(missing)
    }

    // ── Reports ──────────────────────────────────────────────────────

    async fn create_report(&self, project_id: Uuid, product_id: Uuid) -> Result<Report> {
        if !self.projects.read().contains_key(&project_id) {
            return Err(Error::new(ErrorKind::OwnerNotFound, "project not found"));
        }
        if !self.products.read().contains_key(&product_id) {
            return Err(Error::new(ErrorKind::OwnerNotFound, "product not found"));
        }
        let now = Utc::now();
        let report = Report {
            id: Uuid::new_v4(),
            project_id,
            product_id,
            analysis_id: Uuid::new_v4(),
            status: ReportStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.reports.write().insert(report.id, report.clone());
        Ok(report)
    }

    async fn report(&self, id: Uuid) -> Result<Option<Report>> {
        Ok(self.reports.read().get(&id).cloned())
    }

    async fn list_reports(&self) -> Result<Vec<Report>> {
        Ok(self.reports.read().values().cloned().collect())
    }

    async fn create_report_version(
        &self,
        report_id: Uuid,
        content: String,
        sections: Vec<ReportSection>,
        metadata: ReportVersionMetadata,
    ) -> Result<ReportVersion> {
        if !self.reports.read().contains_key(&report_id) {
            return Err(Error::new(ErrorKind::OwnerNotFound, "report not found"));
        }
        let mut versions = self.versions.write();
        let entries = versions.entry(report_id).or_default();
        let version = ReportVersion {
            id: Uuid::new_v4(),
            report_id,
            version: entries.len() as u32 + 1,
            content,
            sections,
            metadata,
            created_at: Utc::now(),
        };
        entries.push(version.clone());
        Ok(version)
    }

    async fn report_versions(&self, report_id: Uuid) -> Result<Vec<ReportVersion>> {
        Ok(self
            .versions
            .read()
            .get(&report_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_report_status(&self, report_id: Uuid, status: ReportStatus) -> Result<Report> {
        // Completed requires a non-empty version.
        let versions = self
            .versions
            .read()
            .get(&report_id)
            .cloned()
            .unwrap_or_default();
        completed_requires_content(status, &versions)?;

        let mut reports = self.reports.write();
        let report = reports
            .get_mut(&report_id)
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "report not found"))?;
        report.status = status;
        report.updated_at = Utc::now();
        Ok(report.clone())
    }

    // ── Schedules ────────────────────────────────────────────────────

    async fn upsert_schedule(&self, schedule: ReportSchedule) -> Result<ReportSchedule> {
        self.schedules
            .write()
            .insert(schedule.id, schedule.clone());
        Ok(schedule)
    }

    async fn schedule(&self, id: Uuid) -> Result<Option<ReportSchedule>> {
        Ok(self.schedules.read().get(&id).cloned())
    }

    async fn schedule_for_project(&self, project_id: Uuid) -> Result<Option<ReportSchedule>> {
        Ok(self
            .schedules
            .read()
            .values()
            .find(|s| s.project_id == project_id)
            .cloned())
    }

    async fn list_schedules(&self) -> Result<Vec<ReportSchedule>> {
        Ok(self.schedules.read().values().cloned().collect())
    }

    async fn delete_schedule(&self, id: Uuid) -> Result<bool> {
        Ok(self.schedules.write().remove(&id).is_some())
    }

    async fn record_schedule_fired(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let mut schedules = self.schedules.write();
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "schedule not found"))?;
        schedule.last_run = Some(fired_at);
        schedule.next_run = next_run;
        schedule.updated_at = Utc::now();
        Ok(())
    }

    async fn record_schedule_outcome(
        &self,
        id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> Result<()> {
        let mut schedules = self.schedules.write();
        let schedule = schedules
            .get_mut(&id)
            .ok_or_else(|| Error::new(ErrorKind::OwnerNotFound, "schedule not found"))?;
        if success {
            schedule.consecutive_failures = 0;
            schedule.last_error = None;
            schedule.last_error_at = None;
        } else {
            schedule.consecutive_failures += 1;
            schedule.last_error = error;
            schedule.last_error_at = Some(Utc::now());
        }
        schedule.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vg_domain::model::{DataFreshness, QualityTier, ScrapeFrequency};

    fn meta() -> ReportVersionMetadata {
        ReportVersionMetadata {
            completeness_score: 90.0,
            freshness: DataFreshness::New,
            quality_tier: QualityTier::Fresh,
            template_id: "standard".into(),
            has_data_limitations: false,
        }
    }

    async fn seed(repo: &InMemoryRepository) -> (Project, Product, Competitor) {
        let project = repo
            .create_project(Project::new("acme-intel", "user-1"))
            .await
            .unwrap();
        let product = repo
            .create_product(Product {
                id: Uuid::new_v4(),
                project_id: project.id,
                name: "Acme Widget".into(),
                website: "https://acme.example".into(),
                positioning: Some("the fastest widget".into()),
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
        (project, product, competitor)
    }

    #[tokio::test]
    async fn duplicate_project_name_rejected() {
        let repo = InMemoryRepository::new();
        repo.create_project(Project::new("intel", "u1")).await.unwrap();

        let err = repo
            .create_project(Project::new("Intel", "u1"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Duplicate);
        assert_eq!(err.message, "Duplicate project name");

        // Same name under a different user is fine.
        assert!(repo.create_project(Project::new("intel", "u2")).await.is_ok());
    }

    #[tokio::test]
    async fn graph_resolves_products_and_competitors() {
        let repo = InMemoryRepository::new();
        let (project, product, competitor) = seed(&repo).await;

        let graph = repo
            .find_project_with_graph(project.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(graph.products.len(), 1);
        assert_eq!(graph.products[0].id, product.id);
        assert_eq!(graph.competitors.len(), 1);
        assert_eq!(graph.competitors[0].id, competitor.id);
    }

    #[tokio::test]
    async fn snapshot_reads_are_newest_first() {
        let repo = InMemoryRepository::new();
        let (_, _, competitor) = seed(&repo).await;
        let owner = SnapshotOwner::Competitor(competitor.id);

        for i in 0..3 {
            let mut md = SnapshotMetadata::default();
            md.title = Some(format!("v{i}"));
            repo.put_snapshot(owner, md, true, None).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }

        let latest = repo.latest_snapshot(owner).await.unwrap().unwrap();
        assert_eq!(latest.metadata.title.as_deref(), Some("v2"));

        let recent = repo.recent_snapshots(owner, 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent[0].created_at >= recent[1].created_at);
    }

    #[tokio::test]
    async fn put_snapshot_unknown_owner_is_fatal() {
        let repo = InMemoryRepository::new();
        let err = repo
            .put_snapshot(
                SnapshotOwner::Competitor(Uuid::new_v4()),
                SnapshotMetadata::default(),
                true,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::OwnerNotFound);
    }

    #[tokio::test]
    async fn owners_missing_snapshots_reports_gaps() {
        let repo = InMemoryRepository::new();
        let (project, product, competitor) = seed(&repo).await;

        let missing = repo.owners_missing_snapshots(project.id).await.unwrap();
        assert_eq!(missing.len(), 2);

        repo.put_snapshot(
            SnapshotOwner::Product(product.id),
            SnapshotMetadata::default(),
            true,
            None,
        )
        .await
        .unwrap();

        let missing = repo.owners_missing_snapshots(project.id).await.unwrap();
        assert_eq!(missing, vec![SnapshotOwner::Competitor(competitor.id)]);
    }

    #[tokio::test]
    async fn completed_without_version_is_rejected() {
        let repo = InMemoryRepository::new();
        let (project, product, _) = seed(&repo).await;
        let report = repo.create_report(project.id, product.id).await.unwrap();

        let err = repo
            .update_report_status(report.id, ReportStatus::Completed)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "no ReportVersions");

        // Empty content doesn't satisfy the guard either.
        repo.create_report_version(report.id, "   ".into(), vec![], meta())
            .await
            .unwrap();
        assert!(repo
            .update_report_status(report.id, ReportStatus::Completed)
            .await
            .is_err());

        repo.create_report_version(report.id, "# Report".into(), vec![], meta())
            .await
            .unwrap();
        let report = repo
            .update_report_status(report.id, ReportStatus::Completed)
            .await
            .unwrap();
        assert_eq!(report.status, ReportStatus::Completed);
    }

    #[tokio::test]
    async fn versions_are_monotonic() {
        let repo = InMemoryRepository::new();
        let (project, product, _) = seed(&repo).await;
        let report = repo.create_report(project.id, product.id).await.unwrap();

        let v1 = repo
            .create_report_version(report.id, "one".into(), vec![], meta())
            .await
            .unwrap();
        let v2 = repo
            .create_report_version(report.id, "two".into(), vec![], meta())
            .await
            .unwrap();
        assert_eq!(v1.version, 1);
        assert_eq!(v2.version, 2);
    }

    #[tokio::test]
    async fn schedule_outcome_tracking() {
        let repo = InMemoryRepository::new();
        let (project, _, _) = seed(&repo).await;
        let schedule = repo
            .upsert_schedule(ReportSchedule::new(project.id, ScrapeFrequency::Daily))
            .await
            .unwrap();

        repo.record_schedule_outcome(schedule.id, false, Some("boom".into()))
            .await
            .unwrap();
        repo.record_schedule_outcome(schedule.id, false, Some("boom".into()))
            .await
            .unwrap();
        let s = repo.schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.consecutive_failures, 2);
        assert_eq!(s.last_error.as_deref(), Some("boom"));

        repo.record_schedule_outcome(schedule.id, true, None)
            .await
            .unwrap();
        let s = repo.schedule(schedule.id).await.unwrap().unwrap();
        assert_eq!(s.consecutive_failures, 0);
        assert!(s.last_error.is_none());
    }
}
