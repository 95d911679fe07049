//! Repository capability trait and its in-memory implementation.
//!
//! The core never sees a persistence schema — it talks to [`Repository`].
//! Concrete backends are injected at composition time; the in-memory
//! implementation here backs the gateway and every test harness.

pub mod cache;
pub mod locks;
pub mod memory;
pub mod retry;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use vg_domain::model::{
    Competitor, Product, Project, ProjectGraph, Report, ReportSchedule, ReportSection,
    ReportStatus, ReportVersion, ReportVersionMetadata, Snapshot, SnapshotMetadata,
    SnapshotOwner,
};
use vg_domain::Result;

pub use cache::TtlCache;
pub use locks::{project_creation_key, NamedLockMap};
pub use memory::InMemoryRepository;
pub use retry::with_storage_retries;

/// Storage interface consumed by the core.
///
/// Guarantees required of implementations:
/// - snapshot writes are atomic and write-once; reads are ordered
///   `created_at DESC` and read-your-writes within a project context;
/// - `update_report_status` refuses `Completed` unless at least one version
///   with non-empty content exists (the authoritative zombie-report guard);
/// - retryable unavailability is signalled with `StorageUnavailable`,
///   missing snapshot owners with `OwnerNotFound`.
#[async_trait]
pub trait Repository: Send + Sync {
    // ── Projects ─────────────────────────────────────────────────────
    async fn create_project(&self, project: Project) -> Result<Project>;
    async fn project(&self, id: Uuid) -> Result<Option<Project>>;
    async fn find_project_with_graph(&self, id: Uuid) -> Result<Option<ProjectGraph>>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn create_product(&self, product: Product) -> Result<Product>;
    async fn create_competitor(&self, competitor: Competitor) -> Result<Competitor>;
    async fn attach_competitor(&self, project_id: Uuid, competitor_id: Uuid) -> Result<()>;

    // ── Snapshots ──────────────────────────────────────────────────────
    async fn put_snapshot(
        &self,
        owner: SnapshotOwner,
        metadata: SnapshotMetadata,
        success: bool,
        error_message: Option<String>,
    ) -> Result<Snapshot>;
    async fn snapshot(&self, id: Uuid) -> Result<Option<Snapshot>>;
    async fn latest_snapshot(&self, owner: SnapshotOwner) -> Result<Option<Snapshot>>;
    async fn recent_snapshots(&self, owner: SnapshotOwner, n: usize) -> Result<Vec<Snapshot>>;
    async fn owners_missing_snapshots(&self, project_id: Uuid) -> Result<Vec<SnapshotOwner>>;

    // ── Reports ──────────────────────────────────────────────────────
    async fn create_report(&self, project_id: Uuid, product_id: Uuid) -> Result<Report>;
    async fn report(&self, id: Uuid) -> Result<Option<Report>>;
    async fn list_reports(&self) -> Result<Vec<Report>>;
    async fn create_report_version(
        &self,
        report_id: Uuid,
        content: String,
        sections: Vec<ReportSection>,
        metadata: ReportVersionMetadata,
    ) -> Result<ReportVersion>;
    async fn report_versions(&self, report_id: Uuid) -> Result<Vec<ReportVersion>>;
    async fn update_report_status(&self, report_id: Uuid, status: ReportStatus) -> Result<Report>;

    // ── Schedules ────────────────────────────────────────────────────
    async fn upsert_schedule(&self, schedule: ReportSchedule) -> Result<ReportSchedule>;
    async fn schedule(&self, id: Uuid) -> Result<Option<ReportSchedule>>;
    async fn schedule_for_project(&self, project_id: Uuid) -> Result<Option<ReportSchedule>>;
    async fn list_schedules(&self) -> Result<Vec<ReportSchedule>>;
    async fn delete_schedule(&self, id: Uuid) -> Result<bool>;
    async fn record_schedule_fired(
        &self,
        id: Uuid,
        fired_at: DateTime<Utc>,
        next_run: Option<DateTime<Utc>>,
    ) -> Result<()>;
    async fn record_schedule_outcome(
        &self,
        id: Uuid,
        success: bool,
        error: Option<String>,
    ) -> Result<()>;
}
