use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bootstrap::StartupFeature;
use crate::db::Database;

// ============================================================================
// Recurring jobs and startup sweeps
// ============================================================================
//
// At boot the enabled schedules are loaded from the database into the
// in-process registry. The registry only records what is scheduled: firing
// the jobs and running their bodies belongs to the external job subsystem,
// which reads the registry. The stale deployment sweep cancels deployments
// a previous process left running.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScheduleKind {
    Schedule,
    Backup,
    VolumeBackup,
    /// Backup schedules of licensed installations, loaded once serving
    EnterpriseBackup,
}

impl ScheduleKind {
    fn table(&self) -> &'static str {
        match self {
            ScheduleKind::Schedule => "schedule",
            ScheduleKind::Backup => "backup",
            ScheduleKind::VolumeBackup => "volume_backup",
            ScheduleKind::EnterpriseBackup => "enterprise_backup",
        }
    }

    pub fn feature_name(&self) -> &'static str {
        match self {
            ScheduleKind::Schedule => "schedules",
            ScheduleKind::Backup => "backup-crons",
            ScheduleKind::VolumeBackup => "volume-backups",
            ScheduleKind::EnterpriseBackup => "enterprise-backup-crons",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: String,
    pub kind: ScheduleKind,
    pub cron: String,
}

/// Five (minute-resolution) or six (second-resolution) fields
pub fn is_valid_cron(expression: &str) -> bool {
    let fields = expression.split_whitespace().count();
    (5..=6).contains(&fields)
}

/// Loaded schedule definitions, keyed by kind. Read by the job subsystem
/// that fires them; nothing here runs a job.
#[derive(Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<(ScheduleKind, String), ScheduledJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when an existing registration was replaced
    pub fn register(&self, job: ScheduledJob) -> bool {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.insert((job.kind, job.id.clone()), job).is_some()
    }

    pub fn count(&self, kind: ScheduleKind) -> usize {
        let jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        jobs.keys().filter(|(k, _)| *k == kind).count()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register the valid rows, returning how many were accepted
    pub fn load(&self, kind: ScheduleKind, rows: Vec<(String, String)>) -> usize {
        let mut accepted = 0;
        for (id, cron) in rows {
            if !is_valid_cron(&cron) {
                tracing::warn!(kind = ?kind, id = %id, cron = %cron, "Skipping job with invalid cron expression");
                continue;
            }
            self.register(ScheduledJob { id, kind, cron });
            accepted += 1;
        }
        accepted
    }
}

/// Loads one kind of recurring job at boot
pub struct ScheduleLoader {
    db: Database,
    registry: Arc<JobRegistry>,
    kind: ScheduleKind,
}

impl ScheduleLoader {
    pub fn new(db: Database, registry: Arc<JobRegistry>, kind: ScheduleKind) -> Self {
        Self { db, registry, kind }
    }
}

#[async_trait]
impl StartupFeature for ScheduleLoader {
    fn name(&self) -> &str {
        self.kind.feature_name()
    }

    async fn init(&self) -> anyhow::Result<()> {
        let query = format!(
            "SELECT id::text, cron_expression FROM {} WHERE enabled = true",
            self.kind.table()
        );
        let rows: Vec<(String, String)> = sqlx::query_as(&query).fetch_all(self.db.pool()).await?;
        let found = rows.len();
        let loaded = self.registry.load(self.kind, rows);

        tracing::info!(feature = self.name(), found = found, loaded = loaded, "Recurring jobs loaded");
        Ok(())
    }
}

/// Marks deployments left `running` by a previous process as cancelled
pub struct StaleDeploymentSweep {
    db: Database,
}

impl StaleDeploymentSweep {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl StartupFeature for StaleDeploymentSweep {
    fn name(&self) -> &str {
        "stale-deployment-sweep"
    }

    async fn init(&self) -> anyhow::Result<()> {
        let result = sqlx::query("UPDATE deployment SET status = 'cancelled' WHERE status = 'running'")
            .execute(self.db.pool())
            .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(cancelled = result.rows_affected(), "Cancelled deployments interrupted by restart");
        } else {
            tracing::debug!("No stale deployments");
        }
        Ok(())
    }
}
