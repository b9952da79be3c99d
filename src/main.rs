use std::sync::Arc;

use anyhow::Context;
use uuid::Uuid;

use platform_controlplane::bootstrap::{
    bootstrap_steps, exit_code_for, write_recovery_marker, AuxiliaryFeatures, BootstrapSequencer,
    StartupContext, TrafficListener,
};
use platform_controlplane::cluster::infra::{postgres_target, proxy_target, redis_target};
use platform_controlplane::cluster::{
    ClusterApi, DockerCluster, RuntimeMode, RuntimeModeDetector, ServiceReconciler,
};
use platform_controlplane::config::Settings;
use platform_controlplane::db::{sanitize_db_url, Database, SqlxMigrator};
use platform_controlplane::health::HealthOrchestrator;
use platform_controlplane::metrics::Metrics;
use platform_controlplane::platform::{
    JobRegistry, LoggingJobHandler, QueueWorker, RedisRestartNotifier, ScheduleKind,
    ScheduleLoader, StaleDeploymentSweep, TraefikInstaller,
};
use platform_controlplane::server::{AppState, HttpListener};

#[actix_web::main]
async fn main() {
    let settings = Settings::from_env();
    platform_controlplane::init_tracing(settings.as_ref().map(|s| s.debug).unwrap_or(false));

    let code = match settings {
        Ok(settings) => match run(settings).await {
            Ok(code) => code,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "❌ Control plane failed before bootstrap");
                1
            }
        },
        Err(e) => {
            tracing::error!(error = %e, "❌ Invalid configuration");
            1
        }
    };

    std::process::exit(code);
}

async fn run(settings: Settings) -> anyhow::Result<i32> {
    let boot_id = Uuid::now_v7();
    tracing::info!(
        boot_id = %boot_id,
        version = %settings.version,
        hosted = settings.deployment.is_hosted(),
        "🚀 Starting platform control plane"
    );
    if settings.debug {
        tracing::debug!(database = %sanitize_db_url(&settings.database_url), "Database target");
    }

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!("📊 Metrics registry created with {} metrics", metrics.registry().gather().len());

    // === 2. Container runtime ===
    let socket_api: Option<Arc<dyn ClusterApi>> = match DockerCluster::connect_socket(&settings.docker_socket) {
        Ok(cluster) => Some(Arc::new(cluster)),
        Err(e) => {
            tracing::debug!(error = %e, "No socket client");
            None
        }
    };
    let embedded_api: Option<Arc<dyn ClusterApi>> = match DockerCluster::connect_local_defaults() {
        Ok(cluster) => Some(Arc::new(cluster)),
        Err(e) => {
            tracing::debug!(error = %e, "No embedded runtime client");
            None
        }
    };

    let mut detector = RuntimeModeDetector::new(&settings.docker_socket);
    if let Some(api) = &socket_api {
        detector = detector.with_socket_api(api.clone());
    }
    if let Some(api) = &embedded_api {
        detector = detector.with_embedded_api(api.clone());
    }
    let tuning = detector.detect_tuning().await;
    metrics.set_runtime_mode(tuning.mode.code());

    let cluster = match tuning.mode {
        RuntimeMode::EmbeddedDaemon => embedded_api.or(socket_api),
        RuntimeMode::Socket | RuntimeMode::Unknown => socket_api.or(embedded_api),
    }
    .context("no container runtime client could be created")?;

    // === 3. Shared infrastructure handles ===
    let db = Database::connect_lazy(&settings.database_url)?;
    let orchestrator = HealthOrchestrator::new().with_metrics(metrics.clone());
    let reconciler = Arc::new(
        ServiceReconciler::new(cluster.clone(), orchestrator)
            .with_startup_buffer(tuning.startup_buffer)
            .with_metrics(metrics.clone()),
    );

    let datastore = postgres_target(cluster.clone(), &settings.postgres, &settings.database_url);
    let cache = redis_target(cluster.clone(), &settings.redis_url);
    let proxy = proxy_target(cluster.clone(), &settings.proxy_config_dir, &settings.docker_socket);

    // === 4. Collaborators ===
    let registry = Arc::new(JobRegistry::new());
    let features = AuxiliaryFeatures {
        schedules: Arc::new(ScheduleLoader::new(db.clone(), registry.clone(), ScheduleKind::Schedule)),
        backup_crons: Arc::new(ScheduleLoader::new(db.clone(), registry.clone(), ScheduleKind::Backup)),
        stale_deployments: Arc::new(StaleDeploymentSweep::new(db.clone())),
        volume_backups: Arc::new(ScheduleLoader::new(db.clone(), registry.clone(), ScheduleKind::VolumeBackup)),
        enterprise_backups: Arc::new(ScheduleLoader::new(
            db.clone(),
            registry.clone(),
            ScheduleKind::EnterpriseBackup,
        )),
    };

    let (host, port) = settings.bind_addr();
    let listener = Arc::new(HttpListener::new(
        host,
        port,
        AppState {
            db: db.clone(),
            runtime_mode: tuning.mode,
            metrics: metrics.clone(),
            version: settings.version.clone(),
        },
    ));

    let ctx = StartupContext {
        deployment: settings.deployment,
        cluster: cluster.clone(),
        reconciler: reconciler.clone(),
        datastore,
        cache,
        swarm_advertise_addr: settings.swarm_advertise_addr.clone(),
        migrator: Arc::new(SqlxMigrator::new(db.clone(), &settings.migrations_dir)),
        proxy: Arc::new(TraefikInstaller::new(&settings.proxy_config_dir, reconciler.clone(), proxy)),
        features,
        notifier: Arc::new(RedisRestartNotifier::new(
            &settings.redis_url,
            &settings.notification_channel,
            boot_id,
            &settings.version,
        )),
        listener: listener.clone() as Arc<dyn TrafficListener>,
        worker: Arc::new(QueueWorker::new(
            &settings.redis_url,
            &settings.deployment_queue,
            Arc::new(LoggingJobHandler),
        )),
    };

    // === 5. Bootstrap ===
    let sequencer = BootstrapSequencer::new(tuning.max_parallel).with_metrics(metrics.clone());
    let report = match sequencer.run(bootstrap_steps(&ctx)).await {
        Ok(report) => report,
        Err(e) => {
            tracing::error!(error = %e, "❌ Bootstrap graph is invalid");
            return Ok(1);
        }
    };

    if let Some(failure) = &report.failure {
        return Ok(exit_code_for(failure, &settings.recovery_marker).await);
    }

    tracing::info!(
        steps = report.records.len(),
        jobs = registry.len(),
        "✅ Control plane ready"
    );

    // === 6. Serve until stopped ===
    match listener.wait().await {
        Ok(()) => Ok(0),
        Err(e) => {
            tracing::error!(error = %format!("{:#}", e), "❌ Server stopped with an error");
            write_recovery_marker(&settings.recovery_marker).await;
            Ok(1)
        }
    }
}
