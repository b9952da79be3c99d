use anyhow::Context;
use std::sync::Arc;

use super::collaborators::{
    BackgroundWorker, ProxyInstaller, RestartNotifier, SchemaMigrator, StartupFeature,
    TrafficListener,
};
use super::step::BootstrapStep;
use crate::cluster::{infra, ClusterApi, InfraTarget, ServiceReconciler};
use crate::config::DeploymentMode;

// ============================================================================
// Startup Graph
// ============================================================================
//
//   init-network
//     -> init-cluster-membership
//       -> init-datastore | init-cache
//         -> run-schema-migration
//           -> write-proxy-config -> start-reverse-proxy
//             -> init-schedules | init-backup-crons
//                | cancel-stale-deployments | init-volume-backups   (best-effort)
//               -> send-restart-notification                        (best-effort)
//                 -> serve-traffic
//                   -> init-enterprise-backup-crons                 (best-effort)
//                     -> start-deployment-worker
//
// Infrastructure (network, membership, datastore, cache) and the migration
// run in every deployment mode. Hosted deployments skip the reverse proxy,
// the auxiliary features, the notification and the worker.
//
// ============================================================================

pub const INIT_NETWORK: &str = "init-network";
pub const INIT_CLUSTER_MEMBERSHIP: &str = "init-cluster-membership";
pub const INIT_DATASTORE: &str = "init-datastore";
pub const INIT_CACHE: &str = "init-cache";
pub const RUN_SCHEMA_MIGRATION: &str = "run-schema-migration";
pub const WRITE_PROXY_CONFIG: &str = "write-proxy-config";
pub const START_REVERSE_PROXY: &str = "start-reverse-proxy";
pub const INIT_SCHEDULES: &str = "init-schedules";
pub const INIT_BACKUP_CRONS: &str = "init-backup-crons";
pub const CANCEL_STALE_DEPLOYMENTS: &str = "cancel-stale-deployments";
pub const INIT_VOLUME_BACKUPS: &str = "init-volume-backups";
pub const SEND_RESTART_NOTIFICATION: &str = "send-restart-notification";
pub const SERVE_TRAFFIC: &str = "serve-traffic";
pub const INIT_ENTERPRISE_BACKUP_CRONS: &str = "init-enterprise-backup-crons";
pub const START_DEPLOYMENT_WORKER: &str = "start-deployment-worker";

const SWARM_LISTEN_ADDR: &str = "0.0.0.0:2377";

/// Auxiliary features, all best-effort. All but the enterprise backups start
/// after the proxy; those start once traffic is served.
#[derive(Clone)]
pub struct AuxiliaryFeatures {
    pub schedules: Arc<dyn StartupFeature>,
    pub backup_crons: Arc<dyn StartupFeature>,
    pub stale_deployments: Arc<dyn StartupFeature>,
    pub volume_backups: Arc<dyn StartupFeature>,
    pub enterprise_backups: Arc<dyn StartupFeature>,
}

/// Everything the startup graph needs, built once in `main`
#[derive(Clone)]
pub struct StartupContext {
    pub deployment: DeploymentMode,
    pub cluster: Arc<dyn ClusterApi>,
    pub reconciler: Arc<ServiceReconciler>,
    pub datastore: InfraTarget,
    pub cache: InfraTarget,
    pub swarm_advertise_addr: String,
    pub migrator: Arc<dyn SchemaMigrator>,
    pub proxy: Arc<dyn ProxyInstaller>,
    pub features: AuxiliaryFeatures,
    pub notifier: Arc<dyn RestartNotifier>,
    pub listener: Arc<dyn TrafficListener>,
    pub worker: Arc<dyn BackgroundWorker>,
}

fn infra_step(name: &str, reconciler: Arc<ServiceReconciler>, target: InfraTarget) -> BootstrapStep {
    BootstrapStep::fail_fast(name, move || async move {
        reconciler.ensure_healthy(&target).await?;
        Ok(())
    })
}

fn feature_step(name: &str, feature: Arc<dyn StartupFeature>) -> BootstrapStep {
    BootstrapStep::best_effort(name, move || async move {
        feature
            .init()
            .await
            .with_context(|| format!("{} failed to initialize", feature.name()))
    })
}

pub fn bootstrap_steps(ctx: &StartupContext) -> Vec<BootstrapStep> {
    let self_hosted = !ctx.deployment.is_hosted();

    let cluster = ctx.cluster.clone();
    let network = BootstrapStep::fail_fast(INIT_NETWORK, move || async move {
        cluster
            .ensure_network(infra::NETWORK)
            .await
            .context("failed to create platform network")
    });

    let cluster = ctx.cluster.clone();
    let advertise = ctx.swarm_advertise_addr.clone();
    let membership = BootstrapStep::fail_fast(INIT_CLUSTER_MEMBERSHIP, move || async move {
        cluster
            .ensure_swarm(SWARM_LISTEN_ADDR, &advertise)
            .await
            .context("failed to join cluster as manager")
    })
    .depends_on([INIT_NETWORK]);

    let datastore = infra_step(INIT_DATASTORE, ctx.reconciler.clone(), ctx.datastore.clone())
        .depends_on([INIT_CLUSTER_MEMBERSHIP]);

    let cache = infra_step(INIT_CACHE, ctx.reconciler.clone(), ctx.cache.clone())
        .depends_on([INIT_CLUSTER_MEMBERSHIP]);

    let migrator = ctx.migrator.clone();
    let migration = BootstrapStep::fail_fast(RUN_SCHEMA_MIGRATION, move || async move {
        migrator.run_migration().await.context("database migration failed")
    })
    .depends_on([INIT_DATASTORE, INIT_CACHE]);

    let proxy = ctx.proxy.clone();
    let proxy_config = BootstrapStep::fail_fast(WRITE_PROXY_CONFIG, move || async move {
        proxy.write_default_config().await
    })
    .depends_on([RUN_SCHEMA_MIGRATION])
    .when(self_hosted);

    let proxy = ctx.proxy.clone();
    let proxy_service = BootstrapStep::fail_fast(START_REVERSE_PROXY, move || async move {
        proxy.start().await
    })
    .depends_on([WRITE_PROXY_CONFIG])
    .when(self_hosted);

    let features = &ctx.features;
    let auxiliary = [
        (INIT_SCHEDULES, features.schedules.clone()),
        (INIT_BACKUP_CRONS, features.backup_crons.clone()),
        (CANCEL_STALE_DEPLOYMENTS, features.stale_deployments.clone()),
        (INIT_VOLUME_BACKUPS, features.volume_backups.clone()),
    ]
    .into_iter()
    .map(|(name, feature)| {
        feature_step(name, feature)
            .depends_on([START_REVERSE_PROXY])
            .when(self_hosted)
    });

    let notifier = ctx.notifier.clone();
    let notification = BootstrapStep::best_effort(SEND_RESTART_NOTIFICATION, move || async move {
        notifier.notify_restart().await
    })
    .depends_on([
        INIT_SCHEDULES,
        INIT_BACKUP_CRONS,
        CANCEL_STALE_DEPLOYMENTS,
        INIT_VOLUME_BACKUPS,
    ])
    .when(self_hosted);

    let listener = ctx.listener.clone();
    let serve = BootstrapStep::fail_fast(SERVE_TRAFFIC, move || async move {
        listener.open().await.context("failed to open listening socket")
    })
    .depends_on([SEND_RESTART_NOTIFICATION])
    .serves_traffic();

    let enterprise_backups = feature_step(
        INIT_ENTERPRISE_BACKUP_CRONS,
        ctx.features.enterprise_backups.clone(),
    )
    .depends_on([SERVE_TRAFFIC]);

    let worker = ctx.worker.clone();
    let deployment_worker = BootstrapStep::fail_fast(START_DEPLOYMENT_WORKER, move || async move {
        worker.start().await.context("deployment worker could not start")
    })
    .depends_on([INIT_ENTERPRISE_BACKUP_CRONS])
    .when(self_hosted);

    let mut steps = vec![network, membership, datastore, cache, migration, proxy_config, proxy_service];
    steps.extend(auxiliary);
    steps.extend([notification, serve, enterprise_backups, deployment_worker]);
    steps
}
