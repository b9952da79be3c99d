use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::bootstrap::RestartNotifier;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestartNotification {
    pub event: &'static str,
    pub boot_id: Uuid,
    pub version: String,
    pub restarted_at: DateTime<Utc>,
}

impl RestartNotification {
    pub fn new(boot_id: Uuid, version: impl Into<String>) -> Self {
        Self {
            event: "control-plane-restarted",
            boot_id,
            version: version.into(),
            restarted_at: Utc::now(),
        }
    }
}

/// Publishes the restart event; delivery to operators happens downstream
pub struct RedisRestartNotifier {
    redis_url: String,
    channel: String,
    boot_id: Uuid,
    version: String,
}

impl RedisRestartNotifier {
    pub fn new(
        redis_url: impl Into<String>,
        channel: impl Into<String>,
        boot_id: Uuid,
        version: impl Into<String>,
    ) -> Self {
        Self {
            redis_url: redis_url.into(),
            channel: channel.into(),
            boot_id,
            version: version.into(),
        }
    }
}

#[async_trait]
impl RestartNotifier for RedisRestartNotifier {
    async fn notify_restart(&self) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&RestartNotification::new(self.boot_id, &self.version))?;

        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .context("cannot reach notification channel")?;
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(&payload)
            .query_async(&mut conn)
            .await?;

        tracing::info!(channel = %self.channel, receivers = receivers, "Restart notification sent");
        Ok(())
    }
}
