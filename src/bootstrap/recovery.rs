use chrono::Utc;
use std::path::Path;

/// Record that a failure happened after traffic was exposed.
///
/// Payload is milliseconds since the epoch. Best-effort: a failed write is
/// logged and never blocks the exit that follows. Returns whether the
/// marker was written.
pub async fn write_recovery_marker(path: &Path) -> bool {
    let stamp = Utc::now().timestamp_millis().to_string();

    match tokio::fs::write(path, &stamp).await {
        Ok(()) => {
            tracing::warn!(path = %path.display(), timestamp = %stamp, "Recovery marker written");
            true
        }
        Err(e) => {
            tracing::error!(
                path = %path.display(),
                error = %e,
                "Failed to write recovery marker, probably not running in a container"
            );
            false
        }
    }
}
