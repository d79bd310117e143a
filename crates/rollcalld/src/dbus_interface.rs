use crate::pipeline::{PipelineError, PipelineHandle, PipelineState};
use crate::snapshot;
use rollcall_core::AttendanceLedger;
use std::path::PathBuf;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pipeline: PipelineHandle,
    ledger: AttendanceLedger,
}

impl AttendanceService {
    pub fn new(pipeline: PipelineHandle, ledger: AttendanceLedger) -> Self {
        Self { pipeline, ledger }
    }
}

fn command_error(e: PipelineError) -> zbus::fdo::Error {
    match e {
        PipelineError::InvalidTransition { .. } => zbus::fdo::Error::NotSupported(e.to_string()),
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

fn reply(result: Result<PipelineState, PipelineError>) -> zbus::fdo::Result<String> {
    result.map(|state| state.to_string()).map_err(command_error)
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Open the camera and begin recognizing. Returns the new state.
    async fn start(&self) -> zbus::fdo::Result<String> {
        tracing::info!("start requested");
        reply(self.pipeline.start().await)
    }

    /// Release the camera and clear the session. The ledger is kept.
    async fn stop(&self) -> zbus::fdo::Result<String> {
        tracing::info!("stop requested");
        reply(self.pipeline.stop().await)
    }

    /// Hide the preview; recognition continues.
    async fn pause(&self) -> zbus::fdo::Result<String> {
        reply(self.pipeline.pause().await)
    }

    async fn resume(&self) -> zbus::fdo::Result<String> {
        reply(self.pipeline.resume().await)
    }

    /// Return pipeline status as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snap = self.pipeline.snapshot();
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "state": snap.state,
            "counters": snap.counters,
            "last_error": snap.last_error,
            "sequence": snap.sequence,
            "frame": snap.frame.as_ref().map(|f| serde_json::json!({
                "sequence": f.frame.sequence,
                "captured_at": f.frame.captured_at.to_rfc3339(),
                "detected": f.detected,
                "overlays": f.overlays,
            })),
        })
        .to_string())
    }

    /// Attendance summary for the current session as JSON.
    async fn summary(&self) -> zbus::fdo::Result<String> {
        serde_json::to_string(&self.pipeline.snapshot().summary())
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Every ledger row as a JSON array.
    async fn ledger(&self) -> zbus::fdo::Result<String> {
        let ledger = self.ledger.clone();
        let records = tokio::task::spawn_blocking(move || ledger.records())
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::IOError(e.to_string()))?;
        serde_json::to_string(&records).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Write the latest annotated frame to `path` as PNG.
    async fn save_snapshot(&self, path: &str) -> zbus::fdo::Result<String> {
        let target = PathBuf::from(path);
        if !target.is_absolute() {
            return Err(zbus::fdo::Error::InvalidArgs(format!(
                "snapshot path must be absolute: {path}"
            )));
        }
        let Some(annotated) = self.pipeline.snapshot().frame.clone() else {
            return Err(zbus::fdo::Error::Failed(
                snapshot::SnapshotError::NoFrame.to_string(),
            ));
        };

        let out = target.clone();
        tokio::task::spawn_blocking(move || snapshot::save_png(&annotated, &out))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;

        tracing::info!(path = %target.display(), "snapshot saved");
        Ok(target.display().to_string())
    }
}
