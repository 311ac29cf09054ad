//! Persisting finalized missions.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::snapshot::MissionSnapshot;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Report I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Report serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Destination for finalized mission snapshots.
pub trait ReportSink: Send + Sync {
    /// Persist `snapshot`, returning where it went.
    fn write(&self, snapshot: &MissionSnapshot) -> Result<PathBuf, ReportError>;
}

/// Writes `<dir>/<mission_id>.json`, pretty-printed.
///
/// Missions finalized within the same second share an id; later ones get a
/// `-2`, `-3`, ... suffix instead of overwriting the earlier report.
#[derive(Debug, Clone)]
pub struct JsonReportSink {
    dir: PathBuf,
}

impl JsonReportSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ReportSink for JsonReportSink {
    fn write(&self, snapshot: &MissionSnapshot) -> Result<PathBuf, ReportError> {
        fs::create_dir_all(&self.dir)?;
        let body = serde_json::to_string_pretty(snapshot)?;

        let mut suffix = 1u32;
        loop {
            let name = match suffix {
                1 => format!("{}.json", snapshot.mission_id),
                n => format!("{}-{n}.json", snapshot.mission_id),
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(body.as_bytes())?;
                    file.write_all(b"\n")?;
                    info!(path = %path.display(), "mission report written");
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => suffix += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{MissionAggregator, MissionConfig};
    use rover_perception::OdometryHandle;
    use rover_types::ManualClock;
    use std::sync::Arc;

    fn snapshot() -> MissionSnapshot {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        MissionAggregator::new(MissionConfig::default(), clock, OdometryHandle::default()).finalize()
    }

    #[test]
    fn writes_pretty_json_named_after_mission() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sink = JsonReportSink::new(dir.path().join("reports"));
        let snap = snapshot();

        let path = sink.write(&snap)?;
        assert_eq!(
            path.file_name().and_then(|n| n.to_str()),
            Some(format!("{}.json", snap.mission_id).as_str())
        );
        let text = fs::read_to_string(&path)?;
        assert!(text.contains("\n  \"mission_id\""));
        let back: MissionSnapshot = serde_json::from_str(&text)?;
        assert_eq!(back.mission_id, snap.mission_id);
        Ok(())
    }

    #[test]
    fn same_id_does_not_overwrite() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let sink = JsonReportSink::new(dir.path());
        assert_eq!(sink.dir(), dir.path());
        let snap = snapshot();

        let first = sink.write(&snap)?;
        let second = sink.write(&snap)?;
        assert_ne!(first, second);
        assert!(second.to_string_lossy().ends_with("-2.json"));
        Ok(())
    }
}
