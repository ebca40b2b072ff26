//! Newline-delimited JSON snapshot ingestion
//!
//! Each line is one snapshot, e.g.
//! `{"key": "disk:/:usage", "value": 91.5}`. Blank lines are ignored;
//! malformed lines are logged and skipped.

use klaxon_common::Snapshot;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, info, warn};

use crate::engine::AlertEngine;
use crate::error::Result;

/// Line counts from one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: usize,
    pub rejected: usize,
}

/// Feed every snapshot line from `reader` to the engine until EOF
pub async fn ingest_lines<R>(reader: R, engine: &AlertEngine) -> Result<IngestStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = IngestStats::default();
    let mut line_no = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<Snapshot>(line) {
            Ok(snapshot) if !snapshot.key.trim().is_empty() => {
                let outcomes = engine.ingest(&snapshot);
                debug!(line = line_no, key = %snapshot.key, transitions = outcomes.len(), "Ingested snapshot");
                stats.accepted += 1;
            }
            Ok(_) => {
                warn!(line = line_no, "Skipping snapshot with empty key");
                stats.rejected += 1;
            }
            Err(e) => {
                warn!(line = line_no, "Skipping malformed snapshot: {}", e);
                stats.rejected += 1;
            }
        }
    }

    info!(
        accepted = stats.accepted,
        rejected = stats.rejected,
        "Snapshot input closed"
    );
    Ok(stats)
}

/// Ingest snapshots from standard input
pub async fn ingest_stdin(engine: &AlertEngine) -> Result<IngestStats> {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    ingest_lines(stdin, engine).await
}
