//! Record sources -- newline-delimited JSON, one raw record per line.
//!
//! Kafka (or any other transport) stays an external collaborator; the
//! pipeline only sees a stream of raw JSON values. Blank lines are
//! skipped; lines that are not valid JSON are forwarded as JSON nulls so
//! the normalizer can count them as malformed.

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::Value;
use std::path::Path;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, warn};

/// Read NDJSON from a file (or stdin for `-`) into the raw-record channel.
/// Returns once the input is exhausted; dropping the sender signals
/// end-of-stream to the pipeline.
pub async fn read_ndjson(path: &str, tx: mpsc::Sender<Value>) -> Result<()> {
    if path == "-" {
        let stream = FramedRead::new(tokio::io::stdin(), LinesCodec::new());
        forward_lines(stream, tx).await
    } else {
        let file = tokio::fs::File::open(Path::new(path))
            .await
            .with_context(|| format!("cannot open log source {path}"))?;
        let stream = FramedRead::new(file, LinesCodec::new());
        forward_lines(stream, tx).await
    }
}

async fn forward_lines<R>(
    mut stream: FramedRead<R, LinesCodec>,
    tx: mpsc::Sender<Value>,
) -> Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = 0u64;
    while let Some(line) = stream.next().await {
        let line = line.context("log source read failed")?;
        if line.trim().is_empty() {
            continue;
        }
        let value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable source line");
                Value::Null
            }
        };
        lines += 1;
        // Backpressure: if the aggregator falls behind, this send blocks
        // instead of buffering unboundedly.
        if tx.send(value).await.is_err() {
            debug!("pipeline closed; stopping source");
            break;
        }
    }
    debug!(lines, "log source exhausted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_reads_lines_and_skips_blanks() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"a\": 1}}").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "{{\"a\": 2}}").unwrap();
        file.flush().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        read_ndjson(file.path().to_str().unwrap(), tx).await.unwrap();

        assert_eq!(rx.recv().await.unwrap()["a"], 1);
        assert_eq!(rx.recv().await.unwrap()["a"], 2);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_bad_json_becomes_null() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "not json at all").unwrap();
        file.flush().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        read_ndjson(file.path().to_str().unwrap(), tx).await.unwrap();
        assert!(rx.recv().await.unwrap().is_null());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let (tx, _rx) = mpsc::channel(8);
        assert!(read_ndjson("/nonexistent/logs.ndjson", tx).await.is_err());
    }
}
