use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::event::parse_line;
use crate::reader::MetricsReader;

/// Reads NDJSON half-events from the configured source and appends them to
/// the current window, batching consecutive lines.
///
/// Malformed lines are logged and skipped; ingest never stops over bad
/// input. Returns once the source is exhausted or the token is cancelled.
pub async fn run(cfg: IngestConfig, reader: Arc<MetricsReader>, ctx: CancellationToken) -> Result<()> {
    if cfg.source == "-" {
        info!("ingesting events from stdin");
        pump(BufReader::new(tokio::io::stdin()), cfg.batch_size, &reader, &ctx).await
    } else {
        info!(source = %cfg.source, "ingesting events from file");
        let file = tokio::fs::File::open(&cfg.source)
            .await
            .with_context(|| format!("opening event source {}", cfg.source))?;
        pump(BufReader::new(file), cfg.batch_size, &reader, &ctx).await
    }
}

async fn pump<R>(
    source: R,
    batch_size: usize,
    reader: &MetricsReader,
    ctx: &CancellationToken,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = source.lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut parsed: u64 = 0;
    let mut dropped: u64 = 0;

    loop {
        tokio::select! {
            _ = ctx.cancelled() => break,

            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match parse_line(&line) {
                            Ok(event) => {
                                batch.push(event);
                                parsed += 1;
                                if batch.len() >= batch_size {
                                    let full = std::mem::replace(
                                        &mut batch,
                                        Vec::with_capacity(batch_size),
                                    );
                                    reader.put_batch(full);
                                }
                            }
                            Err(e) => {
                                dropped += 1;
                                warn!(error = %e, "dropping malformed event line");
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => return Err(e).context("reading event line"),
                }
            }
        }
    }

    if !batch.is_empty() {
        reader.put_batch(batch);
    }

    info!(parsed, dropped, "event ingest finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetricsConfig;

    const W: i64 = 1_535_065_340_000;

    #[tokio::test]
    async fn test_pump_parses_and_batches_lines() {
        let reader = MetricsReader::new(MetricsConfig::default(), W);
        let ctx = CancellationToken::new();

        let data = concat!(
            r#"{"rid":"A","tid":"T1","Operation":"shardquery","st":1535065340330}"#,
            "\n",
            r#"{"rid":"A","tid":"T1","Operation":"shardquery","et":1535065340625}"#,
            "\n",
            "not json\n",
            "\n",
        );

        pump(BufReader::new(data.as_bytes()), 2, &reader, &ctx)
            .await
            .expect("pump");

        let snap = reader.current_snapshot().expect("current");
        assert_eq!(snap.len(), 2);
        assert_eq!(snap.fetch_latency()[0].lat, 295);
    }

    #[tokio::test]
    async fn test_pump_flushes_partial_batch_at_eof() {
        let reader = MetricsReader::new(MetricsConfig::default(), W);
        let ctx = CancellationToken::new();

        let data = r#"{"rid":"B","tid":"T2","Operation":"shardfetch","st":1535065342000}"#;

        pump(BufReader::new(data.as_bytes()), 256, &reader, &ctx)
            .await
            .expect("pump");

        let snap = reader.current_snapshot().expect("current");
        assert_eq!(snap.len(), 1);
    }
}
