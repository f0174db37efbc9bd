use crate::report::ReportCollector;
use crate::sample::{CheckResult, IterationOutcome, IterationRecord, RequestSample, SampleTags};
use influxdb::{InfluxDbWriteable, Query, Timestamp, WriteQuery};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

/// Write every record to disk in the InfluxDB line protocol format.
///
/// The file is named `<run name>-<run id>.influx` and can be shipped to InfluxDB by Telegraf
/// after the run.
pub struct InfluxFileReportCollector {
    run_id: String,
    join_handle: JoinHandle<()>,
    writer: Option<UnboundedSender<WriteQuery>>,
    flush_complete: Arc<AtomicBool>,
}

impl InfluxFileReportCollector {
    pub fn new(runtime: &Handle, dir: PathBuf, run_id: String, run_name: String) -> Self {
        let flush_complete = Arc::new(AtomicBool::new(false));
        let (writer, receiver) = tokio::sync::mpsc::unbounded_channel();

        let path = dir.join(format!("{run_name}-{run_id}.influx"));
        let join_handle = runtime.spawn(write_task(
            dir,
            path,
            receiver,
            flush_complete.clone(),
        ));

        Self {
            run_id,
            join_handle,
            writer: Some(writer),
            flush_complete,
        }
    }

    fn try_send(&self, query: WriteQuery) {
        let Some(writer) = &self.writer else {
            log::info!("Failed to record metric because the reporter has been finalized");
            return;
        };

        if let Err(e) = writer.send(query) {
            if self.flush_complete.load(Ordering::Relaxed) {
                log::info!(
                    "Failed to record metric because the write task has finished: {}",
                    e
                );
            } else {
                log::warn!("Failed to record metric: {}", e);
            }
        }
    }

    fn tagged(&self, query: WriteQuery, tags: &SampleTags) -> WriteQuery {
        let query = query
            .add_tag("run_id", self.run_id.clone())
            .add_tag("scenario", tags.scenario.clone())
            .add_tag("vu_id", tags.vu_id.to_string());

        // Line protocol does not allow empty tag values
        if tags.group.is_empty() {
            query
        } else {
            query.add_tag("group", tags.group.clone())
        }
    }
}

impl ReportCollector for InfluxFileReportCollector {
    fn add_request(&mut self, sample: &RequestSample) {
        let query = timestamp(sample.timestamp)
            .into_query("gale.http_req")
            .add_field("duration_ms", sample.duration.as_micros() as f64 / 1000.0)
            .add_field("status", sample.status as u64)
            .add_field("failed", sample.failed)
            .add_tag("method", sample.method.clone())
            .add_tag("name", sample.name.clone());

        let query = self.tagged(query, &sample.tags);
        self.try_send(query);
    }

    fn add_check(&mut self, check: &CheckResult) {
        let query = timestamp(check.timestamp)
            .into_query("gale.check")
            .add_field("passed", check.passed)
            .add_tag("name", check.name.clone());

        let query = self.tagged(query, &check.tags);
        self.try_send(query);
    }

    fn add_iteration(&mut self, iteration: &IterationRecord) {
        let outcome = match iteration.outcome {
            IterationOutcome::Completed => "completed",
            IterationOutcome::Failed => "failed",
            IterationOutcome::Interrupted => "interrupted",
        };

        let query = timestamp(iteration.timestamp)
            .into_query("gale.iteration")
            .add_field("duration_ms", iteration.duration.as_micros() as f64 / 1000.0)
            .add_tag("outcome", outcome);

        let query = self.tagged(query, &iteration.tags);
        self.try_send(query);
    }

    fn finalize(&mut self) {
        // Closing the channel lets the write task drain what is left and exit
        self.writer.take();

        let wait_started = Instant::now();
        let mut notify_timer = Instant::now();
        while !self.flush_complete.load(Ordering::Relaxed) {
            if notify_timer.elapsed().as_secs() > 10 {
                log::warn!(
                    "Still waiting for metrics to flush after {} seconds.",
                    wait_started.elapsed().as_secs()
                );
                notify_timer = Instant::now();
            }

            // The write task failed, nothing more will be flushed
            if self.join_handle.is_finished() {
                break;
            }

            std::thread::sleep(Duration::from_millis(100));
        }

        log::debug!(
            "Metrics flushed after {} seconds",
            wait_started.elapsed().as_secs()
        );
    }
}

fn timestamp(at: SystemTime) -> Timestamp {
    Timestamp::Nanoseconds(
        at.duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos(),
    )
}

async fn write_task(
    dir: PathBuf,
    path: PathBuf,
    mut receiver: UnboundedReceiver<WriteQuery>,
    flush_complete: Arc<AtomicBool>,
) {
    if let Err(e) = tokio::fs::create_dir_all(&dir).await {
        log::error!("Could not create metrics directory {}: {}", dir.display(), e);
        return;
    }

    let file = match File::options()
        .create_new(true)
        .write(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            log::error!("Could not create metrics file {}: {}", path.display(), e);
            return;
        }
    };
    let mut file = BufWriter::new(file);

    let mut write_count = 0u64;
    while let Some(query) = receiver.recv().await {
        if let Err(e) = write_query(&mut file, query).await {
            log::error!("Failed to write metric to {}: {:?}", path.display(), e);
            return;
        }

        write_count += 1;
        if write_count % 10_000 == 0 {
            log::debug!("Written {} metrics", write_count);
        }
    }

    if let Err(e) = file.flush().await {
        log::error!("Failed to flush metrics to {}: {}", path.display(), e);
        return;
    }

    log::debug!("Wrote {} metrics to {}", write_count, path.display());

    flush_complete.store(true, Ordering::Relaxed);
}

#[inline]
async fn write_query<W>(writer: &mut W, query: WriteQuery) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let query_str = query.build()?.get();
    writer.write_all(query_str.as_bytes()).await?;
    writer.write_all(b"\n").await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_line_protocol_file() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let dir = tempfile::tempdir().unwrap();

        let mut collector = InfluxFileReportCollector::new(
            runtime.handle(),
            dir.path().join("metrics"),
            "abc".to_string(),
            "trade".to_string(),
        );

        let mut tags = SampleTags::new("full_trade_lifecycle", 3);
        collector.add_request(&RequestSample {
            method: "POST".to_string(),
            url: "http://localhost/items".to_string(),
            name: "/items".to_string(),
            status: 201,
            duration: Duration::from_millis(12),
            timestamp: SystemTime::now(),
            failed: false,
            error: None,
            tags: tags.clone(),
        });
        tags.group = "List Item".to_string();
        collector.add_check(&CheckResult {
            name: "item listed".to_string(),
            passed: true,
            timestamp: SystemTime::now(),
            tags,
        });
        collector.finalize();

        let content =
            std::fs::read_to_string(dir.path().join("metrics").join("trade-abc.influx")).unwrap();
        let lines = content.lines().collect::<Vec<_>>();
        assert_eq!(2, lines.len());
        assert!(lines[0].starts_with("gale.http_req,"));
        assert!(lines[0].contains("scenario=full_trade_lifecycle"));
        assert!(lines[1].starts_with("gale.check,"));
        assert!(lines[1].contains("passed=true"));
    }
}
