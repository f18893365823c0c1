//! herald - demo composition root for the school-administration job queue.
//!
//! Registers mail, report and backup processors, enqueues a batch of jobs,
//! waits until every job is terminal and prints the final snapshots and
//! stats as JSON.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use herald_core::{
    EnqueueOptions, JobContext, JobId, JobPayload, Processor, ProcessorError, QueueConfig,
    QueueServiceBuilder, processor_fn,
};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const BACKUP: &str = "school.backup.run.v1";

#[derive(Parser, Debug)]
#[command(name = "herald")]
struct Args {
    /// Path to TOML queue configuration.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of parent notification mails to enqueue.
    #[arg(long, default_value_t = 3)]
    emails: u32,

    /// How many mail sends fail before the transport "recovers".
    #[arg(long, default_value_t = 1)]
    fail_first: u32,

    /// Give up waiting for jobs after this many seconds.
    #[arg(long, default_value_t = 60)]
    wait_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SendMail {
    to: String,
    subject: String,
}

impl JobPayload for SendMail {
    const TYPE: &'static str = "school.mail.send.v1";
}

/// Fails the first `n` sends, then succeeds.
struct SendMailProcessor {
    remaining_failures: AtomicU32,
}

impl SendMailProcessor {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Processor<SendMail> for SendMailProcessor {
    async fn process(&self, job: JobContext<SendMail>) -> Result<(), ProcessorError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(ProcessorError::failed(format!(
                "smtp relay unavailable (left={left})"
            )));
        }

        sleep(Duration::from_millis(50)).await;
        info!(job_id = %job.id, to = %job.payload.to, subject = %job.payload.subject, "mail sent");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GenerateReport {
    class_id: u32,
    term: String,
}

impl JobPayload for GenerateReport {
    const TYPE: &'static str = "school.report.generate.v1";
}

struct GenerateReportProcessor;

#[async_trait]
impl Processor<GenerateReport> for GenerateReportProcessor {
    async fn process(&self, job: JobContext<GenerateReport>) -> Result<(), ProcessorError> {
        sleep(Duration::from_millis(200)).await;
        info!(
            job_id = %job.id,
            class_id = job.payload.class_id,
            term = %job.payload.term,
            "report generated"
        );
        Ok(())
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => QueueConfig::load(path)
            .with_context(|| format!("loading queue config from {}", path.display()))?,
        None => QueueConfig::default(),
    };

    // (A) processors を登録して service を構築
    let service = QueueServiceBuilder::new()
        .config(config)
        .register::<SendMail, _>(SendMailProcessor::new(args.fail_first))
        .register::<GenerateReport, _>(GenerateReportProcessor)
        .register_dyn(
            BACKUP,
            processor_fn(|job| async move {
                let target = job.payload["target"].as_str().unwrap_or("all").to_string();
                sleep(Duration::from_millis(100)).await;
                info!(job_id = %job.id, %target, "backup finished");
                Ok(())
            }),
        )
        .expect_types(&[SendMail::TYPE, GenerateReport::TYPE, BACKUP])
        .build()?;

    // (B) job 投入
    let mut ids: Vec<JobId> = Vec::new();
    for n in 1..=args.emails {
        let mail = SendMail {
            to: format!("parent{n}@example.com"),
            subject: "Report card pickup".to_string(),
        };
        ids.push(service.enqueue(&mail, EnqueueOptions::new())?);
    }
    for (class_id, priority) in [(101, 0), (102, 10)] {
        let report = GenerateReport {
            class_id,
            term: "2024-autumn".to_string(),
        };
        ids.push(service.enqueue(&report, EnqueueOptions::new().priority(priority))?);
    }
    ids.push(service.enqueue_json(
        BACKUP,
        serde_json::json!({ "target": "gradebook" }),
        EnqueueOptions::new().delay(Duration::from_secs(2)),
    ));
    info!(count = ids.len(), "jobs enqueued");

    // (C) 全 job が終端状態になるまでポーリング
    let deadline = Instant::now() + Duration::from_secs(args.wait_secs);
    loop {
        let done = ids.iter().all(|id| {
            service
                .job_status(*id)
                .is_none_or(|job| job.status.is_terminal())
        });
        if done {
            break;
        }
        if Instant::now() >= deadline {
            warn!(wait_secs = args.wait_secs, "gave up waiting for jobs");
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }

    // (D) 結果を出力
    let snapshots: Vec<_> = ids.iter().filter_map(|id| service.job_status(*id)).collect();
    println!("{}", serde_json::to_string_pretty(&snapshots)?);
    println!("{}", serde_json::to_string_pretty(&service.all_stats())?);

    // (E) graceful shutdown
    service.shutdown().await;
    Ok(())
}
