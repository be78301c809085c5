//! Session orchestration
//!
//! Drives an ordered queue of work items through quota checks, pacing,
//! content resolution, generation, and delivery, aggregating everything into
//! a report. Runs on one dedicated background task; submission and status
//! queries stay responsive on theirs. Cancellation is cooperative, observed
//! only at item boundaries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::Config;
use crate::delivery::DeliveryClient;
use crate::error::RemoteErrorKind;
use crate::extract::extract_post_id;
use crate::generator::ReplyGenerator;
use crate::quota::QuotaTracker;
use crate::store::SharedStore;

/// One unit of outbound work: a post reference plus optional inline context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub reference: String,
    pub context: Option<String>,
}

/// Why an item was skipped. Skips are not failures and are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyProcessed,
    CannotReadContent,
    ContentTooShort,
    DuplicateContent,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::AlreadyProcessed => "already_processed",
            SkipReason::CannotReadContent => "cannot_read_content",
            SkipReason::ContentTooShort => "content_too_short",
            SkipReason::DuplicateContent => "duplicate_content",
        }
    }
}

/// Outcome of one item.
#[derive(Debug, Clone)]
pub enum AttemptOutcome {
    Success { reply: String },
    Skipped(SkipReason),
    Failed(String),
}

/// Terminal state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Completed,
    Stopped,
    Error,
}

/// Aggregated result of one session run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub status: SessionStatus,
    pub posted: u32,
    pub skipped: u32,
    pub failed: u32,
    pub errors: Vec<String>,
    pub succeeded: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl SessionReport {
    fn empty(status: SessionStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            posted: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            succeeded: Vec::new(),
            message: Some(message.into()),
        }
    }
}

/// Pacing and thresholds for a session, derived from [`Config`].
#[derive(Debug, Clone)]
pub struct PacingConfig {
    /// Successes since the last break before the next batch break fires.
    /// Skips and failures do not reset the count.
    pub batch_size: u32,
    /// Batch break bounds, seconds.
    pub batch_break_secs: (u64, u64),
    /// Jitter delay between successes, seconds.
    pub reply_delay_secs: (u64, u64),
    /// Inline context shorter than this forces a fetch; fetched content
    /// shorter than this is skipped.
    pub min_content_len: usize,
}

impl PacingConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            batch_break_secs: (config.batch_break_min, config.batch_break_max),
            reply_delay_secs: (config.reply_delay_min, config.reply_delay_max),
            min_content_len: 5,
        }
    }

    /// No waits, for tests.
    pub fn immediate() -> Self {
        Self {
            batch_size: 10,
            batch_break_secs: (0, 0),
            reply_delay_secs: (0, 0),
            min_content_len: 5,
        }
    }
}

struct HandleInner {
    running: AtomicBool,
    progress: RwLock<Vec<String>>,
    report: RwLock<Option<SessionReport>>,
    cancel: Mutex<Option<CancellationToken>>,
}

/// Shared view of the session: a checked-then-set running flag enforcing the
/// single-session invariant, an append-only timestamped progress log, and
/// the last report. One task writes, any number read snapshots.
#[derive(Clone)]
pub struct SessionHandle {
    inner: Arc<HandleInner>,
}

impl Default for SessionHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                running: AtomicBool::new(false),
                progress: RwLock::new(Vec::new()),
                report: RwLock::new(None),
                cancel: Mutex::new(None),
            }),
        }
    }

    /// Claim the running slot. Returns the new session's cancellation token,
    /// or `None` when a session is already in flight.
    pub fn try_begin(&self) -> Option<CancellationToken> {
        if self
            .inner
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return None;
        }

        let token = CancellationToken::new();
        *self.inner.cancel.lock() = Some(token.clone());
        self.inner.progress.write().clear();
        *self.inner.report.write() = None;
        Some(token)
    }

    /// Store the report and release the running slot.
    pub fn finish(&self, report: SessionReport) {
        *self.inner.report.write() = Some(report);
        *self.inner.cancel.lock() = None;
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Request a cooperative stop. Effective at the next item boundary.
    /// Returns false when nothing is running.
    pub fn request_stop(&self) -> bool {
        let guard = self.inner.cancel.lock();
        match guard.as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Append a timestamped entry to the progress log.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let entry = format!("[{}] {}", chrono::Local::now().format("%H:%M:%S"), message);
        info!("{}", message);
        self.inner.progress.write().push(entry);
    }

    /// Snapshot of the full progress log.
    pub fn progress(&self) -> Vec<String> {
        self.inner.progress.read().clone()
    }

    /// Most recent progress entry.
    pub fn latest(&self) -> Option<String> {
        self.inner.progress.read().last().cloned()
    }

    pub fn last_report(&self) -> Option<SessionReport> {
        self.inner.report.read().clone()
    }
}

/// Orchestrates one session over the queue of work items.
pub struct SessionOrchestrator {
    delivery: DeliveryClient,
    generator: Arc<dyn ReplyGenerator>,
    store: SharedStore,
    quota: QuotaTracker,
    pacing: PacingConfig,
}

impl SessionOrchestrator {
    pub fn new(
        delivery: DeliveryClient,
        generator: Arc<dyn ReplyGenerator>,
        store: SharedStore,
        quota: QuotaTracker,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            delivery,
            generator,
            store,
            quota,
            pacing,
        }
    }

    /// Run a session to completion. Never errors past this boundary: any
    /// internal failure is folded into the report.
    pub async fn run(
        &self,
        items: Vec<WorkItem>,
        target: Option<usize>,
        handle: &SessionHandle,
        cancel: CancellationToken,
    ) -> SessionReport {
        let total = items.len();
        let requested = target.unwrap_or(total);

        let (used, remaining) = match (self.quota.used_today(), self.quota.remaining()) {
            (Ok(used), Ok(remaining)) => (used, remaining as usize),
            (Err(e), _) | (_, Err(e)) => {
                return SessionReport::empty(
                    SessionStatus::Error,
                    format!("quota check failed: {}", e),
                );
            }
        };

        handle.log(format!(
            "Daily status: {}/{} replies used, {} remaining",
            used,
            self.quota.daily_limit(),
            remaining
        ));

        if remaining == 0 {
            // Terminal before any item is touched.
            return SessionReport::empty(
                SessionStatus::Error,
                format!("Daily limit ({}) already reached", self.quota.daily_limit()),
            );
        }

        let effective_target = requested.min(remaining).min(total);
        handle.log(format!(
            "Target: {} replies from {} items provided",
            effective_target, total
        ));

        let mut report = SessionReport {
            status: SessionStatus::Completed,
            posted: 0,
            skipped: 0,
            failed: 0,
            errors: Vec::new(),
            succeeded: Vec::new(),
            message: None,
        };
        let mut successes_since_break = 0u32;

        for (index, item) in items.iter().enumerate() {
            if cancel.is_cancelled() {
                handle.log("Stop requested. Ending session at item boundary");
                report.status = SessionStatus::Stopped;
                break;
            }

            if report.posted as usize >= effective_target {
                handle.log("Target reached");
                break;
            }

            if self.pacing.batch_size > 0 && successes_since_break >= self.pacing.batch_size {
                let pause = draw_secs(self.pacing.batch_break_secs);
                handle.log(format!("Batch break: pausing {}s", pause.as_secs()));
                tokio::time::sleep(pause).await;
                successes_since_break = 0;
            }

            handle.log(format!(
                "Processing {}/{}: {}",
                index + 1,
                total,
                truncate(&item.reference, 60)
            ));

            match self.process_item(item, handle).await {
                AttemptOutcome::Success { reply: _ } => {
                    report.posted += 1;
                    report.succeeded.push(item.reference.clone());
                    successes_since_break += 1;
                    handle.log(format!(
                        "Posted ({}/{})",
                        report.posted, effective_target
                    ));

                    if (report.posted as usize) < effective_target {
                        let delay = draw_secs(self.pacing.reply_delay_secs);
                        handle.log(format!("Human delay: {}s", delay.as_secs()));
                        tokio::time::sleep(delay).await;
                    }
                }
                AttemptOutcome::Skipped(reason) => {
                    report.skipped += 1;
                    handle.log(format!("Skipped: {}", reason.as_str()));
                }
                AttemptOutcome::Failed(detail) => {
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("{}: {}", item.reference, detail));
                    handle.log(format!("Failed: {}", detail));
                }
            }
        }

        handle.log(format!(
            "Session complete. Posted: {}, Skipped: {}, Failed: {}",
            report.posted, report.skipped, report.failed
        ));
        report
    }

    /// One item through the pipeline. Unexpected internal errors are caught
    /// here and become per-item failures, so the loop keeps moving.
    async fn process_item(&self, item: &WorkItem, handle: &SessionHandle) -> AttemptOutcome {
        match self.try_process_item(item, handle).await {
            Ok(outcome) => outcome,
            Err(e) => AttemptOutcome::Failed(format!("unexpected error: {}", e)),
        }
    }

    async fn try_process_item(
        &self,
        item: &WorkItem,
        handle: &SessionHandle,
    ) -> anyhow::Result<AttemptOutcome> {
        if self.store.lock().has_record(&item.reference)? {
            return Ok(AttemptOutcome::Skipped(SkipReason::AlreadyProcessed));
        }

        let Some(post_id) = extract_post_id(&item.reference) else {
            return Ok(AttemptOutcome::Failed("invalid reference".into()));
        };

        // Inline context beyond the minimum bypasses the fetch entirely.
        let content = match item.context.as_deref().map(str::trim) {
            Some(context) if context.len() > self.pacing.min_content_len => {
                handle.log("Using provided context, skipping fetch");
                context.to_string()
            }
            _ => {
                handle.log("Fetching post content");
                match self.delivery.fetch(&post_id).await {
                    Ok(Some(text)) if !text.trim().is_empty() => text,
                    Ok(_) => {
                        return Ok(AttemptOutcome::Skipped(SkipReason::CannotReadContent))
                    }
                    Err(_) => {
                        return Ok(AttemptOutcome::Skipped(SkipReason::CannotReadContent))
                    }
                }
            }
        };

        if content.trim().len() < self.pacing.min_content_len {
            return Ok(AttemptOutcome::Skipped(SkipReason::ContentTooShort));
        }

        let recent = {
            let store = self.store.lock();
            store.recent_outputs(chrono::Local::now().date_naive())?
        };

        handle.log("Generating reply");
        let Some(reply) = self.generator.generate(&content, &recent).await? else {
            return Ok(AttemptOutcome::Failed("reply generation failed".into()));
        };

        handle.log("Posting reply");
        match self.delivery.post(&post_id, &reply).await {
            Ok(()) => {
                {
                    let store = self.store.lock();
                    store.save_record(&item.reference, &post_id, &reply)?;
                    store.save_output(&reply)?;
                }
                self.quota.record_success()?;
                Ok(AttemptOutcome::Success { reply })
            }
            Err(e) if e.kind == RemoteErrorKind::Duplicate => {
                Ok(AttemptOutcome::Skipped(SkipReason::DuplicateContent))
            }
            Err(e) => Ok(AttemptOutcome::Failed(format!("delivery failed: {}", e))),
        }
    }
}

fn draw_secs((min, max): (u64, u64)) -> Duration {
    if max <= min {
        return Duration::from_secs(min);
    }
    Duration::from_secs(rand::thread_rng().gen_range(min..=max))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
