//! replybot
//!
//! Quota-aware reply automation agent for X/Twitter.
//!
//! # Features
//!
//! - **Session orchestration**: ordered work queue with cooperative stop and
//!   observable progress
//! - **Daily quota**: calendar-day reply budget enforced before and during runs
//! - **Resilient delivery**: classification-driven retries, shared rate-limit
//!   cooldown, one-shot reconnect on auth failures
//! - **Human pacing**: batch breaks and jittered delays between replies
//! - **Duplicate avoidance**: generated replies checked against today's output
//! - **Control surface**: small HTTP API for run/status/stop/history
//!
//! # Architecture
//!
//! ```text
//! HTTP API ──► SessionOrchestrator ──► DeliveryClient ──► X API
//!                    │                      │
//!                    ├── QuotaTracker       ├── ErrorClassifier
//!                    ├── ReplyGenerator     └── CooldownGate (shared)
//!                    └── Store (SQLite)
//! ```

pub mod classify;
pub mod config;
pub mod cooldown;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod generator;
pub mod quota;
pub mod remote;
pub mod server;
pub mod session;
pub mod store;

pub use classify::{classify, Category, Classification};
pub use config::Config;
pub use cooldown::CooldownGate;
pub use delivery::{DeliveryClient, DeliveryConfig};
pub use error::{RemoteError, RemoteErrorKind};
pub use extract::{extract_post_id, parse_work_items};
pub use generator::{OpenAiGenerator, ReplyGenerator};
pub use quota::QuotaTracker;
pub use remote::{RemoteService, XApiClient};
pub use server::{build_router, serve, AppState};
pub use session::{
    AttemptOutcome, PacingConfig, SessionHandle, SessionOrchestrator, SessionReport,
    SessionStatus, SkipReason, WorkItem,
};
pub use store::{SharedStore, Store};
