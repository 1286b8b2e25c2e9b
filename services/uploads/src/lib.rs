//! Uploads Service
//!
//! Creates foods, images and peer reviews for a multi-user content app. A
//! record may carry one image, which is compressed by a caller-selected
//! strategy, stored in S3, and referenced from the record's row in PostgreSQL.
//!
//! ## Features
//!
//! - **Pluggable Compression**: store as-is, recompress in-process, or hand the
//!   file to a remote function or edge procedure that compresses and stores it
//! - **Upload-then-Insert Ordering**: a row never references a blob that was not
//!   confirmed stored; an insert failure leaves at most an orphaned blob
//! - **Best-Effort Auditing**: every successful submit is recorded in
//!   `api_usage_records` without affecting the result
//! - **Rate-Limited Reads**: profile listings go through a per-token window
//!   limiter with bounded memory
//!
//! ## Architecture
//!
//! ```text
//!  HTTP (axum)
//!  ┌──────────────┐        ┌──────────────┐
//!  │ submit       │───────▶│ Upload       │
//!  │ endpoints    │        │ Pipeline     │
//!  └──────────────┘        └──────────────┘
//!                            │    │     │
//!            ┌───────────────┘    │     └──────────────┐
//!            ▼                    ▼                    ▼
//!     ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//!     │ Compression  │     │ Object Store │     │ Entity       │
//!     │ (local or    │────▶│ (S3)         │     │ Repository   │
//!     │  remote)     │     └──────────────┘     │ + Audit Sink │
//!     └──────────────┘                          └──────────────┘
//!                                                      ▲
//!  ┌──────────────┐        ┌──────────────┐            │
//!  │ profile read │───────▶│ Rate Limiter │────────────┘
//!  │ endpoint     │        └──────────────┘
//!  └──────────────┘
//! ```

pub mod api;
pub mod audit;
pub mod blob_store;
pub mod compression;
pub mod config;
pub mod entity;
pub mod pipeline;
pub mod rate_limiter;
pub mod remote;
pub mod repository;

pub use api::{AppState, ErrorResponse, SubmitResponse};
pub use audit::{AuditEntry, AuditLog, AuditSink};
pub use blob_store::{ObjectStore, S3ObjectStore};
pub use compression::{CompressionStrategy, ImageCompressor, Placement, UploadFile};
pub use config::Config;
pub use entity::{
    EntityDraft, EntityKind, FoodRecord, ImageRecord, NewEntity, PeerReviewRecord, ValidationError,
    Visibility,
};
pub use pipeline::{PipelineError, SubmitOutcome, UploadPipeline, UploadRequest};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RateLimiterBuilder};
pub use remote::{EdgeFunctionClient, RemoteFunctionClient, RemotePlacement, RemotePlacementError};
pub use repository::{EntityRepository, PgRepository};
