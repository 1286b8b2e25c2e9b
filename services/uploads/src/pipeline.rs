//! Upload-and-persist pipeline.
//!
//! Sequence for one request:
//!
//! ```text
//! Validating ──▶ StrategySelected ──▶ Compressing ──▶ Uploading ──▶ Persisting ──▶ Completed
//!     │                │ (remote)          │               │              │
//!     │                └── remote call ────┼───────────────┤              │
//!     ▼                                    ▼               ▼              ▼
//! ValidationFailed               CompressionFailed   UploadFailed   PersistFailed
//! ```
//!
//! A blob is always stored before its row is inserted, and no row is inserted
//! after a failed store. If the insert fails the blob stays behind as an
//! orphan; a row never points at a missing blob.

use crate::audit::{AuditEntry, AuditLog, AuditSink};
use crate::blob_store::{content_type_for, derive_blob_path, ObjectStore};
use crate::compression::{
    CompressionError, CompressionStrategy, ImageCompressor, Placement, UploadFile,
};
use crate::config::UploadsConfig;
use crate::entity::{EntityDraft, EntityKind, NewEntity, ValidationError, Visibility};
use crate::remote::RemotePlacement;
use crate::repository::EntityRepository;
use anyhow::anyhow;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

/// A request to create one entity, optionally with an attached image
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub owner_id: String,
    pub entity: EntityDraft,
    pub file: Option<UploadFile>,
    pub strategy: CompressionStrategy,
    pub visibility: Visibility,
}

/// Pipeline states, used for logging and failure labels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validating,
    StrategySelected,
    Compressing,
    Uploading,
    Persisting,
    Completed,
}

impl PipelineStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStage::Validating => "validating",
            PipelineStage::StrategySelected => "strategy_selected",
            PipelineStage::Compressing => "compressing",
            PipelineStage::Uploading => "uploading",
            PipelineStage::Persisting => "persisting",
            PipelineStage::Completed => "completed",
        }
    }
}

/// Terminal failure of a pipeline run
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Compression failed: {0}")]
    Compression(#[from] CompressionError),

    /// Nothing was stored
    #[error("Upload failed ({strategy}): {reason}")]
    Upload {
        strategy: CompressionStrategy,
        reason: String,
    },

    /// The blob at `orphaned_path`, if any, is left without a row
    #[error("Persist failed: {reason}")]
    Persist {
        orphaned_path: Option<String>,
        reason: String,
    },
}

impl PipelineError {
    /// State the pipeline failed from
    pub fn stage(&self) -> PipelineStage {
        match self {
            PipelineError::Validation(_) => PipelineStage::Validating,
            PipelineError::Compression(_) => PipelineStage::Compressing,
            PipelineError::Upload { .. } => PipelineStage::Uploading,
            PipelineError::Persist { .. } => PipelineStage::Persisting,
        }
    }

    /// Message safe to show the caller; the detailed cause is only logged
    pub fn user_message(&self, kind: EntityKind) -> String {
        match self {
            PipelineError::Validation(e) => e.to_string(),
            PipelineError::Compression(_) => "Failed to process image".to_string(),
            PipelineError::Upload { .. } | PipelineError::Persist { .. } => {
                format!("Failed to add {}", kind.label())
            }
        }
    }
}

/// Successful pipeline run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub id: i64,
    pub kind: EntityKind,
    /// Stored blob referenced by the new row
    pub blob_path: Option<String>,
}

/// Orchestrates validation, compression, upload, insert and audit for one request
pub struct UploadPipeline {
    store: Arc<dyn ObjectStore>,
    repository: Arc<dyn EntityRepository>,
    audit: AuditLog,
    compressor: ImageCompressor,
    remote_function: Arc<dyn RemotePlacement>,
    remote_edge: Arc<dyn RemotePlacement>,
    max_image_size: u64,
    step_timeout: Duration,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        repository: Arc<dyn EntityRepository>,
        audit_sink: Arc<dyn AuditSink>,
        remote_function: Arc<dyn RemotePlacement>,
        remote_edge: Arc<dyn RemotePlacement>,
        config: &UploadsConfig,
    ) -> Self {
        Self {
            store,
            repository,
            audit: AuditLog::new(audit_sink, config.step_timeout()),
            compressor: ImageCompressor::new(config.compression_quality),
            remote_function,
            remote_edge,
            max_image_size: config.max_image_size_bytes,
            step_timeout: config.step_timeout(),
        }
    }

    /// Run one request to a terminal state
    #[instrument(
        skip(self, request),
        fields(
            owner_id = %request.owner_id,
            kind = request.entity.kind().label(),
            strategy = %request.strategy,
            has_file = request.file.is_some()
        )
    )]
    pub async fn submit(&self, request: UploadRequest) -> Result<SubmitOutcome, PipelineError> {
        metrics::counter!("uploads.submitted").increment(1);
        let started = Instant::now();

        let result = self.run(request).await;
        metrics::histogram!("uploads.duration_seconds").record(started.elapsed().as_secs_f64());

        match &result {
            Ok(outcome) => {
                info!(
                    id = outcome.id,
                    blob_path = ?outcome.blob_path,
                    "Entity stored successfully"
                );
            }
            Err(e) => {
                error!(stage = e.stage().as_str(), error = %e, "Upload pipeline failed");
                metrics::counter!("uploads.failed", "stage" => e.stage().as_str()).increment(1);
            }
        }

        result
    }

    async fn run(&self, request: UploadRequest) -> Result<SubmitOutcome, PipelineError> {
        self.validate(&request)?;

        let UploadRequest {
            owner_id,
            entity,
            file,
            strategy,
            visibility,
        } = request;
        let kind = entity.kind();

        let blob_path = match file {
            Some(file) => Some(self.place(strategy, file, &owner_id).await?),
            None => {
                debug!("No file attached, skipping compression and upload");
                None
            }
        };

        debug!(stage = PipelineStage::Persisting.as_str(), "Inserting entity");
        let new_entity = NewEntity {
            owner_id,
            is_public: visibility.is_public(),
            blob_path,
            draft: entity,
        };

        let id = match self.bounded(self.repository.insert(&new_entity)).await {
            Ok(id) => id,
            Err(e) => {
                if let Some(ref path) = new_entity.blob_path {
                    warn!(path = %path, "Insert failed after upload, blob left orphaned");
                }
                return Err(PipelineError::Persist {
                    orphaned_path: new_entity.blob_path,
                    reason: format!("{e:#}"),
                });
            }
        };

        debug!(stage = PipelineStage::Completed.as_str(), id, "Entity inserted");
        self.audit
            .record_best_effort(AuditEntry::new(&new_entity.owner_id, kind.api_name()))
            .await;

        Ok(SubmitOutcome {
            id,
            kind,
            blob_path: new_entity.blob_path,
        })
    }

    fn validate(&self, request: &UploadRequest) -> Result<(), ValidationError> {
        if request.owner_id.trim().is_empty() {
            return Err(ValidationError::MissingOwner);
        }

        request.entity.validate()?;

        if let Some(ref file) = request.file {
            let kind = request.entity.kind();
            if !kind.accepts_file() {
                return Err(ValidationError::FileNotAccepted(kind.label()));
            }
            if file.size() > self.max_image_size {
                return Err(ValidationError::FileTooLarge {
                    size_bytes: file.size(),
                    max_bytes: self.max_image_size,
                });
            }
        }

        Ok(())
    }

    /// Run the selected strategy and make sure the blob ends up stored.
    /// Returns the stored path.
    async fn place(
        &self,
        strategy: CompressionStrategy,
        file: UploadFile,
        owner_id: &str,
    ) -> Result<String, PipelineError> {
        debug!(stage = PipelineStage::StrategySelected.as_str(), %strategy, "Running strategy");

        let content_type = file
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(&file.filename).to_string());

        let placement = match strategy {
            CompressionStrategy::Raw => Placement::Staged {
                path: derive_blob_path(false, owner_id, &file.filename),
                bytes: file.bytes,
                content_type,
            },
            CompressionStrategy::Client => {
                debug!(stage = PipelineStage::Compressing.as_str(), size_bytes = file.bytes.len());
                let path = derive_blob_path(true, owner_id, &file.filename);
                let bytes = self.compressor.compress_blocking(file.bytes).await?;
                Placement::Staged {
                    bytes,
                    path,
                    content_type,
                }
            }
            CompressionStrategy::RemoteFunction => {
                self.place_remotely(strategy, self.remote_function.as_ref(), &file, owner_id)
                    .await?
            }
            CompressionStrategy::RemoteEdge => {
                self.place_remotely(strategy, self.remote_edge.as_ref(), &file, owner_id)
                    .await?
            }
        };

        debug!(
            stage = PipelineStage::StrategySelected.as_str(),
            path = placement.path(),
            staged = matches!(placement, Placement::Staged { .. }),
            "Blob placement ready"
        );

        match placement {
            Placement::Stored { path } => Ok(path),
            Placement::Staged {
                bytes,
                path,
                content_type,
            } => {
                debug!(stage = PipelineStage::Uploading.as_str(), path = %path);
                let size_bytes = bytes.len() as u64;
                let stored = self
                    .bounded(self.store.upload(&path, bytes, &content_type))
                    .await
                    .map_err(|e| PipelineError::Upload {
                        strategy,
                        reason: format!("{e:#}"),
                    })?;
                metrics::counter!("uploads.bytes_stored").increment(size_bytes);
                Ok(stored)
            }
        }
    }

    async fn place_remotely(
        &self,
        strategy: CompressionStrategy,
        placer: &dyn RemotePlacement,
        file: &UploadFile,
        owner_id: &str,
    ) -> Result<Placement, PipelineError> {
        let path = self
            .bounded(async { placer.place(file, owner_id).await.map_err(anyhow::Error::from) })
            .await
            .map_err(|e| PipelineError::Upload {
                strategy,
                reason: format!("{e:#}"),
            })?;

        Ok(Placement::Stored { path })
    }

    /// Apply the step timeout; elapsing counts as the step's failure
    async fn bounded<T, F>(&self, step: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        tokio::time::timeout(self.step_timeout, step)
            .await
            .map_err(|_| anyhow!("timed out after {:?}", self.step_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MockAuditSink;
    use crate::blob_store::MockObjectStore;
    use crate::compression::tests::jpeg_bytes;
    use crate::entity::{FoodDraft, ImageDraft, PeerReviewDraft};
    use crate::remote::{MockRemotePlacement, RemotePlacementError};
    use crate::repository::MockEntityRepository;
    use parking_lot::Mutex;

    const MIB: u64 = 1024 * 1024;

    struct Mocks {
        store: MockObjectStore,
        repository: MockEntityRepository,
        audit: MockAuditSink,
        remote_function: MockRemotePlacement,
        remote_edge: MockRemotePlacement,
    }

    impl Mocks {
        /// Remote strategies are never expected unless a test says so
        fn new() -> Self {
            let mut remote_function = MockRemotePlacement::new();
            remote_function.expect_place().never();
            let mut remote_edge = MockRemotePlacement::new();
            remote_edge.expect_place().never();

            let mut audit = MockAuditSink::new();
            audit.expect_record().returning(|_| Ok(()));

            Self {
                store: MockObjectStore::new(),
                repository: MockEntityRepository::new(),
                audit,
                remote_function,
                remote_edge,
            }
        }

        fn build(self) -> UploadPipeline {
            UploadPipeline::new(
                Arc::new(self.store),
                Arc::new(self.repository),
                Arc::new(self.audit),
                Arc::new(self.remote_function),
                Arc::new(self.remote_edge),
                &UploadsConfig::default(),
            )
        }
    }

    fn food_request(strategy: CompressionStrategy, file: Option<UploadFile>) -> UploadRequest {
        UploadRequest {
            owner_id: "user-1".to_string(),
            entity: EntityDraft::Food(FoodDraft {
                name: "Char kway teow".to_string(),
                description: Some("Smoky".to_string()),
                rating: 4,
            }),
            file,
            strategy,
            visibility: Visibility::Public,
        }
    }

    fn sized_jpeg(declared_size: u64) -> UploadFile {
        let mut file = UploadFile::new(jpeg_bytes(64, 64), "lunch.jpg");
        file.declared_size = declared_size;
        file
    }

    #[tokio::test]
    async fn test_no_file_skips_storage() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks
            .repository
            .expect_insert()
            .withf(|entity| entity.blob_path.is_none() && entity.is_public)
            .times(1)
            .returning(|_| Ok(7));

        let outcome = mocks
            .build()
            .submit(food_request(CompressionStrategy::Raw, None))
            .await
            .unwrap();

        assert_eq!(outcome.id, 7);
        assert_eq!(outcome.kind, EntityKind::Food);
        assert_eq!(outcome.blob_path, None);
    }

    #[tokio::test]
    async fn test_client_strategy_compresses_then_uploads() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_upload()
            .withf(|path, _, content_type| {
                path.starts_with("compressed_")
                    && path.ends_with("_user-1_lunch.jpg")
                    && content_type == "image/jpeg"
            })
            .times(1)
            .returning(|path, _, _| Ok(path.to_string()));
        mocks
            .repository
            .expect_insert()
            .withf(|entity| {
                entity
                    .blob_path
                    .as_deref()
                    .is_some_and(|p| p.starts_with("compressed_"))
            })
            .times(1)
            .returning(|_| Ok(1));

        let outcome = mocks
            .build()
            .submit(food_request(CompressionStrategy::Client, Some(sized_jpeg(2 * MIB))))
            .await
            .unwrap();

        assert!(outcome.blob_path.unwrap().contains("compressed_"));
    }

    #[tokio::test]
    async fn test_oversize_file_rejected_before_any_call() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.repository.expect_insert().never();

        let result = mocks
            .build()
            .submit(food_request(CompressionStrategy::Client, Some(sized_jpeg(6 * MIB))))
            .await;

        match result {
            Err(PipelineError::Validation(ValidationError::FileTooLarge {
                size_bytes,
                max_bytes,
            })) => {
                assert_eq!(size_bytes, 6 * MIB);
                assert_eq!(max_bytes, 5 * MIB);
            }
            other => panic!("expected FileTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversize_file_never_reaches_remote_strategy() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.repository.expect_insert().never();

        let result = mocks
            .build()
            .submit(food_request(
                CompressionStrategy::RemoteFunction,
                Some(sized_jpeg(5 * MIB + 1)),
            ))
            .await;

        assert!(matches!(result, Err(PipelineError::Validation(_))));
    }

    #[tokio::test]
    async fn test_upload_failure_inserts_nothing() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_upload()
            .times(1)
            .returning(|_, _, _| Err(anyhow!("bucket unavailable")));
        mocks.repository.expect_insert().never();

        let pipeline = mocks.build();
        let err = pipeline
            .submit(food_request(CompressionStrategy::Raw, Some(sized_jpeg(MIB))))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Upload {
                strategy: CompressionStrategy::Raw,
                ..
            }
        ));
        assert_eq!(err.stage(), PipelineStage::Uploading);
        assert_eq!(err.user_message(EntityKind::Food), "Failed to add food");
    }

    #[tokio::test]
    async fn test_raw_strategy_keeps_bytes_and_omits_marker() {
        let file = sized_jpeg(MIB);
        let original = file.bytes.clone();

        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_upload()
            .withf(move |path, bytes, _| !path.starts_with("compressed_") && bytes == &original)
            .times(1)
            .returning(|path, _, _| Ok(path.to_string()));
        mocks.repository.expect_insert().times(1).returning(|_| Ok(3));

        let outcome = mocks
            .build()
            .submit(food_request(CompressionStrategy::Raw, Some(file)))
            .await
            .unwrap();

        assert!(outcome.blob_path.unwrap().ends_with("_user-1_lunch.jpg"));
    }

    #[tokio::test]
    async fn test_compression_failure_stops_pipeline() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.repository.expect_insert().never();

        let file = UploadFile::new(b"plain text, not an image".to_vec(), "notes.jpg");
        let err = mocks
            .build()
            .submit(food_request(CompressionStrategy::Client, Some(file)))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Compression(_)));
        assert_eq!(err.user_message(EntityKind::Food), "Failed to process image");
    }

    #[tokio::test]
    async fn test_remote_function_skips_pipeline_upload() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.remote_function.checkpoint();
        mocks
            .remote_function
            .expect_place()
            .withf(|file, owner| file.filename == "lunch.jpg" && owner == "user-1")
            .times(1)
            .returning(|_, _| Ok("compressed_remote_user-1_lunch.jpg".to_string()));
        mocks
            .repository
            .expect_insert()
            .withf(|entity| {
                entity.blob_path.as_deref() == Some("compressed_remote_user-1_lunch.jpg")
            })
            .times(1)
            .returning(|_| Ok(11));

        let outcome = mocks
            .build()
            .submit(food_request(
                CompressionStrategy::RemoteFunction,
                Some(sized_jpeg(MIB)),
            ))
            .await
            .unwrap();

        assert_eq!(outcome.id, 11);
    }

    #[tokio::test]
    async fn test_remote_edge_skips_pipeline_upload() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.remote_edge.checkpoint();
        mocks
            .remote_edge
            .expect_place()
            .withf(|file, owner| file.filename == "lunch.jpg" && owner == "user-1")
            .times(1)
            .returning(|_, _| Ok("images/compressed_edge_user-1_lunch.jpg".to_string()));
        mocks
            .repository
            .expect_insert()
            .withf(|entity| {
                entity.blob_path.as_deref() == Some("images/compressed_edge_user-1_lunch.jpg")
            })
            .times(1)
            .returning(|_| Ok(12));

        let outcome = mocks
            .build()
            .submit(food_request(CompressionStrategy::RemoteEdge, Some(sized_jpeg(MIB))))
            .await
            .unwrap();

        assert_eq!(outcome.id, 12);
        assert_eq!(
            outcome.blob_path.as_deref(),
            Some("images/compressed_edge_user-1_lunch.jpg")
        );
    }

    #[tokio::test]
    async fn test_remote_edge_failure_is_upload_failure() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.repository.expect_insert().never();
        mocks.remote_edge.checkpoint();
        mocks
            .remote_edge
            .expect_place()
            .times(1)
            .returning(|_, _| Err(RemotePlacementError::Rejected("bad image".to_string())));

        let err = mocks
            .build()
            .submit(food_request(CompressionStrategy::RemoteEdge, Some(sized_jpeg(MIB))))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Upload {
                strategy: CompressionStrategy::RemoteEdge,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_change_outcome() {
        let mut mocks = Mocks::new();
        mocks.audit.checkpoint();
        mocks
            .audit
            .expect_record()
            .times(1)
            .returning(|_| Err(anyhow!("api_usage_records unavailable")));
        mocks.repository.expect_insert().times(1).returning(|_| Ok(5));

        let outcome = mocks
            .build()
            .submit(food_request(CompressionStrategy::Raw, None))
            .await
            .unwrap();

        assert_eq!(outcome.id, 5);
    }

    #[tokio::test]
    async fn test_audit_records_api_name() {
        let mut mocks = Mocks::new();
        mocks.audit.checkpoint();
        mocks
            .audit
            .expect_record()
            .withf(|entry| entry.called_by == "user-1" && entry.api_name == "add_image")
            .times(1)
            .returning(|_| Ok(()));
        mocks.repository.expect_insert().times(1).returning(|_| Ok(2));

        let request = UploadRequest {
            owner_id: "user-1".to_string(),
            entity: EntityDraft::Image(ImageDraft::default()),
            file: None,
            strategy: CompressionStrategy::Client,
            visibility: Visibility::Private,
        };

        mocks.build().submit(request).await.unwrap();
    }

    #[tokio::test]
    async fn test_persist_failure_reports_orphan() {
        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_upload()
            .times(1)
            .returning(|path, _, _| Ok(path.to_string()));
        mocks
            .repository
            .expect_insert()
            .times(1)
            .returning(|_| Err(anyhow!("unique violation")));
        mocks.audit.checkpoint();
        mocks.audit.expect_record().never();

        let err = mocks
            .build()
            .submit(food_request(CompressionStrategy::Raw, Some(sized_jpeg(MIB))))
            .await
            .unwrap_err();

        match err {
            PipelineError::Persist { orphaned_path, .. } => {
                assert!(orphaned_path.unwrap().ends_with("_user-1_lunch.jpg"));
            }
            other => panic!("expected Persist, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_same_filename_gets_distinct_paths() {
        let paths = Arc::new(Mutex::new(Vec::new()));
        let recorded = paths.clone();

        let mut mocks = Mocks::new();
        mocks
            .store
            .expect_upload()
            .times(2)
            .returning(move |path, _, _| {
                recorded.lock().push(path.to_string());
                Ok(path.to_string())
            });
        mocks.repository.expect_insert().times(2).returning(|_| Ok(1));

        let pipeline = mocks.build();
        for _ in 0..2 {
            pipeline
                .submit(food_request(CompressionStrategy::Raw, Some(sized_jpeg(MIB))))
                .await
                .unwrap();
        }

        let paths = paths.lock();
        assert_eq!(paths.len(), 2);
        assert_ne!(paths[0], paths[1]);
    }

    #[tokio::test]
    async fn test_peer_review_rejects_file() {
        let mut mocks = Mocks::new();
        mocks.store.expect_upload().never();
        mocks.repository.expect_insert().never();

        let request = UploadRequest {
            owner_id: "user-1".to_string(),
            entity: EntityDraft::PeerReview(PeerReviewDraft::default()),
            file: Some(sized_jpeg(MIB)),
            strategy: CompressionStrategy::Raw,
            visibility: Visibility::Private,
        };

        let err = mocks.build().submit(request).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::FileNotAccepted("peer review"))
        ));
    }

    #[tokio::test]
    async fn test_missing_owner_rejected() {
        let mut mocks = Mocks::new();
        mocks.repository.expect_insert().never();

        let mut request = food_request(CompressionStrategy::Raw, None);
        request.owner_id = " ".to_string();

        let err = mocks.build().submit(request).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::MissingOwner)
        ));
    }

    #[tokio::test]
    async fn test_step_timeout_is_failure() {
        let mut config = UploadsConfig::default();
        config.step_timeout_secs = 0;
        let pipeline = UploadPipeline::new(
            Arc::new(MockObjectStore::new()),
            Arc::new(MockEntityRepository::new()),
            Arc::new(MockAuditSink::new()),
            Arc::new(MockRemotePlacement::new()),
            Arc::new(MockRemotePlacement::new()),
            &config,
        );

        let result: anyhow::Result<()> = pipeline.bounded(std::future::pending()).await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
    }
}
