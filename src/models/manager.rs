//! Embedding service
//!
//! Owns the loaded encoder and the worker pool for the lifetime of the host
//! process, and exposes the embed entry points. The service is created
//! uninitialized; every entry point reports [`EmbeddingError::NotInitialized`]
//! outside the `initialize` / `shutdown` window.

use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::models::batching::{assemble, embed_chunk, EmbedInput, EmbedOutput, EmbedRequest};
use crate::models::config::EmbeddingConfig;
use crate::models::device::Device;
use crate::models::model::{EmbeddingModel, Encoder};
use crate::models::pool::WorkerPool;
use crate::models::{EmbeddingError, EmbeddingResult};
use crate::onnx::OnnxEncoder;

/// Text embedded once at startup to discover the output dimension
pub const DIMENSION_PROBE: &str = "test";

/// Everything that lives between initialize and shutdown
struct LoadedModel {
    encoder: Arc<dyn Encoder>,
    pool: WorkerPool,
    batch_size: usize,
    dimension: usize,
}

pub struct EmbeddingService {
    config: EmbeddingConfig,
    state: RwLock<Option<Arc<LoadedModel>>>,
}

impl EmbeddingService {
    /// Create an uninitialized service
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            state: RwLock::new(None),
        }
    }

    /// Create and initialize in one step
    pub async fn load(config: EmbeddingConfig) -> EmbeddingResult<Self> {
        let service = Self::new(config);
        service.initialize().await?;
        Ok(service)
    }

    /// Select the device, load the ONNX encoder and start the workers.
    ///
    /// Loading blocks, so it runs on tokio's blocking pool.
    pub async fn initialize(&self) -> EmbeddingResult<()> {
        self.config.validate()?;
        if self.is_initialized() {
            return Err(EmbeddingError::AlreadyInitialized);
        }

        let config = self.config.clone();
        let encoder = tokio::task::spawn_blocking(move || {
            let device = Device::resolve(config.device);
            info!("Using device: {}", device);
            OnnxEncoder::load(&config, device)
        })
        .await
        .map_err(|e| EmbeddingError::ModelLoadFailed {
            model_name: self.config.model.clone(),
            error: format!("loader task failed: {}", e),
        })??;

        self.initialize_with_encoder(Arc::new(encoder)).await
    }

    /// Start serving with an already constructed encoder.
    pub async fn initialize_with_encoder(&self, encoder: Arc<dyn Encoder>) -> EmbeddingResult<()> {
        self.config.validate()?;
        if self.is_initialized() {
            return Err(EmbeddingError::AlreadyInitialized);
        }

        let pool = WorkerPool::new(self.config.resolved_worker_threads())?;

        let probe_encoder = Arc::clone(&encoder);
        let probe = pool.submit(move || embed_chunk(probe_encoder.as_ref(), &[DIMENSION_PROBE.to_string()]))?;
        let probe = match probe.await {
            Ok(probe) => probe,
            Err(_) => {
                release_pool(pool).await;
                return Err(EmbeddingError::ModelLoadFailed {
                    model_name: encoder.name().to_string(),
                    error: "dimension probe task aborted".to_string(),
                });
            }
        };
        let dimension = match probe.map(|vectors| vectors.first().map(Vec::len)) {
            Ok(Some(dimension)) => dimension,
            Ok(None) => {
                release_pool(pool).await;
                return Err(EmbeddingError::ModelLoadFailed {
                    model_name: encoder.name().to_string(),
                    error: "dimension probe returned no embedding".to_string(),
                });
            }
            Err(e) => {
                release_pool(pool).await;
                return Err(EmbeddingError::ModelLoadFailed {
                    model_name: encoder.name().to_string(),
                    error: format!("dimension probe failed: {}", e),
                });
            }
        };
        info!("Embedding dimension: {} ({} workers)", dimension, pool.size());

        let loaded = LoadedModel {
            encoder,
            pool,
            batch_size: self.config.batch_size,
            dimension,
        };

        let rejected = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            if state.is_some() {
                Some(loaded)
            } else {
                *state = Some(Arc::new(loaded));
                None
            }
        };
        if let Some(loaded) = rejected {
            release_pool(loaded.pool).await;
            return Err(EmbeddingError::AlreadyInitialized);
        }
        info!("Embedding service ready");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.state.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    fn loaded(&self) -> EmbeddingResult<Arc<LoadedModel>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(EmbeddingError::NotInitialized)
    }

    /// Embed on the worker pool without blocking the calling task.
    ///
    /// All chunks are queued up front and awaited positionally, so output
    /// order follows input order regardless of completion order. The first
    /// failing chunk fails the whole request; chunks already queued still
    /// run to completion.
    #[instrument(skip_all)]
    pub async fn embed_async(&self, input: EmbedInput) -> EmbeddingResult<EmbedOutput> {
        let model = self.loaded()?;
        let request = EmbedRequest::from(input);
        debug!(texts = request.len(), single = request.is_single(), "Embedding request");

        let (chunks, single) = request.into_chunks(model.batch_size);
        let mut pending = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            let encoder = Arc::clone(&model.encoder);
            pending.push(model.pool.submit(move || embed_chunk(encoder.as_ref(), &chunk))?);
        }

        let mut results = Vec::with_capacity(pending.len());
        for (index, receiver) in pending.into_iter().enumerate() {
            let vectors = receiver
                .await
                .map_err(|_| EmbeddingError::inference(format!("chunk {} task aborted", index)))?
                .map_err(|e| {
                    warn!("Chunk {} failed: {}", index, e);
                    e
                })?;
            results.push(vectors);
        }

        assemble(single, results)
    }

    /// Embed on the calling thread, chunk by chunk.
    #[instrument(skip_all)]
    pub fn embed_sync(&self, input: EmbedInput) -> EmbeddingResult<EmbedOutput> {
        let model = self.loaded()?;
        let (chunks, single) = EmbedRequest::from(input).into_chunks(model.batch_size);
        let results = chunks
            .iter()
            .map(|chunk| embed_chunk(model.encoder.as_ref(), chunk))
            .collect::<EmbeddingResult<Vec<_>>>()?;
        assemble(single, results)
    }

    /// Output dimension measured by the startup probe
    pub fn embedding_dimension(&self) -> EmbeddingResult<usize> {
        Ok(self.loaded()?.dimension)
    }

    pub fn device(&self) -> Option<Device> {
        self.loaded().ok().map(|model| model.encoder.device())
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    /// Release the worker pool, waiting for in-flight chunks. Safe to call
    /// more than once.
    pub async fn shutdown(&self) -> EmbeddingResult<()> {
        let loaded = self.state.write().unwrap_or_else(PoisonError::into_inner).take();
        let Some(loaded) = loaded else {
            debug!("Shutdown requested on an uninitialized service");
            return Ok(());
        };

        info!("Shutting down embedding service");
        tokio::task::spawn_blocking(move || loaded.pool.shutdown())
            .await
            .map_err(EmbeddingError::inference)?;
        Ok(())
    }
}

/// Join the pool's threads off the async runtime.
async fn release_pool(pool: WorkerPool) {
    if let Err(e) = tokio::task::spawn_blocking(move || pool.shutdown()).await {
        warn!("Worker pool shutdown task failed: {}", e);
    }
}

#[async_trait]
impl EmbeddingModel for EmbeddingService {
    fn model_name(&self) -> &str {
        EmbeddingService::model_name(self)
    }

    fn device(&self) -> Option<Device> {
        EmbeddingService::device(self)
    }

    fn is_ready(&self) -> bool {
        self.is_initialized()
    }

    fn embedding_dimension(&self) -> EmbeddingResult<usize> {
        EmbeddingService::embedding_dimension(self)
    }

    async fn embed(&self, input: EmbedInput) -> EmbeddingResult<EmbedOutput> {
        self.embed_async(input).await
    }
}
