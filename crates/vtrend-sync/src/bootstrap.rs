use std::sync::Arc;

use tracing::{info, warn};
use vtrend_adapters::{MetricsSourceAdapter, ProviderRegistry, YouTubeMetricsProvider};
use vtrend_storage::{MemoryStore, PgStore, StatsBackend};

use crate::config::{PipelineConfig, StorageBackend};
use crate::context::PipelineContext;
use crate::error::{PipelineError, PipelineResult};
use crate::StatsPipeline;

/// Opens storage, registers providers and assembles the pipeline. Any failure
/// here is an initialization error; nothing is returned half-built.
pub async fn build_pipeline(config: &PipelineConfig) -> PipelineResult<StatsPipeline> {
    let store = open_store(config).await?;
    let registry = build_registry(config)?;
    let ctx = PipelineContext::new(store, MetricsSourceAdapter::new(registry))
        .with_bucket_offset(config.bucket_offset()?)
        .with_fleet_concurrency(config.fleet_concurrency);
    info!(
        storage = ?config.storage_backend,
        bucket_offset = %ctx.bucket_offset,
        fleet_concurrency = ctx.fleet_concurrency,
        "pipeline initialized"
    );
    Ok(StatsPipeline::new(ctx))
}

pub async fn build_pipeline_from_env() -> PipelineResult<(PipelineConfig, StatsPipeline)> {
    let config = PipelineConfig::from_env()?;
    let pipeline = build_pipeline(&config).await?;
    Ok((config, pipeline))
}

/// Connects and migrates Postgres, or returns an empty in-memory store.
pub async fn open_store(config: &PipelineConfig) -> PipelineResult<Arc<dyn StatsBackend>> {
    match config.storage_backend {
        StorageBackend::Memory => {
            warn!("using the in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StorageBackend::Postgres => {
            let store = PgStore::connect(&config.database_url, config.max_db_connections)
                .await
                .map_err(|e| PipelineError::initialization(format!("connecting to postgres: {e}")))?;
            store
                .migrate()
                .await
                .map_err(|e| PipelineError::initialization(format!("running migrations: {e}")))?;
            Ok(Arc::new(store))
        }
    }
}

fn build_registry(config: &PipelineConfig) -> PipelineResult<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    match config.youtube_settings() {
        Some(settings) => {
            let provider = YouTubeMetricsProvider::from_settings(&settings).map_err(|e| {
                PipelineError::initialization(format!("building youtube provider: {e:#}"))
            })?;
            registry.register(Arc::new(provider));
            info!(base_url = %settings.base_url, "youtube provider registered");
        }
        None if config.youtube_enabled => {
            warn!("YOUTUBE_API_KEY is not set; youtube view counts will not be refreshed");
        }
        None => info!("youtube reconciliation disabled"),
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vtrend_core::Platform;

    fn memory_config() -> PipelineConfig {
        PipelineConfig {
            storage_backend: StorageBackend::Memory,
            bucket_utc_offset: Some("+09:00".to_string()),
            ..PipelineConfig::default()
        }
    }

    #[tokio::test]
    async fn missing_key_runs_without_youtube() {
        let pipeline = build_pipeline(&memory_config()).await.unwrap();
        assert!(pipeline.health().providers.is_empty());
        assert_eq!(pipeline.context().bucket_offset.local_minus_utc(), 9 * 3600);
    }

    #[tokio::test]
    async fn configured_key_registers_youtube() {
        let config = PipelineConfig {
            youtube_api_key: Some("test-key".to_string()),
            ..memory_config()
        };
        let pipeline = build_pipeline(&config).await.unwrap();
        assert_eq!(pipeline.health().providers, vec![Platform::Youtube]);
    }

    #[tokio::test]
    async fn disabled_youtube_ignores_the_key() {
        let config = PipelineConfig {
            youtube_api_key: Some("test-key".to_string()),
            youtube_enabled: false,
            ..memory_config()
        };
        let pipeline = build_pipeline(&config).await.unwrap();
        assert!(pipeline.health().providers.is_empty());
    }
}
