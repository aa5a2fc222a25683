//! Common test utilities for integration tests
//!
//! Shared engine setup used across the integration suites.

#![allow(dead_code)]

use dataforge_core::stages::{QualityModel, StageRegistry};
use dataforge_core::storage::MemoryStore;
use dataforge_core::{DataForge, Dataset, EngineConfig};
use std::sync::Arc;

/// Engine backed by an in-memory artifact store
pub struct TestEngine {
    pub forge: DataForge,
    pub store: Arc<MemoryStore>,
}

impl TestEngine {
    pub fn start() -> Self {
        Self::with_config(EngineConfig::test())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let forge = DataForge::builder(config)
            .with_store(store.clone())
            .build()
            .expect("test engine config is valid");
        Self { forge, store }
    }

    /// Engine whose stage library is `stages`
    pub fn with_stages(stages: StageRegistry) -> Self {
        Self::with_stages_and_config(stages, EngineConfig::test())
    }

    pub fn with_stages_and_config(stages: StageRegistry, config: EngineConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let forge = DataForge::builder(config)
            .with_store(store.clone())
            .with_stage_registry(Arc::new(stages))
            .build()
            .expect("test engine config is valid");
        Self { forge, store }
    }

    /// Engine that scores quality with `model`
    pub fn with_quality_model(model: Arc<dyn QualityModel>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let forge = DataForge::builder(EngineConfig::test())
            .with_store(store.clone())
            .with_quality_model(model)
            .build()
            .expect("test engine config is valid");
        Self { forge, store }
    }

    /// Ingest a payload and assert it became ready
    pub async fn ready_dataset(&self, filename: &str, bytes: Vec<u8>) -> Dataset {
        self.forge
            .ingest_bytes(filename, bytes, None, None)
            .await
            .expect("fixture ingests")
    }
}
