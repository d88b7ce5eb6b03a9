use std::sync::Arc;

use crate::async_vector_store::AsyncAlloyDbVectorStore;
use crate::config::VectorStoreConfig;
use crate::engine::AlloyDbEngine;
use crate::error::AlloyDbError;
use crate::filters::MetadataFilters;
use crate::index_manager::ApplyOptions;
use crate::indexes::{DistanceStrategy, VectorIndex};
use crate::node::Node;
use crate::store::{StoreCore, VectorStoreQuery, VectorStoreQueryResult};

/// Blocking vector store.
///
/// Each method blocks the calling thread while the engine's background
/// runtime does the work. Requires an engine built with
/// [`AlloyDbEngine::connect_blocking`]; calls made from inside an async
/// runtime fail with [`AlloyDbError::Unsupported`].
#[derive(Clone)]
pub struct AlloyDbVectorStore {
    engine: AlloyDbEngine,
    core: Arc<StoreCore>,
}

impl AlloyDbVectorStore {
    /// Validate the table described by `config` and build a store on it.
    pub fn create_sync(
        engine: &AlloyDbEngine,
        config: VectorStoreConfig,
    ) -> Result<Self, AlloyDbError> {
        let core = engine.run_as_sync(StoreCore::create(engine.pool().clone(), config))?;
        Ok(Self {
            engine: engine.clone(),
            core: Arc::new(core),
        })
    }

    /// Async handle on the same table and pool.
    pub fn to_async(&self) -> AsyncAlloyDbVectorStore {
        AsyncAlloyDbVectorStore::from_parts(self.engine.clone(), Arc::clone(&self.core))
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.core.config
    }

    pub fn distance_strategy(&self) -> DistanceStrategy {
        self.core.config.distance_strategy
    }

    pub fn engine(&self) -> &AlloyDbEngine {
        &self.engine
    }

    pub fn add(&self, nodes: Vec<Node>) -> Result<Vec<String>, AlloyDbError> {
        self.engine.run_as_sync(self.core.add(nodes))
    }

    pub fn delete(&self, ref_doc_id: &str) -> Result<u64, AlloyDbError> {
        self.engine.run_as_sync(self.core.delete(ref_doc_id))
    }

    pub fn delete_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<u64, AlloyDbError> {
        self.engine
            .run_as_sync(self.core.delete_nodes(node_ids, filters))
    }

    pub fn get_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<Vec<Node>, AlloyDbError> {
        self.engine.run_as_sync(self.core.get_nodes(node_ids, filters))
    }

    pub fn clear(&self) -> Result<(), AlloyDbError> {
        self.engine.run_as_sync(self.core.clear())
    }

    pub fn query(&self, query: VectorStoreQuery) -> Result<VectorStoreQueryResult, AlloyDbError> {
        self.engine.run_as_sync(self.core.query(query))
    }

    pub fn apply_vector_index(
        &self,
        index: &VectorIndex,
        options: ApplyOptions,
    ) -> Result<String, AlloyDbError> {
        self.engine
            .run_as_sync(self.core.apply_vector_index(index, &options))
    }

    pub fn reindex(&self, name: Option<&str>) -> Result<(), AlloyDbError> {
        self.engine.run_as_sync(self.core.reindex(name))
    }

    pub fn drop_vector_index(&self, name: Option<&str>) -> Result<String, AlloyDbError> {
        self.engine.run_as_sync(self.core.drop_vector_index(name))
    }

    pub fn is_valid_index(&self, name: Option<&str>) -> Result<bool, AlloyDbError> {
        self.engine.run_as_sync(self.core.is_valid_index(name))
    }

    pub fn index_distance_strategy(
        &self,
        name: Option<&str>,
    ) -> Result<Option<DistanceStrategy>, AlloyDbError> {
        self.engine
            .run_as_sync(self.core.index_distance_strategy(name))
    }

    pub fn embedding_dimensions(&self) -> Result<Option<u32>, AlloyDbError> {
        self.engine.run_as_sync(self.core.embedding_dimensions())
    }
}
