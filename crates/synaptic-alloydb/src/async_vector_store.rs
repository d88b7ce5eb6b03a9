use std::sync::Arc;

use async_trait::async_trait;
use synaptic_core::{Document, Embeddings, SynapticError, VectorStore};

use crate::config::VectorStoreConfig;
use crate::engine::AlloyDbEngine;
use crate::error::AlloyDbError;
use crate::filters::MetadataFilters;
use crate::index_manager::ApplyOptions;
use crate::indexes::{DistanceStrategy, VectorIndex};
use crate::node::Node;
use crate::store::{StoreCore, VectorStoreQuery, VectorStoreQueryResult};

/// Vector store for async callers.
///
/// Construct with [`create`](Self::create); the table layout is checked once
/// and every later call trusts it. When the engine owns a background runtime
/// all work runs there, so the store can be driven from any executor.
#[derive(Clone)]
pub struct AsyncAlloyDbVectorStore {
    engine: AlloyDbEngine,
    core: Arc<StoreCore>,
}

impl AsyncAlloyDbVectorStore {
    /// Validate the table described by `config` and build a store on it.
    pub async fn create(
        engine: &AlloyDbEngine,
        config: VectorStoreConfig,
    ) -> Result<Self, AlloyDbError> {
        let pool = engine.pool().clone();
        let core = engine
            .run_as_async(async move { StoreCore::create(pool, config).await })
            .await?;
        Ok(Self::from_parts(engine.clone(), Arc::new(core)))
    }

    pub(crate) fn from_parts(engine: AlloyDbEngine, core: Arc<StoreCore>) -> Self {
        Self { engine, core }
    }

    pub fn config(&self) -> &VectorStoreConfig {
        &self.core.config
    }

    /// Strategy used when a query does not name one.
    pub fn distance_strategy(&self) -> DistanceStrategy {
        self.core.config.distance_strategy
    }

    pub fn engine(&self) -> &AlloyDbEngine {
        &self.engine
    }

    async fn run<F, Fut, T>(&self, f: F) -> Result<T, AlloyDbError>
    where
        F: FnOnce(Arc<StoreCore>) -> Fut,
        Fut: std::future::Future<Output = Result<T, AlloyDbError>> + Send + 'static,
        T: Send + 'static,
    {
        self.engine.run_as_async(f(Arc::clone(&self.core))).await
    }

    /// Insert nodes and return their ids. Every node needs an embedding.
    pub async fn add(&self, nodes: Vec<Node>) -> Result<Vec<String>, AlloyDbError> {
        self.run(|core| async move { core.add(nodes).await }).await
    }

    /// Delete all nodes belonging to the source document `ref_doc_id`.
    pub async fn delete(&self, ref_doc_id: &str) -> Result<u64, AlloyDbError> {
        let ref_doc_id = ref_doc_id.to_string();
        self.run(|core| async move { core.delete(&ref_doc_id).await })
            .await
    }

    /// Delete nodes by id and/or metadata filter. A no-op when both are `None`.
    pub async fn delete_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<u64, AlloyDbError> {
        self.run(|core| async move { core.delete_nodes(node_ids, filters).await })
            .await
    }

    /// Fetch nodes by id and/or metadata filter; every node when both are `None`.
    pub async fn get_nodes(
        &self,
        node_ids: Option<Vec<String>>,
        filters: Option<MetadataFilters>,
    ) -> Result<Vec<Node>, AlloyDbError> {
        self.run(|core| async move { core.get_nodes(node_ids, filters).await })
            .await
    }

    /// Remove every node.
    pub async fn clear(&self) -> Result<(), AlloyDbError> {
        self.run(|core| async move { core.clear().await }).await
    }

    pub async fn query(
        &self,
        query: VectorStoreQuery,
    ) -> Result<VectorStoreQueryResult, AlloyDbError> {
        self.run(|core| async move { core.query(query).await }).await
    }

    /// Build `index` on the embedding column and return the name it was
    /// created under.
    pub async fn apply_vector_index(
        &self,
        index: &VectorIndex,
        options: ApplyOptions,
    ) -> Result<String, AlloyDbError> {
        let index = index.clone();
        self.run(|core| async move { core.apply_vector_index(&index, &options).await })
            .await
    }

    /// Rebuild `name`, or the default index when `None`.
    pub async fn reindex(&self, name: Option<&str>) -> Result<(), AlloyDbError> {
        let name = name.map(str::to_string);
        self.run(|core| async move { core.reindex(name.as_deref()).await })
            .await
    }

    /// Drop `name`, or the default index when `None`. Idempotent.
    pub async fn drop_vector_index(&self, name: Option<&str>) -> Result<String, AlloyDbError> {
        let name = name.map(str::to_string);
        self.run(|core| async move { core.drop_vector_index(name.as_deref()).await })
            .await
    }

    /// Whether the index exists and is ready to serve queries.
    pub async fn is_valid_index(&self, name: Option<&str>) -> Result<bool, AlloyDbError> {
        let name = name.map(str::to_string);
        self.run(|core| async move { core.is_valid_index(name.as_deref()).await })
            .await
    }

    /// Strategy an existing index was built for.
    pub async fn index_distance_strategy(
        &self,
        name: Option<&str>,
    ) -> Result<Option<DistanceStrategy>, AlloyDbError> {
        let name = name.map(str::to_string);
        self.run(|core| async move { core.index_distance_strategy(name.as_deref()).await })
            .await
    }

    /// Declared width of the embedding column.
    pub async fn embedding_dimensions(&self) -> Result<Option<u32>, AlloyDbError> {
        self.run(|core| async move { core.embedding_dimensions().await })
            .await
    }
}

#[async_trait]
impl VectorStore for AsyncAlloyDbVectorStore {
    async fn add_documents(
        &self,
        docs: Vec<Document>,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<String>, SynapticError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
        let vectors = embeddings.embed_documents(&texts).await?;
        if vectors.len() != docs.len() {
            return Err(SynapticError::Embedding(format!(
                "expected {} embeddings, got {}",
                docs.len(),
                vectors.len()
            )));
        }
        let nodes = docs
            .into_iter()
            .zip(vectors)
            .map(|(doc, vector)| Node::from_document(doc, vector))
            .collect();
        Ok(self.add(nodes).await?)
    }

    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<Document>, SynapticError> {
        let results = self.similarity_search_with_score(query, k, embeddings).await?;
        Ok(results.into_iter().map(|(doc, _)| doc).collect())
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
        embeddings: &dyn Embeddings,
    ) -> Result<Vec<(Document, f32)>, SynapticError> {
        let vector = embeddings.embed_query(query).await?;
        let result = self.query(VectorStoreQuery::new(vector, k)).await?;
        Ok(result.into_scored_documents())
    }

    async fn similarity_search_by_vector(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<Document>, SynapticError> {
        let result = self
            .query(VectorStoreQuery::new(embedding.to_vec(), k))
            .await?;
        Ok(result.nodes.into_iter().map(Node::into_document).collect())
    }

    async fn delete(&self, ids: &[&str]) -> Result<(), SynapticError> {
        if ids.is_empty() {
            return Ok(());
        }
        let ids = ids.iter().map(|id| id.to_string()).collect();
        self.delete_nodes(Some(ids), None).await?;
        Ok(())
    }

    async fn delete_ref_doc(&self, ref_doc_id: &str) -> Result<(), SynapticError> {
        AsyncAlloyDbVectorStore::delete(self, ref_doc_id).await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), SynapticError> {
        AsyncAlloyDbVectorStore::clear(self).await?;
        Ok(())
    }
}
