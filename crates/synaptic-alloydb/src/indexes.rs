//! Vector index descriptors and the DDL they compile to.

use std::fmt;

use crate::sql::{quote_ident, TableRef};

/// Suffix appended to the table name to form the default index name.
pub const DEFAULT_INDEX_NAME_SUFFIX: &str = "li_vectorindex";

/// Similarity function used both by an index's operator class and by query
/// ranking. The two must agree or the planner ignores the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DistanceStrategy {
    /// L2 distance, `<->`.
    Euclidean,
    /// Cosine distance, `<=>`.
    #[default]
    CosineDistance,
    /// Negative inner product, `<#>`.
    InnerProduct,
}

impl DistanceStrategy {
    pub const ALL: [DistanceStrategy; 3] = [
        DistanceStrategy::Euclidean,
        DistanceStrategy::CosineDistance,
        DistanceStrategy::InnerProduct,
    ];

    /// pgvector distance operator. Smaller values are always closer.
    pub fn operator(self) -> &'static str {
        match self {
            Self::Euclidean => "<->",
            Self::CosineDistance => "<=>",
            Self::InnerProduct => "<#>",
        }
    }

    /// Operator class for pgvector index families (hnsw, ivfflat, ivf).
    pub fn index_opclass(self) -> &'static str {
        match self {
            Self::Euclidean => "vector_l2_ops",
            Self::CosineDistance => "vector_cosine_ops",
            Self::InnerProduct => "vector_ip_ops",
        }
    }

    /// Operator class for the ScaNN index family.
    pub fn scann_opclass(self) -> &'static str {
        match self {
            Self::Euclidean => "l2",
            Self::CosineDistance => "cosine",
            Self::InnerProduct => "dot_product",
        }
    }

    /// Recover the strategy from an operator class name of either family.
    pub fn from_opclass(opclass: &str) -> Option<Self> {
        let opclass = opclass.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|s| s.index_opclass() == opclass || s.scann_opclass() == opclass)
    }

    /// Convert a raw operator distance into a score where higher means more
    /// similar.
    pub fn similarity(self, distance: f64) -> f32 {
        let score = match self {
            Self::CosineDistance => 1.0 - distance,
            Self::Euclidean => 1.0 / (1.0 + distance),
            Self::InnerProduct => -distance,
        };
        score as f32
    }
}

impl fmt::Display for DistanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Euclidean => "euclidean",
            Self::CosineDistance => "cosine_distance",
            Self::InnerProduct => "inner_product",
        };
        f.write_str(name)
    }
}

/// Vector compression used by the quantized index families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quantizer {
    Flat,
    #[default]
    Sq8,
}

impl Quantizer {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::Sq8 => "sq8",
        }
    }
}

/// The approximate-nearest-neighbor index families and their build parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// pgvector graph index.
    Hnsw { m: u32, ef_construction: u32 },
    /// pgvector inverted file index over raw vectors.
    IvfFlat { lists: u32 },
    /// AlloyDB inverted file index with quantization.
    Ivf { lists: u32, quantizer: Quantizer },
    /// AlloyDB tree-quantized index (`alloydb_scann` extension).
    ScaNN { num_leaves: u32, quantizer: Quantizer },
}

impl IndexKind {
    /// Access method name used in `USING`.
    pub fn access_method(&self) -> &'static str {
        match self {
            Self::Hnsw { .. } => "hnsw",
            Self::IvfFlat { .. } => "ivfflat",
            Self::Ivf { .. } => "ivf",
            Self::ScaNN { .. } => "ScaNN",
        }
    }

    /// Contents of the `WITH (...)` clause.
    pub fn build_options(&self) -> String {
        match self {
            Self::Hnsw { m, ef_construction } => {
                format!("m = {m}, ef_construction = {ef_construction}")
            }
            Self::IvfFlat { lists } => format!("lists = {lists}"),
            Self::Ivf { lists, quantizer } => {
                format!("lists = {lists}, quantizer = {}", quantizer.as_sql())
            }
            Self::ScaNN {
                num_leaves,
                quantizer,
            } => format!("num_leaves = {num_leaves}, quantizer = {}", quantizer.as_sql()),
        }
    }

    /// Partition count driving build memory, for families whose build
    /// memory grows with it.
    pub fn partition_count(&self) -> Option<u32> {
        match self {
            Self::Hnsw { .. } => None,
            Self::IvfFlat { lists } | Self::Ivf { lists, .. } => Some(*lists),
            Self::ScaNN { num_leaves, .. } => Some(*num_leaves),
        }
    }

    /// Extension that provides the access method, when it is not pgvector.
    pub(crate) fn required_extension(&self) -> Option<&'static str> {
        match self {
            Self::ScaNN { .. } => Some("alloydb_scann"),
            _ => None,
        }
    }
}

/// Immutable description of one vector index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorIndex {
    /// Index name. `None` means `{table}li_vectorindex`.
    pub name: Option<String>,
    pub distance_strategy: DistanceStrategy,
    pub kind: IndexKind,
}

impl VectorIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            name: None,
            distance_strategy: DistanceStrategy::default(),
            kind,
        }
    }

    /// HNSW with `m = 16, ef_construction = 64`.
    pub fn hnsw() -> Self {
        Self::new(IndexKind::Hnsw {
            m: 16,
            ef_construction: 64,
        })
    }

    /// IVFFlat with `lists = 100`.
    pub fn ivfflat() -> Self {
        Self::new(IndexKind::IvfFlat { lists: 100 })
    }

    /// IVF with `lists = 100, quantizer = sq8`.
    pub fn ivf() -> Self {
        Self::new(IndexKind::Ivf {
            lists: 100,
            quantizer: Quantizer::Sq8,
        })
    }

    /// ScaNN with `num_leaves = 5, quantizer = sq8`.
    pub fn scann() -> Self {
        Self::new(IndexKind::ScaNN {
            num_leaves: 5,
            quantizer: Quantizer::Sq8,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_distance_strategy(mut self, strategy: DistanceStrategy) -> Self {
        self.distance_strategy = strategy;
        self
    }

    pub fn with_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self
    }

    /// Name this index is created under for `table`.
    pub fn resolved_name(&self, table: &str) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| default_index_name(table))
    }

    fn opclass(&self) -> &'static str {
        match self.kind {
            IndexKind::ScaNN { .. } => self.distance_strategy.scann_opclass(),
            _ => self.distance_strategy.index_opclass(),
        }
    }

    /// `CREATE INDEX` statement for this descriptor.
    ///
    /// Identifiers must already be validated; they are quoted here.
    pub fn create_statement(
        &self,
        table: &TableRef,
        column: &str,
        name: &str,
        concurrently: bool,
    ) -> String {
        format!(
            "CREATE INDEX {concurrently}{name} ON {table} USING {method} ({column} {opclass}) WITH ({options})",
            concurrently = if concurrently { "CONCURRENTLY " } else { "" },
            name = quote_ident(name),
            table = table.qualified(),
            method = self.kind.access_method(),
            column = quote_ident(column),
            opclass = self.opclass(),
            options = self.kind.build_options(),
        )
    }
}

/// `{table}li_vectorindex`
pub fn default_index_name(table: &str) -> String {
    format!("{table}{DEFAULT_INDEX_NAME_SUFFIX}")
}

/// Recommended `maintenance_work_mem` in MB for building an index with
/// `partitions` leaves or lists over `dimensions`-wide vectors.
pub fn maintenance_work_mem_mb(partitions: u32, dimensions: u32) -> u64 {
    const BUFFER_MB: u64 = 1;
    let bytes = 50.0 * f64::from(partitions) * f64::from(dimensions) * 4.0;
    (bytes / 1024.0 / 1024.0).round() as u64 + BUFFER_MB
}

/// Session settings applied before a query to trade recall for speed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexQueryOptions {
    Hnsw {
        ef_search: u32,
    },
    IvfFlat {
        probes: u32,
    },
    Ivf {
        probes: u32,
    },
    ScaNN {
        num_leaves_to_search: u32,
        pre_reordering_num_neighbors: i32,
    },
}

impl IndexQueryOptions {
    /// Defaults matching each family's extension defaults.
    pub fn for_kind(kind: &IndexKind) -> Self {
        match kind {
            IndexKind::Hnsw { .. } => Self::Hnsw { ef_search: 40 },
            IndexKind::IvfFlat { .. } => Self::IvfFlat { probes: 1 },
            IndexKind::Ivf { .. } => Self::Ivf { probes: 1 },
            IndexKind::ScaNN { .. } => Self::ScaNN {
                num_leaves_to_search: 1,
                pre_reordering_num_neighbors: -1,
            },
        }
    }

    /// `SET LOCAL` statements; only meaningful inside a transaction.
    pub fn set_local_statements(&self) -> Vec<String> {
        match self {
            Self::Hnsw { ef_search } => vec![format!("SET LOCAL hnsw.ef_search = {ef_search}")],
            Self::IvfFlat { probes } => vec![format!("SET LOCAL ivfflat.probes = {probes}")],
            Self::Ivf { probes } => vec![format!("SET LOCAL ivf.probes = {probes}")],
            Self::ScaNN {
                num_leaves_to_search,
                pre_reordering_num_neighbors,
            } => vec![
                format!("SET LOCAL scann.num_leaves_to_search = {num_leaves_to_search}"),
                format!("SET LOCAL scann.pre_reordering_num_neighbors = {pre_reordering_num_neighbors}"),
            ],
        }
    }
}

/// Pull the operator class out of a `pg_indexes.indexdef` string.
pub(crate) fn strategy_from_indexdef(indexdef: &str) -> Option<DistanceStrategy> {
    let using = indexdef.find(" USING ")?;
    let rest = &indexdef[using..];
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    let opclass = rest[open + 1..close].split_whitespace().last()?;
    DistanceStrategy::from_opclass(opclass)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TableRef {
        TableRef::new("public", "docs")
    }

    #[test]
    fn hnsw_statement() {
        let sql = VectorIndex::hnsw().create_statement(&table(), "embedding", "docs_idx", false);
        assert_eq!(
            sql,
            "CREATE INDEX \"docs_idx\" ON \"public\".\"docs\" USING hnsw (\"embedding\" vector_cosine_ops) WITH (m = 16, ef_construction = 64)"
        );
    }

    #[test]
    fn ivfflat_concurrent_statement() {
        let sql = VectorIndex::ivfflat()
            .with_distance_strategy(DistanceStrategy::Euclidean)
            .create_statement(&table(), "embedding", "docs_idx", true);
        assert_eq!(
            sql,
            "CREATE INDEX CONCURRENTLY \"docs_idx\" ON \"public\".\"docs\" USING ivfflat (\"embedding\" vector_l2_ops) WITH (lists = 100)"
        );
    }

    #[test]
    fn ivf_statement_carries_quantizer() {
        let sql = VectorIndex::ivf()
            .with_distance_strategy(DistanceStrategy::InnerProduct)
            .create_statement(&table(), "embedding", "i", false);
        assert!(sql.contains("USING ivf (\"embedding\" vector_ip_ops)"));
        assert!(sql.ends_with("WITH (lists = 100, quantizer = sq8)"));
    }

    #[test]
    fn scann_uses_its_own_opclasses() {
        let index = VectorIndex::scann();
        for (strategy, opclass) in [
            (DistanceStrategy::Euclidean, "l2"),
            (DistanceStrategy::CosineDistance, "cosine"),
            (DistanceStrategy::InnerProduct, "dot_product"),
        ] {
            let sql = index
                .clone()
                .with_distance_strategy(strategy)
                .create_statement(&table(), "embedding", "i", false);
            assert!(sql.contains(&format!("USING ScaNN (\"embedding\" {opclass})")), "{sql}");
        }
        assert_eq!(index.kind.required_extension(), Some("alloydb_scann"));
        assert_eq!(VectorIndex::hnsw().kind.required_extension(), None);
    }

    #[test]
    fn default_name_uses_suffix() {
        assert_eq!(VectorIndex::hnsw().resolved_name("docs"), "docsli_vectorindex");
        assert_eq!(
            VectorIndex::hnsw().with_name("secondindex").resolved_name("docs"),
            "secondindex"
        );
    }

    #[test]
    fn operators_match_opclasses() {
        assert_eq!(DistanceStrategy::Euclidean.operator(), "<->");
        assert_eq!(DistanceStrategy::CosineDistance.operator(), "<=>");
        assert_eq!(DistanceStrategy::InnerProduct.operator(), "<#>");
        for strategy in DistanceStrategy::ALL {
            assert_eq!(
                DistanceStrategy::from_opclass(strategy.index_opclass()),
                Some(strategy)
            );
            assert_eq!(
                DistanceStrategy::from_opclass(strategy.scann_opclass()),
                Some(strategy)
            );
        }
        assert_eq!(DistanceStrategy::from_opclass("vector_l1_ops"), None);
    }

    #[test]
    fn similarity_is_higher_for_closer_vectors() {
        for strategy in DistanceStrategy::ALL {
            assert!(strategy.similarity(0.1) > strategy.similarity(0.5), "{strategy}");
        }
        assert_eq!(DistanceStrategy::CosineDistance.similarity(0.0), 1.0);
        assert_eq!(DistanceStrategy::Euclidean.similarity(0.0), 1.0);
        assert_eq!(DistanceStrategy::InnerProduct.similarity(-3.0), 3.0);
    }

    #[test]
    fn work_mem_from_partitions_and_dimensions() {
        assert_eq!(maintenance_work_mem_mb(5, 5), 1);
        assert_eq!(maintenance_work_mem_mb(1000, 768), 147);
        assert_eq!(maintenance_work_mem_mb(0, 768), 1);
    }

    #[test]
    fn partition_counts() {
        assert_eq!(VectorIndex::hnsw().kind.partition_count(), None);
        assert_eq!(VectorIndex::ivfflat().kind.partition_count(), Some(100));
        assert_eq!(VectorIndex::ivf().kind.partition_count(), Some(100));
        assert_eq!(VectorIndex::scann().kind.partition_count(), Some(5));
    }

    #[test]
    fn query_options_render_set_local() {
        assert_eq!(
            IndexQueryOptions::for_kind(&VectorIndex::hnsw().kind).set_local_statements(),
            vec!["SET LOCAL hnsw.ef_search = 40"]
        );
        assert_eq!(
            IndexQueryOptions::IvfFlat { probes: 10 }.set_local_statements(),
            vec!["SET LOCAL ivfflat.probes = 10"]
        );
        assert_eq!(
            IndexQueryOptions::for_kind(&VectorIndex::scann().kind).set_local_statements(),
            vec![
                "SET LOCAL scann.num_leaves_to_search = 1",
                "SET LOCAL scann.pre_reordering_num_neighbors = -1",
            ]
        );
    }

    #[test]
    fn strategy_is_read_back_from_indexdef() {
        let def = "CREATE INDEX docsli_vectorindex ON public.docs USING hnsw (embedding vector_ip_ops) WITH (m='16', ef_construction='64')";
        assert_eq!(strategy_from_indexdef(def), Some(DistanceStrategy::InnerProduct));

        let def = "CREATE INDEX i ON public.docs USING scann (embedding cosine) WITH (num_leaves='5', quantizer='sq8')";
        assert_eq!(strategy_from_indexdef(def), Some(DistanceStrategy::CosineDistance));

        let def = "CREATE UNIQUE INDEX docs_pkey ON public.docs USING btree (node_id)";
        assert_eq!(strategy_from_indexdef(def), None);
    }
}
