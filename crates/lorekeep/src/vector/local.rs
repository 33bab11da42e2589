//! In-process partitioned cosine index
//!
//! The deployment-grade engines sit behind the same trait; this one backs
//! bring-up and the test suite. Brute-force dot product over normalized
//! vectors, with an optional JSON snapshot so restarts keep the index.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use crate::error::{Error, Result};

use super::{partition_name, vector_pk, VectorHit, VectorIndex, VectorRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    document_id: i64,
    chunk_index: i64,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexState {
    dimension: Option<usize>,
    /// partition name -> pk -> vector
    partitions: HashMap<String, BTreeMap<i64, StoredVector>>,
}

pub struct LocalVectorIndex {
    state: RwLock<IndexState>,
    snapshot_path: Option<PathBuf>,
}

impl LocalVectorIndex {
    /// Open the index, loading the snapshot when one exists.
    pub fn open(snapshot_path: Option<PathBuf>) -> Result<Self> {
        let state = match &snapshot_path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                serde_json::from_str(&raw)
                    .map_err(|e| Error::vector(format!("corrupt vector snapshot: {e}")))?
            }
            _ => IndexState::default(),
        };
        Ok(Self {
            state: RwLock::new(state),
            snapshot_path,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            state: RwLock::new(IndexState::default()),
            snapshot_path: None,
        }
    }

    /// Persist after mutations; losing a snapshot only costs a rebuild.
    fn save(&self, state: &IndexState) {
        let Some(path) = &self.snapshot_path else {
            return;
        };
        let result = (|| -> Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let raw = serde_json::to_string(state)
                .map_err(|e| Error::vector(format!("cannot serialize index: {e}")))?;
            std::fs::write(path, raw)?;
            Ok(())
        })();
        if let Err(e) = result {
            tracing::warn!("vector snapshot write failed: {e}");
        }
    }

    fn check_dimension(state: &IndexState, vector_len: usize) -> Result<()> {
        match state.dimension {
            Some(dim) if dim != vector_len => Err(Error::DimensionMismatch {
                expected: dim,
                actual: vector_len,
            }),
            Some(_) => Ok(()),
            None => Err(Error::vector("collection not initialized")),
        }
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let mut state = self.state.write();
        match state.dimension {
            Some(existing) if existing != dimension => Err(Error::DimensionMismatch {
                expected: existing,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                state.dimension = Some(dimension);
                self.save(&state);
                Ok(())
            }
        }
    }

    async fn ensure_partition(&self, owner_id: i64) -> Result<()> {
        let mut state = self.state.write();
        state
            .partitions
            .entry(partition_name(owner_id))
            .or_default();
        Ok(())
    }

    async fn upsert(&self, owner_id: i64, records: &[VectorRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut state = self.state.write();
        for record in records {
            Self::check_dimension(&state, record.embedding.len())?;
        }
        let partition = state
            .partitions
            .entry(partition_name(owner_id))
            .or_default();
        for record in records {
            let pk = vector_pk(record.document_id, record.chunk_index);
            // Delete-by-key then insert; the engine need not support update.
            partition.remove(&pk);
            partition.insert(
                pk,
                StoredVector {
                    document_id: record.document_id,
                    chunk_index: record.chunk_index,
                    embedding: record.embedding.clone(),
                },
            );
        }
        self.save(&state);
        Ok(())
    }

    async fn delete_by_document(&self, owner_id: i64, document_id: i64) -> Result<()> {
        let mut state = self.state.write();
        if let Some(partition) = state.partitions.get_mut(&partition_name(owner_id)) {
            partition.retain(|_, v| v.document_id != document_id);
        }
        self.save(&state);
        Ok(())
    }

    async fn delete_chunk(&self, owner_id: i64, document_id: i64, chunk_index: i64) -> Result<()> {
        let mut state = self.state.write();
        if let Some(partition) = state.partitions.get_mut(&partition_name(owner_id)) {
            partition.remove(&vector_pk(document_id, chunk_index));
        }
        self.save(&state);
        Ok(())
    }

    async fn search(
        &self,
        owner_ids: &[i64],
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<VectorHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let state = self.state.read();
        Self::check_dimension(&state, query.len())?;

        let selected: Vec<&BTreeMap<i64, StoredVector>> = if owner_ids.is_empty() {
            state.partitions.values().collect()
        } else {
            owner_ids
                .iter()
                .filter_map(|id| state.partitions.get(&partition_name(*id)))
                .collect()
        };

        let mut hits: Vec<VectorHit> = Vec::new();
        for partition in selected {
            for vector in partition.values() {
                let dot: f32 = vector
                    .embedding
                    .iter()
                    .zip(query)
                    .map(|(a, b)| a * b)
                    .sum();
                // Normalized inputs give cosine in [-1,1]; map to [0,1].
                let score = ((dot + 1.0) / 2.0).clamp(0.0, 1.0);
                hits.push(VectorHit {
                    document_id: vector.document_id,
                    chunk_index: vector.chunk_index,
                    score,
                });
            }
        }

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| (a.document_id, a.chunk_index).cmp(&(b.document_id, b.chunk_index)))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn partition_size(&self, owner_id: i64) -> Result<usize> {
        let state = self.state.read();
        Ok(state
            .partitions
            .get(&partition_name(owner_id))
            .map(|p| p.len())
            .unwrap_or(0))
    }
}
