//! Product catalog: records plus their aligned embedding matrix.
//!
//! Loaded once at startup and shared read-only for the life of the process.
//! Row `i` of the matrix is the embedding of record `i`.

mod matrix;
mod records;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub use matrix::{EmbeddingMatrix, MatrixError};
pub use records::{load_records, ProductRecord};

#[cfg(test)]
pub(crate) use matrix::encode_npy;

/// Errors that make a catalog unusable.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported {kind} file format: {}", path.display())]
    UnsupportedFormat { kind: &'static str, path: PathBuf },

    #[error("invalid embeddings file {}: {source}", path.display())]
    Matrix {
        path: PathBuf,
        #[source]
        source: MatrixError,
    },

    #[error("invalid product records file {}: {reason}", path.display())]
    InvalidRecords { path: PathBuf, reason: String },

    #[error("duplicate product id '{0}'")]
    DuplicateId(String),

    #[error("product '{id}' has invalid price {price}")]
    InvalidPrice { id: String, price: f64 },

    #[error("embedding matrix has {rows} rows but the catalog has {records} records")]
    RowCountMismatch { rows: usize, records: usize },

    #[error("catalog embeddings have {got} dimensions, embedder produces {expected}")]
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, thiserror::Error)]
#[error("index {index} out of bounds for catalog of size {size}")]
pub struct IndexError {
    pub index: usize,
    pub size: usize,
}

/// Immutable product catalog.
#[derive(Debug)]
pub struct Catalog {
    records: Vec<ProductRecord>,
    matrix: EmbeddingMatrix,
}

impl Catalog {
    /// Read both catalog files and check that they line up.
    pub fn load(embeddings_path: &Path, records_path: &Path) -> Result<Self, LoadError> {
        let records = load_records(records_path)?;
        let matrix = EmbeddingMatrix::load(embeddings_path)?;

        log::debug!(
            "read {} records and a {}x{} embedding matrix",
            records.len(),
            matrix.rows(),
            matrix.dimensions()
        );

        Self::from_parts(records, matrix)
    }

    /// Pair records with a matrix, validating the catalog invariants.
    pub fn from_parts(
        records: Vec<ProductRecord>,
        matrix: EmbeddingMatrix,
    ) -> Result<Self, LoadError> {
        if matrix.rows() != records.len() {
            return Err(LoadError::RowCountMismatch {
                rows: matrix.rows(),
                records: records.len(),
            });
        }

        let mut seen = HashSet::with_capacity(records.len());
        for record in &records {
            if !seen.insert(record.uniq_id.as_str()) {
                return Err(LoadError::DuplicateId(record.uniq_id.clone()));
            }
            if !(record.price >= 0.0) {
                return Err(LoadError::InvalidPrice {
                    id: record.uniq_id.clone(),
                    price: record.price,
                });
            }
        }

        Ok(Self { records, matrix })
    }

    /// Fail unless the embedding width matches the embedder in use.
    pub fn ensure_dimensions(&self, expected: usize) -> Result<(), LoadError> {
        if self.is_empty() || self.matrix.dimensions() == expected {
            return Ok(());
        }
        Err(LoadError::DimensionMismatch {
            expected,
            got: self.matrix.dimensions(),
        })
    }

    pub fn size(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Embedding width; 0 for an empty catalog.
    pub fn dimensions(&self) -> usize {
        self.matrix.dimensions()
    }

    pub fn get(&self, index: usize) -> Result<&ProductRecord, IndexError> {
        self.records.get(index).ok_or(IndexError {
            index,
            size: self.size(),
        })
    }

    pub fn vector_at(&self, index: usize) -> Result<&[f32], IndexError> {
        self.matrix.row(index).ok_or(IndexError {
            index,
            size: self.size(),
        })
    }

    pub fn records(&self) -> &[ProductRecord] {
        &self.records
    }

    pub fn matrix(&self) -> &EmbeddingMatrix {
        &self.matrix
    }
}
