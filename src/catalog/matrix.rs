//! Dense embedding matrix aligned with the product records.
//!
//! Supported files:
//! - `.npy`: NumPy array, format version 1.0 to 3.0, two-dimensional,
//!   C order, little-endian `f4` or `f8` (narrowed to `f32`)
//! - `.json`: array of equal-length number arrays

use std::path::Path;

use super::LoadError;

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Row-major `rows x dimensions` matrix of `f32`.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingMatrix {
    data: Vec<f32>,
    rows: usize,
    dimensions: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("row {row} has {got} values, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        got: usize,
    },

    #[error("not a NumPy file")]
    BadMagic,

    #[error("unsupported NumPy format version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed NumPy header: {0}")]
    BadHeader(String),

    #[error("unsupported dtype '{0}', expected '<f4' or '<f8'")]
    UnsupportedDtype(String),

    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,

    #[error("expected a two-dimensional array, got shape {0}")]
    BadShape(String),

    #[error("data section has {got} bytes, shape requires {expected}")]
    DataLength { expected: usize, got: usize },

    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl EmbeddingMatrix {
    /// A matrix with no rows.
    pub fn empty() -> Self {
        Self {
            data: vec![],
            rows: 0,
            dimensions: 0,
        }
    }

    /// Build from owned rows; every row must have the same length.
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Result<Self, MatrixError> {
        let dimensions = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dimensions);

        for (row, values) in rows.iter().enumerate() {
            if values.len() != dimensions {
                return Err(MatrixError::Ragged {
                    row,
                    expected: dimensions,
                    got: values.len(),
                });
            }
            data.extend_from_slice(values);
        }

        Ok(Self {
            data,
            rows: rows.len(),
            dimensions,
        })
    }

    /// Load a matrix from disk, choosing the parser by extension.
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase);

        let parse: fn(&[u8]) -> Result<Self, MatrixError> = match extension.as_deref() {
            Some("npy") => Self::from_npy,
            Some("json") => Self::from_json,
            _ => {
                return Err(LoadError::UnsupportedFormat {
                    kind: "embeddings",
                    path: path.to_path_buf(),
                })
            }
        };

        let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        parse(&bytes).map_err(|source| LoadError::Matrix {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, MatrixError> {
        let rows: Vec<Vec<f32>> = serde_json::from_slice(bytes)?;
        Self::from_rows(rows)
    }

    /// Parse the NumPy `.npy` binary format.
    pub fn from_npy(bytes: &[u8]) -> Result<Self, MatrixError> {
        if bytes.len() < 10 || &bytes[..6] != NPY_MAGIC {
            return Err(MatrixError::BadMagic);
        }

        let major = bytes[6];
        let (header_len, header_start) = match major {
            1 => (u16::from_le_bytes([bytes[8], bytes[9]]) as usize, 10),
            2 | 3 => {
                if bytes.len() < 12 {
                    return Err(MatrixError::BadHeader("truncated header length".into()));
                }
                let len = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
                (len as usize, 12)
            }
            other => return Err(MatrixError::UnsupportedVersion(other)),
        };

        let data_start = header_start + header_len;
        let header = bytes
            .get(header_start..data_start)
            .ok_or_else(|| MatrixError::BadHeader("header exceeds file size".into()))?;
        let header = std::str::from_utf8(header)
            .map_err(|_| MatrixError::BadHeader("header is not valid text".into()))?;

        let descr = header_value(header, "descr")
            .ok_or_else(|| MatrixError::BadHeader("missing 'descr'".into()))?;
        let fortran_order = header_value(header, "fortran_order")
            .ok_or_else(|| MatrixError::BadHeader("missing 'fortran_order'".into()))?;
        let shape = header_value(header, "shape")
            .ok_or_else(|| MatrixError::BadHeader("missing 'shape'".into()))?;

        if fortran_order == "True" {
            return Err(MatrixError::FortranOrder);
        }

        let item_size = match descr {
            "<f4" => 4,
            "<f8" => 8,
            other => return Err(MatrixError::UnsupportedDtype(other.to_string())),
        };

        let (rows, dimensions) = parse_shape(shape)?;

        let data = &bytes[data_start..];
        let expected = rows
            .checked_mul(dimensions)
            .and_then(|n| n.checked_mul(item_size))
            .ok_or_else(|| MatrixError::BadShape(shape.to_string()))?;
        if data.len() != expected {
            return Err(MatrixError::DataLength {
                expected,
                got: data.len(),
            });
        }

        let data: Vec<f32> = if item_size == 4 {
            data.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        } else {
            data.chunks_exact(8)
                .map(|b| {
                    let mut word = [0u8; 8];
                    word.copy_from_slice(b);
                    f64::from_le_bytes(word) as f32
                })
                .collect()
        };

        Ok(Self {
            data,
            rows,
            dimensions,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Row `i`, or `None` when out of range.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        if i >= self.rows {
            return None;
        }
        let start = i.checked_mul(self.dimensions)?;
        self.data.get(start..start.checked_add(self.dimensions)?)
    }

    /// Iterate rows in order.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f32]> {
        // chunks_exact(0) panics
        let width = self.dimensions.max(1);
        self.data.chunks_exact(width).take(self.rows)
    }
}

/// Extract the raw value of `key` from a NumPy header dict literal.
///
/// Quoted values are returned without quotes, tuples with their parentheses.
fn header_value<'a>(header: &'a str, key: &str) -> Option<&'a str> {
    let key_pos = header
        .find(&format!("'{key}'"))
        .or_else(|| header.find(&format!("\"{key}\"")))?;
    let rest = &header[key_pos + key.len() + 2..];
    let rest = rest.trim_start().strip_prefix(':')?.trim_start();

    match rest.chars().next()? {
        quote @ ('\'' | '"') => {
            let inner = &rest[1..];
            inner.find(quote).map(|end| &inner[..end])
        }
        '(' => rest.find(')').map(|end| &rest[..=end]),
        _ => {
            let end = rest.find([',', '}']).unwrap_or(rest.len());
            Some(rest[..end].trim())
        }
    }
}

fn parse_shape(shape: &str) -> Result<(usize, usize), MatrixError> {
    let inner = shape
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| MatrixError::BadShape(shape.to_string()))?;

    let dims = inner
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| MatrixError::BadShape(shape.to_string()))?;

    match dims.as_slice() {
        [rows, dimensions] => Ok((*rows, *dimensions)),
        _ => Err(MatrixError::BadShape(shape.to_string())),
    }
}

/// Encode rows as a version 1.0 `.npy` file. Test fixture helper.
#[cfg(test)]
pub(crate) fn encode_npy(rows: &[Vec<f32>]) -> Vec<u8> {
    let dimensions = rows.first().map(Vec::len).unwrap_or(0);
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        rows.len(),
        dimensions
    );
    // header + magic/version/len prefix is padded to a multiple of 64, ending in '\n'
    let unpadded = 10 + header.len() + 1;
    header.push_str(&" ".repeat((64 - unpadded % 64) % 64));
    header.push('\n');

    let mut bytes = Vec::new();
    bytes.extend_from_slice(NPY_MAGIC);
    bytes.extend_from_slice(&[1, 0]);
    bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
    bytes.extend_from_slice(header.as_bytes());
    for row in rows {
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rows() {
        let matrix = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(matrix.rows(), 2);
        assert_eq!(matrix.dimensions(), 2);
        assert_eq!(matrix.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(matrix.row(2), None);
    }

    #[test]
    fn test_from_rows_ragged() {
        let result = EmbeddingMatrix::from_rows(vec![vec![1.0, 2.0], vec![3.0]]);
        assert!(matches!(
            result,
            Err(MatrixError::Ragged {
                row: 1,
                expected: 2,
                got: 1
            })
        ));
    }

    #[test]
    fn test_npy_roundtrip_f4() {
        let rows = vec![vec![0.5, -1.0, 2.0], vec![0.0, 0.25, 8.0]];
        let bytes = encode_npy(&rows);
        assert_eq!((bytes.len() - rows.len() * 3 * 4) % 64, 0);

        let matrix = EmbeddingMatrix::from_npy(&bytes).unwrap();
        assert_eq!(matrix, EmbeddingMatrix::from_rows(rows).unwrap());
    }

    fn raw_npy(header: &str, data: &[u8]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NPY_MAGIC);
        bytes.extend_from_slice(&[1, 0]);
        bytes.extend_from_slice(&(header.len() as u16).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(data);
        bytes
    }

    #[test]
    fn test_npy_f8_is_narrowed() {
        let header = "{'descr': '<f8', 'fortran_order': False, 'shape': (1, 2), }\n";
        let data: Vec<u8> = [1.5f64, -2.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let matrix = EmbeddingMatrix::from_npy(&raw_npy(header, &data)).unwrap();
        assert_eq!(matrix.row(0), Some(&[1.5f32, -2.0][..]));
    }

    #[test]
    fn test_npy_rejects_fortran_order() {
        let header = "{'descr': '<f4', 'fortran_order': True, 'shape': (2, 2), }\n";
        let bytes = raw_npy(header, &[0u8; 16]);

        assert!(matches!(
            EmbeddingMatrix::from_npy(&bytes),
            Err(MatrixError::FortranOrder)
        ));
    }

    #[test]
    fn test_npy_rejects_big_endian() {
        let header = "{'descr': '>f4', 'fortran_order': False, 'shape': (1, 1), }\n";
        let bytes = raw_npy(header, &[0u8; 4]);

        assert!(matches!(
            EmbeddingMatrix::from_npy(&bytes),
            Err(MatrixError::UnsupportedDtype(d)) if d == ">f4"
        ));
    }

    #[test]
    fn test_npy_truncated_data() {
        let mut bytes = encode_npy(&[vec![1.0, 2.0], vec![3.0, 4.0]]);
        bytes.truncate(bytes.len() - 4);
        assert!(matches!(
            EmbeddingMatrix::from_npy(&bytes),
            Err(MatrixError::DataLength { expected: 16, got: 12 })
        ));
    }

    #[test]
    fn test_npy_oversized_shape() {
        let header = concat!(
            "{'descr': '<f4', 'fortran_order': False, ",
            "'shape': (4611686018427387904, 4), }\n"
        );
        assert!(matches!(
            EmbeddingMatrix::from_npy(&raw_npy(header, &[])),
            Err(MatrixError::BadShape(_))
        ));

        let header = format!(
            "{{'descr': '<f8', 'fortran_order': False, 'shape': ({}, 1), }}\n",
            usize::MAX / 4
        );
        assert!(matches!(
            EmbeddingMatrix::from_npy(&raw_npy(&header, &[0u8; 8])),
            Err(MatrixError::BadShape(_))
        ));
    }

    #[test]
    fn test_npy_bad_magic() {
        assert!(matches!(
            EmbeddingMatrix::from_npy(b"PK\x03\x04 not numpy"),
            Err(MatrixError::BadMagic)
        ));
    }

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("(3, 384)").unwrap(), (3, 384));
        assert_eq!(parse_shape("(0, 384)").unwrap(), (0, 384));
        assert!(parse_shape("(3,)").is_err());
        assert!(parse_shape("(2, 3, 4)").is_err());
    }

    #[test]
    fn test_header_value() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }";
        assert_eq!(header_value(header, "descr"), Some("<f4"));
        assert_eq!(header_value(header, "fortran_order"), Some("False"));
        assert_eq!(header_value(header, "shape"), Some("(2, 3)"));
        assert_eq!(header_value(header, "missing"), None);
    }

    #[test]
    fn test_from_json() {
        let matrix = EmbeddingMatrix::from_json(b"[[1, 0], [0, 1], [0.5, 0.5]]").unwrap();
        assert_eq!(matrix.rows(), 3);
        assert_eq!(matrix.iter_rows().count(), 3);
    }
}
