//! Product records as produced by the offline ingestion pipeline.
//!
//! Two on-disk layouts are understood, picked by file extension:
//! - `.json`: an array of record objects
//! - `.csv`: a header row naming the record fields, one product per line

use std::fmt;
use std::path::Path;

use serde::{de, Deserialize, Deserializer, Serialize};

use super::LoadError;

/// A single catalog product. Never mutated after load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub uniq_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, deserialize_with = "deserialize_price")]
    pub price: f64,
    #[serde(default)]
    pub categories: String,
    #[serde(default)]
    pub images: String,
    #[serde(default)]
    pub material: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

impl ProductRecord {
    /// Material, or "" when unknown.
    pub fn material_or_empty(&self) -> &str {
        self.material.as_deref().unwrap_or("")
    }

    /// Color, or "" when unknown.
    pub fn color_or_empty(&self) -> &str {
        self.color.as_deref().unwrap_or("")
    }

    /// Blank optional attributes are the same as missing ones.
    fn normalize(mut self) -> Self {
        self.material = self.material.filter(|m| !m.trim().is_empty());
        self.color = self.color.filter(|c| !c.trim().is_empty());
        self
    }
}

/// Load product records from `path`.
pub fn load_records(path: &Path) -> Result<Vec<ProductRecord>, LoadError> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase);

    let records = match extension.as_deref() {
        Some("json") => {
            let bytes = std::fs::read(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_json(&bytes).map_err(|reason| LoadError::InvalidRecords {
                path: path.to_path_buf(),
                reason,
            })?
        }
        Some("csv") => {
            let file = std::fs::File::open(path).map_err(|source| LoadError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_csv(file).map_err(|reason| LoadError::InvalidRecords {
                path: path.to_path_buf(),
                reason,
            })?
        }
        _ => {
            return Err(LoadError::UnsupportedFormat {
                kind: "records",
                path: path.to_path_buf(),
            })
        }
    };

    Ok(records.into_iter().map(ProductRecord::normalize).collect())
}

fn parse_json(bytes: &[u8]) -> Result<Vec<ProductRecord>, String> {
    serde_json::from_slice(bytes).map_err(|err| err.to_string())
}

fn parse_csv<R: std::io::Read>(reader: R) -> Result<Vec<ProductRecord>, String> {
    let mut csv_reader = csv::Reader::from_reader(reader);

    let mut records = vec![];
    for (line, record) in csv_reader.deserialize::<ProductRecord>().enumerate() {
        // +2: one for the header, one for 1-based numbering
        let record = record.map_err(|err| format!("line {}: {}", line + 2, err))?;
        records.push(record);
    }

    Ok(records)
}

/// Accepts `24.99`, `"24.99"` and `"$24.99"`. Blank means zero.
fn deserialize_price<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    struct PriceVisitor;

    impl<'de> de::Visitor<'de> for PriceVisitor {
        type Value = f64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a number or a numeric string")
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<f64, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<f64, E> {
            Ok(v as f64)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<f64, E> {
            parse_price(v).ok_or_else(|| E::invalid_value(de::Unexpected::Str(v), &self))
        }

        fn visit_unit<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }

        fn visit_none<E: de::Error>(self) -> Result<f64, E> {
            Ok(0.0)
        }

        fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<f64, D::Error> {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_any(PriceVisitor)
}

fn parse_price(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Some(0.0);
    }

    let numeric: String = trimmed
        .trim_start_matches(|c: char| !(c.is_ascii_digit() || c == '-' || c == '.'))
        .chars()
        .filter(|c| *c != ',')
        .collect();

    numeric.parse::<f64>().ok().filter(|p| p.is_finite())
}
