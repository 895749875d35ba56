//! Persistent metadata: the `meta/storage`, `meta/sizes`, and `attrs/` JSON
//! files under a CArray's root directory (spec §3, §6).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use carray_codecs::{CParams, CodecId, Shuffle};

use crate::dtype::ElementType;
use crate::error::CArrayError;

#[derive(Debug, Serialize, Deserialize)]
pub struct CParamsJson {
    pub clevel: u8,
    pub shuffle: u8,
    pub cname: String,
    pub quantize: Option<u32>,
}

impl From<&CParams> for CParamsJson {
    fn from(p: &CParams) -> Self {
        CParamsJson {
            clevel: p.level,
            shuffle: match p.shuffle {
                Shuffle::None => 0,
                Shuffle::Byte => 1,
                Shuffle::Bit => 2,
            },
            cname: p.codec.name().to_string(),
            quantize: p.quantize.map(|q| q.digits),
        }
    }
}

impl CParamsJson {
    pub fn to_cparams(&self) -> Result<CParams, CArrayError> {
        let shuffle = match self.shuffle {
            0 => Shuffle::None,
            1 => Shuffle::Byte,
            2 => Shuffle::Bit,
            other => {
                return Err(CArrayError::InvalidArgument(format!(
                    "unrecognized shuffle code {other}"
                )))
            }
        };
        let codec = CodecId::from_name(&self.cname)?;
        let quantize = self.quantize.map(|digits| carray_codecs::QuantizeSpec {
            digits,
            // Resolved to the array's actual float width per-chunk in chunk.rs;
            // this placeholder is overwritten before every compress() call.
            width: carray_codecs::FloatWidth::F64,
        });
        Ok(CParams {
            level: self.clevel,
            shuffle,
            codec,
            quantize,
            block_size: None,
            threads: Default::default(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageMeta {
    pub dtype: String,
    pub cparams: CParamsJson,
    pub chunklen: usize,
    pub expectedlen: usize,
    pub dflt: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SizesMeta {
    pub shape: Vec<usize>,
    pub nbytes: u64,
    pub cbytes: u64,
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), CArrayError> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    fs::write(path, text)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CArrayError> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn write_storage(root: &Path, meta: &StorageMeta) -> Result<(), CArrayError> {
    write_json(&root.join("meta").join("storage"), meta)
}

pub fn read_storage(root: &Path) -> Result<StorageMeta, CArrayError> {
    read_json(&root.join("meta").join("storage"))
}

pub fn write_sizes(root: &Path, meta: &SizesMeta) -> Result<(), CArrayError> {
    write_json(&root.join("meta").join("sizes"), meta)
}

pub fn read_sizes(root: &Path) -> Result<SizesMeta, CArrayError> {
    read_json(&root.join("meta").join("sizes"))
}

pub fn write_attrs(root: &Path, attrs: &Value) -> Result<(), CArrayError> {
    write_json(&root.join("attrs").join("storage"), attrs)
}

pub fn read_attrs(root: &Path) -> Result<Value, CArrayError> {
    let path = root.join("attrs").join("storage");
    if !path.exists() {
        return Ok(Value::Object(Default::default()));
    }
    read_json(&path)
}

pub fn dflt_to_json(elem: &ElementType, bytes: &[u8]) -> Value {
    use crate::dtype::DTypeKind;
    match elem.kind {
        DTypeKind::F64 if bytes.len() >= 8 => {
            serde_json::json!(f64::from_le_bytes(bytes[..8].try_into().unwrap_or([0; 8])))
        }
        DTypeKind::F32 if bytes.len() >= 4 => {
            serde_json::json!(f32::from_le_bytes(bytes[..4].try_into().unwrap_or([0; 4])) as f64)
        }
        DTypeKind::Bool => serde_json::json!(bytes.first().copied().unwrap_or(0) != 0),
        _ => {
            let mut padded = [0u8; 8];
            let n = bytes.len().min(8);
            padded[..n].copy_from_slice(&bytes[..n]);
            serde_json::json!(i64::from_le_bytes(padded))
        }
    }
}
