//! Parameter persistence.
//!
//! # `.bpat` Parameter Format
//!
//! A whole network's parameters are stored as a list of tensors, one per
//! weight or bias vector, in layer order:
//!
//! ```text
//! ┌────────────┬──────────────────────────────────┐
//! │ Header     │ Tensor 0, Tensor 1 …             │
//! ├────────────┼──────────────────────────────────┤
//! │ "bpat"[4]  │ u64: ndim                        │
//! │ u32: count │ [u64; ndim] shape                │
//! │            │ [f32; prod(shape)] data          │
//! └────────────┴──────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian. Every decoded tensor passes
//! through [`TrustedData`] before it is handed out, so a shape that does not
//! match its data never reaches a layer.
//!
//! # Text tokens
//!
//! [`read_token`] is the tokenizer behind
//! [`Layer::load`](crate::layer::Layer::load): whitespace-separated words
//! read lazily from any [`BufRead`].
//!
//! # Example
//!
//! ```rust
//! use briny_cnn::modelio::{ParamTensor, read_model, write_model};
//!
//! let params = vec![ParamTensor::new(vec![2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap()];
//! let mut buf = Vec::new();
//! write_model(&mut buf, &params).unwrap();
//! assert_eq!(read_model(&mut buf.as_slice()).unwrap(), params);
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use briny::prelude::*;

use crate::error::{NnError, Result};
use crate::tensors::Float;

const BPAT_MAGIC: &[u8; 4] = b"bpat";
const MAX_DIMS: usize = 8;

/// One stored parameter vector with its logical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    pub shape: Vec<usize>,
    pub data: Vec<Float>,
}

impl ParamTensor {
    /// # Errors
    /// [`NnError::Format`] when `data` does not have `prod(shape)` elements.
    pub fn new(shape: Vec<usize>, data: Vec<Float>) -> Result<Self> {
        let t = Self { shape, data };
        t.validate()
            .map_err(|_| NnError::Format(format!("shape {:?} does not hold {} values", t.shape, t.data.len())))?;
        Ok(t)
    }

    fn numel(&self) -> Option<usize> {
        self.shape.iter().try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }
}

impl Validate for ParamTensor {
    fn validate(&self) -> core::result::Result<(), ValidationError> {
        if self.shape.len() > MAX_DIMS || self.numel() != Some(self.data.len()) {
            return Err(ValidationError);
        }
        Ok(())
    }
}

/// Encodes `tensors` into `writer`.
pub fn write_model<W: Write>(writer: &mut W, tensors: &[ParamTensor]) -> Result<()> {
    let count = u32::try_from(tensors.len())
        .map_err(|_| NnError::Format(format!("{} tensors do not fit the header", tensors.len())))?;
    writer.write_all(BPAT_MAGIC)?;
    writer.write_all(&count.to_le_bytes())?;

    for t in tensors {
        t.validate()
            .map_err(|_| NnError::Format(format!("tensor shape {:?} does not match its data", t.shape)))?;
        writer.write_all(&(t.shape.len() as u64).to_le_bytes())?;
        for &d in &t.shape {
            writer.write_all(&(d as u64).to_le_bytes())?;
        }
        for &v in &t.data {
            writer.write_all(&v.to_le_bytes())?;
        }
    }
    Ok(())
}

fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

fn to_usize(v: u64, what: &str) -> Result<usize> {
    usize::try_from(v).map_err(|_| NnError::Format(format!("{what} {v} out of range")))
}

/// Decodes tensors written by [`write_model`].
///
/// # Errors
/// [`NnError::Format`] for a bad magic, too many dimensions or a shape that
/// fails validation; [`NnError::Io`] when the stream ends early.
pub fn read_model<R: Read>(reader: &mut R) -> Result<Vec<ParamTensor>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BPAT_MAGIC {
        return Err(NnError::Format("invalid magic header".into()));
    }
    let mut count = [0u8; 4];
    reader.read_exact(&mut count)?;
    let count = u32::from_le_bytes(count) as usize;

    let mut tensors = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        let ndim = to_usize(read_u64(reader)?, "dimension count")?;
        if ndim > MAX_DIMS {
            return Err(NnError::Format(format!("{ndim} dimensions exceed the limit of {MAX_DIMS}")));
        }
        let shape = (0..ndim)
            .map(|_| read_u64(reader).and_then(|d| to_usize(d, "dimension")))
            .collect::<Result<Vec<_>>>()?;
        let size = shape
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(|| NnError::Format(format!("shape {shape:?} overflows")))?;

        let mut data = Vec::with_capacity(size.min(1 << 20));
        let mut buf = [0u8; 4];
        for _ in 0..size {
            reader.read_exact(&mut buf)?;
            data.push(Float::from_le_bytes(buf));
        }

        let trusted = TrustedData::new(ParamTensor { shape, data })
            .map_err(|_| NnError::Format("tensor failed validation".into()))?;
        tensors.push(trusted.into_inner());
    }
    log::debug!("decoded {} parameter tensors", tensors.len());
    Ok(tensors)
}

/// Saves `tensors` to a `.bpat` file.
pub fn save_model<P: AsRef<Path>>(path: P, tensors: &[ParamTensor]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_model(&mut file, tensors)?;
    file.flush()?;
    Ok(())
}

/// Loads every tensor from a `.bpat` file.
pub fn load_model<P: AsRef<Path>>(path: P) -> Result<Vec<ParamTensor>> {
    let mut file = BufReader::new(File::open(path)?);
    read_model(&mut file)
}

/// Next whitespace-separated token, or `None` at end of stream.
pub fn read_token<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut token = Vec::new();
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        let mut used = 0;
        let mut done = false;
        for &b in buf {
            used += 1;
            if b.is_ascii_whitespace() {
                if !token.is_empty() {
                    done = true;
                    break;
                }
            } else {
                token.push(b);
            }
        }
        reader.consume(used);
        if done {
            break;
        }
    }
    if token.is_empty() {
        return Ok(None);
    }
    String::from_utf8(token)
        .map(Some)
        .map_err(|e| NnError::Parse(String::from_utf8_lossy(e.as_bytes()).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_split_on_any_whitespace() {
        let mut r = "  0.5 -1e-3\n\t7  ".as_bytes();
        assert_eq!(read_token(&mut r).unwrap().as_deref(), Some("0.5"));
        assert_eq!(read_token(&mut r).unwrap().as_deref(), Some("-1e-3"));
        assert_eq!(read_token(&mut r).unwrap().as_deref(), Some("7"));
        assert_eq!(read_token(&mut r).unwrap(), None);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = b"nope\0\0\0\0".to_vec();
        assert!(matches!(read_model(&mut bytes.as_slice()), Err(NnError::Format(_))));
    }

    #[test]
    fn truncated_stream_is_io_error() {
        let t = ParamTensor::new(vec![3], vec![1.0, 2.0, 3.0]).unwrap();
        let mut buf = Vec::new();
        write_model(&mut buf, &[t]).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(matches!(read_model(&mut buf.as_slice()), Err(NnError::Io(_))));
    }

    #[test]
    fn mismatched_shape_is_rejected() {
        assert!(ParamTensor::new(vec![2, 2], vec![1.0]).is_err());
    }
}
