//! Reader for the numeric variables of Level 5 MAT-files.
//!
//! Only what the Oxford Flowers label files need is supported: little-endian
//! files, zlib-compressed elements and real numeric matrices of any storage
//! type. Cells, structs, sparse and char arrays are skipped.

use flate2::read::ZlibDecoder;
use num_traits::AsPrimitive;
use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

const HEADER_LEN: usize = 128;
const TAG_LEN: usize = 8;

const MI_INT8: u32 = 1;
const MI_UINT8: u32 = 2;
const MI_INT16: u32 = 3;
const MI_UINT16: u32 = 4;
const MI_INT32: u32 = 5;
const MI_UINT32: u32 = 6;
const MI_SINGLE: u32 = 7;
const MI_DOUBLE: u32 = 9;
const MI_INT64: u32 = 12;
const MI_UINT64: u32 = 13;
const MI_MATRIX: u32 = 14;
const MI_COMPRESSED: u32 = 15;

// mxDOUBLE_CLASS ..= mxUINT64_CLASS
const NUMERIC_CLASSES: std::ops::RangeInclusive<u8> = 6..=15;

#[derive(Error, Debug)]
pub enum MatError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("not a level 5 MAT-file")]
    NotMat,
    #[error("big-endian MAT-files are not supported")]
    BigEndian,
    #[error("truncated {0}")]
    Truncated(&'static str),
    #[error("unexpected data type {found} for {what}")]
    UnexpectedType { what: &'static str, found: u32 },
    #[error("variable {0:?} not found")]
    Missing(String),
}

/// A real numeric matrix, column-major, converted to `f64`.
#[derive(Debug, Clone, PartialEq)]
pub struct MatArray {
    pub dims: Vec<usize>,
    pub data: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct MatFile {
    arrays: HashMap<String, MatArray>,
}

impl MatFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MatError> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MatError> {
        if bytes.len() < HEADER_LEN {
            return Err(MatError::NotMat);
        }
        match &bytes[126..128] {
            b"IM" => {}
            b"MI" => return Err(MatError::BigEndian),
            _ => return Err(MatError::NotMat),
        }

        let mut file = Self::default();
        file.read_elements(&bytes[HEADER_LEN..])?;
        Ok(file)
    }

    pub fn get(&self, name: &str) -> Option<&MatArray> {
        self.arrays.get(name)
    }

    /// Values of the variable `name`, regardless of its dimensions.
    pub fn vector(&self, name: &str) -> Result<&[f64], MatError> {
        self.get(name)
            .map(|array| array.data.as_slice())
            .ok_or_else(|| MatError::Missing(name.to_string()))
    }

    fn read_elements(&mut self, mut buf: &[u8]) -> Result<(), MatError> {
        // anything shorter than a tag is trailing padding
        while buf.len() >= TAG_LEN {
            let (ty, data, rest) = split_element(buf)?;
            match ty {
                MI_COMPRESSED => {
                    let mut inflated = Vec::new();
                    ZlibDecoder::new(data).read_to_end(&mut inflated)?;
                    self.read_elements(&inflated)?;
                }
                MI_MATRIX => {
                    if let Some((name, array)) = read_matrix(data)? {
                        self.arrays.insert(name, array);
                    }
                }
                _ => {}
            }
            buf = rest;
        }
        Ok(())
    }
}

fn read_u32(buf: &[u8]) -> u32 {
    u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]])
}

/// Splits the element at the start of `buf` into its type, its data and the
/// bytes that follow it.
fn split_element(buf: &[u8]) -> Result<(u32, &[u8], &[u8]), MatError> {
    if buf.len() < TAG_LEN {
        return Err(MatError::Truncated("element tag"));
    }
    let word = read_u32(buf);

    // small data element: type and size packed in the first word, data in the second
    let small_len = (word >> 16) as usize;
    if small_len != 0 {
        if small_len > 4 {
            return Err(MatError::Truncated("small data element"));
        }
        return Ok((word & 0xffff, &buf[4..4 + small_len], &buf[TAG_LEN..]));
    }

    let len = read_u32(&buf[4..]) as usize;
    let end = TAG_LEN
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(MatError::Truncated("data element"))?;
    // compressed elements are not padded
    let padded = if word == MI_COMPRESSED {
        end
    } else {
        (TAG_LEN + len.next_multiple_of(8)).min(buf.len())
    };
    Ok((word, &buf[TAG_LEN..end], &buf[padded..]))
}

fn read_matrix(buf: &[u8]) -> Result<Option<(String, MatArray)>, MatError> {
    let (ty, flags, buf) = split_element(buf)?;
    if ty != MI_UINT32 || flags.len() < 4 {
        return Err(MatError::UnexpectedType {
            what: "array flags",
            found: ty,
        });
    }
    let class = flags[0];
    if !NUMERIC_CLASSES.contains(&class) {
        return Ok(None);
    }

    let (ty, dims, buf) = split_element(buf)?;
    if ty != MI_INT32 {
        return Err(MatError::UnexpectedType {
            what: "dimensions",
            found: ty,
        });
    }
    let dims: Vec<usize> = decode(MI_INT32, dims)?
        .into_iter()
        .map(|dim| dim as usize)
        .collect();

    let (ty, name, buf) = split_element(buf)?;
    if ty != MI_INT8 {
        return Err(MatError::UnexpectedType {
            what: "array name",
            found: ty,
        });
    }
    let name = String::from_utf8_lossy(name).into_owned();

    let len: usize = dims.iter().product();
    let data = if buf.len() >= TAG_LEN {
        let (ty, real, _imaginary) = split_element(buf)?;
        decode(ty, real)?
    } else {
        Vec::new()
    };
    if data.len() != len {
        return Err(MatError::Truncated("real part"));
    }

    Ok(Some((name, MatArray { dims, data })))
}

macro_rules! decode_le {
    ($buf:expr, $ty:ty) => {
        $buf.chunks_exact(size_of::<$ty>())
            .map(|chunk| {
                let mut bytes = [0u8; size_of::<$ty>()];
                bytes.copy_from_slice(chunk);
                let value: f64 = <$ty>::from_le_bytes(bytes).as_();
                value
            })
            .collect()
    };
}

fn decode(ty: u32, buf: &[u8]) -> Result<Vec<f64>, MatError> {
    let values = match ty {
        MI_INT8 => buf.iter().map(|&b| (b as i8).as_()).collect(),
        MI_UINT8 => buf.iter().map(|&b| b.as_()).collect(),
        MI_INT16 => decode_le!(buf, i16),
        MI_UINT16 => decode_le!(buf, u16),
        MI_INT32 => decode_le!(buf, i32),
        MI_UINT32 => decode_le!(buf, u32),
        MI_SINGLE => decode_le!(buf, f32),
        MI_DOUBLE => decode_le!(buf, f64),
        MI_INT64 => decode_le!(buf, i64),
        MI_UINT64 => decode_le!(buf, u64),
        found => {
            return Err(MatError::UnexpectedType {
                what: "numeric data",
                found,
            });
        }
    };
    Ok(values)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::{Compression, write::ZlibEncoder};
    use std::io::Write;

    const MX_CHAR: u8 = 4;
    const MX_DOUBLE: u8 = 6;

    /// A MAT-file holding one double row vector per variable.
    pub(crate) fn double_vectors(vars: &[(&str, &[f64])]) -> Vec<u8> {
        let mut bytes = header(b"IM");
        for (name, values) in vars {
            let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            let dims = [1, values.len() as i32];
            bytes.extend(matrix(name, MX_DOUBLE, MI_DOUBLE, &data, dims));
        }
        bytes
    }

    fn pad(mut out: Vec<u8>) -> Vec<u8> {
        while out.len() % 8 != 0 {
            out.push(0);
        }
        out
    }

    fn element(ty: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(ty.to_le_bytes());
        out.extend((data.len() as u32).to_le_bytes());
        out.extend(data);
        pad(out)
    }

    fn small_element(ty: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend((((data.len() as u32) << 16) | ty).to_le_bytes());
        out.extend(data);
        pad(out)
    }

    pub(crate) fn matrix(name: &str, class: u8, ty: u32, values: &[u8], dims: [i32; 2]) -> Vec<u8> {
        let mut body = element(MI_UINT32, &[class, 0, 0, 0, 0, 0, 0, 0]);
        let dims: Vec<u8> = dims.iter().flat_map(|dim| dim.to_le_bytes()).collect();
        body.extend(element(MI_INT32, &dims));
        if name.len() <= 4 {
            body.extend(small_element(MI_INT8, name.as_bytes()));
        } else {
            body.extend(element(MI_INT8, name.as_bytes()));
        }
        body.extend(element(ty, values));
        element(MI_MATRIX, &body)
    }

    fn compressed(element: &[u8]) -> Vec<u8> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(element).unwrap();
        let data = encoder.finish().unwrap();
        let mut out = Vec::new();
        out.extend(MI_COMPRESSED.to_le_bytes());
        out.extend((data.len() as u32).to_le_bytes());
        out.extend(data);
        out
    }

    pub(crate) fn header(endian: &[u8; 2]) -> Vec<u8> {
        let text = b"MATLAB 5.0 MAT-file, Platform: GLNXA64";
        let mut out = vec![b' '; 116];
        out[..text.len()].copy_from_slice(text);
        out.extend([0u8; 8]);
        out.extend(0x0100u16.to_le_bytes());
        out.extend(endian);
        out
    }

    #[test]
    fn reads_uncompressed_double_vector() {
        let values: Vec<u8> = [1.0f64, 77.0, 102.0]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let mut bytes = header(b"IM");
        bytes.extend(matrix("labels", MX_DOUBLE, MI_DOUBLE, &values, [1, 3]));

        let file = MatFile::from_bytes(&bytes).unwrap();
        let labels = file.get("labels").unwrap();
        assert_eq!(labels.dims, vec![1, 3]);
        assert_eq!(labels.data, vec![1.0, 77.0, 102.0]);
    }

    #[test]
    fn reads_compressed_elements_with_narrow_storage() {
        // doubles stored as uint16, as MATLAB does for small integral values
        let tstid: Vec<u8> = [3u16, 1, 300].iter().flat_map(|v| v.to_le_bytes()).collect();
        let valid: Vec<u8> = [2u8, 4].to_vec();
        let mut bytes = header(b"IM");
        bytes.extend(compressed(&matrix("tstid", MX_DOUBLE, MI_UINT16, &tstid, [1, 3])));
        bytes.extend(compressed(&matrix("valid", MX_DOUBLE, MI_UINT8, &valid, [1, 2])));

        let file = MatFile::from_bytes(&bytes).unwrap();
        assert_eq!(file.vector("tstid").unwrap(), &[3.0, 1.0, 300.0]);
        assert_eq!(file.vector("valid").unwrap(), &[2.0, 4.0]);
    }

    #[test]
    fn skips_non_numeric_arrays() {
        let text: Vec<u8> = "hi".encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        let mut bytes = header(b"IM");
        bytes.extend(matrix("note", MX_CHAR, MI_UINT16, &text, [1, 2]));
        bytes.extend(matrix("x", MX_DOUBLE, MI_UINT8, &[5], [1, 1]));

        let file = MatFile::from_bytes(&bytes).unwrap();
        assert!(file.get("note").is_none());
        assert_eq!(file.vector("x").unwrap(), &[5.0]);
    }

    #[test]
    fn missing_variable_is_an_error() {
        let file = MatFile::from_bytes(&header(b"IM")).unwrap();
        assert!(matches!(file.vector("labels"), Err(MatError::Missing(_))));
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(MatFile::from_bytes(b"short"), Err(MatError::NotMat)));
        assert!(matches!(
            MatFile::from_bytes(&header(b"MI")),
            Err(MatError::BigEndian)
        ));
        assert!(matches!(
            MatFile::from_bytes(&header(b"??")),
            Err(MatError::NotMat)
        ));
    }

    #[test]
    fn rejects_truncated_data() {
        let values: Vec<u8> = [1.0f64, 2.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        let mut bytes = header(b"IM");
        bytes.extend(matrix("labels", MX_DOUBLE, MI_DOUBLE, &values, [1, 2]));
        bytes.truncate(bytes.len() - 12);
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatError::Truncated(_))
        ));

        // dimensions promise more values than stored
        let mut bytes = header(b"IM");
        bytes.extend(matrix("labels", MX_DOUBLE, MI_DOUBLE, &values, [1, 3]));
        assert!(matches!(
            MatFile::from_bytes(&bytes),
            Err(MatError::Truncated("real part"))
        ));
    }
}
