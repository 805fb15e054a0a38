//! On-disk layout for the packed vector index: a fixed 16-byte header
//! (magic, version, dimension, count), an id table (16-byte UUIDs), and
//! a row-major matrix of little-endian `f32`s.

use causantic_core::error::{Error, Result};
use uuid::Uuid;

const MAGIC: &[u8; 4] = b"CAVI";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 16;

/// The decoded contents of a packed vector index file.
pub struct Decoded {
    pub dimension: usize,
    pub ids: Vec<Uuid>,
    pub vectors: Vec<f32>,
}

/// Encodes a dimension, id table, and row-major vector matrix into the
/// packed file format.
#[must_use]
pub fn encode(dimension: usize, ids: &[Uuid], vectors: &[f32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + ids.len() * 16 + vectors.len() * 4);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&VERSION.to_le_bytes());
    buf.extend_from_slice(&u32::try_from(dimension).unwrap_or(0).to_le_bytes());
    buf.extend_from_slice(&u32::try_from(ids.len()).unwrap_or(0).to_le_bytes());
    for id in ids {
        buf.extend_from_slice(id.as_bytes());
    }
    for value in vectors {
        buf.extend_from_slice(&value.to_le_bytes());
    }
    buf
}

/// Decodes a packed vector index file, validating the magic header,
/// version, and that the byte length matches the declared id count and
/// dimension.
///
/// # Errors
/// Returns [`Error::Corruption`] if the header is missing, the version
/// is unsupported, or the file is truncated relative to its own header.
pub fn decode(bytes: &[u8]) -> Result<Decoded> {
    if bytes.len() < HEADER_LEN {
        return Err(Error::Corruption("vector index file shorter than its header".into()));
    }
    if &bytes[0..4] != MAGIC {
        return Err(Error::Corruption("vector index file missing CAVI magic".into()));
    }
    let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    if version != VERSION {
        return Err(Error::Corruption(format!("unsupported vector index format version {version}")));
    }
    let dimension = u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize;
    let count = u32::from_le_bytes(bytes[12..16].try_into().unwrap()) as usize;

    let ids_end = HEADER_LEN + count * 16;
    if bytes.len() < ids_end {
        return Err(Error::Corruption("vector index file truncated in id table".into()));
    }
    let mut ids = Vec::with_capacity(count);
    let mut offset = HEADER_LEN;
    while offset < ids_end {
        let raw: [u8; 16] = bytes[offset..offset + 16].try_into().unwrap();
        ids.push(Uuid::from_bytes(raw));
        offset += 16;
    }

    let vector_len = count * dimension;
    let vectors_end = ids_end + vector_len * 4;
    if bytes.len() < vectors_end {
        return Err(Error::Corruption("vector index file truncated in vector matrix".into()));
    }
    let mut vectors = Vec::with_capacity(vector_len);
    let mut offset = ids_end;
    for _ in 0..vector_len {
        let raw: [u8; 4] = bytes[offset..offset + 4].try_into().unwrap();
        vectors.push(f32::from_le_bytes(raw));
        offset += 4;
    }

    Ok(Decoded { dimension, ids, vectors })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_index_round_trips() {
        let bytes = encode(0, &[], &[]);
        let decoded = decode(&bytes).unwrap();
        assert!(decoded.ids.is_empty());
        assert!(decoded.vectors.is_empty());
    }

    #[test]
    fn populated_index_round_trips() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let vectors = vec![1.0, 2.0, 3.0, 4.0];
        let bytes = encode(2, &ids, &vectors);
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded.dimension, 2);
        assert_eq!(decoded.ids, ids);
        assert_eq!(decoded.vectors, vectors);
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = encode(1, &[Uuid::new_v4()], &[1.0]);
        bytes[0] = b'X';
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn rejects_truncated_file() {
        let bytes = encode(2, &[Uuid::new_v4()], &[1.0, 2.0]);
        assert!(decode(&bytes[..bytes.len() - 4]).is_err());
    }
}
