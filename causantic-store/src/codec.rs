//! Row-level (de)serialization helpers shared across the `Store`
//! queries: UUIDs as 16-byte blobs, float vectors as packed
//! little-endian blobs, and small ordered id/index lists as JSON text.

use causantic_core::error::{Error, Result};
use uuid::Uuid;

#[must_use]
pub fn uuid_to_blob(id: Uuid) -> Vec<u8> {
    id.as_bytes().to_vec()
}

pub fn uuid_from_blob(bytes: &[u8]) -> Result<Uuid> {
    let raw: [u8; 16] = bytes
        .try_into()
        .map_err(|_| Error::Corruption(format!("expected a 16-byte uuid blob, got {} bytes", bytes.len())))?;
    Ok(Uuid::from_bytes(raw))
}

#[must_use]
pub fn vector_to_blob(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

pub fn vector_from_blob(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::Corruption(format!("embedding blob length {} is not a multiple of 4", bytes.len())));
    }
    Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes(c.try_into().unwrap())).collect())
}

pub fn turn_indices_to_json(indices: &[usize]) -> String {
    serde_json::to_string(indices).unwrap_or_else(|_| "[]".to_string())
}

pub fn turn_indices_from_json(json: &str) -> Result<Vec<usize>> {
    serde_json::from_str(json).map_err(Error::Serialization)
}

pub fn uuid_list_to_json(ids: &[Uuid]) -> String {
    let strings: Vec<String> = ids.iter().map(Uuid::to_string).collect();
    serde_json::to_string(&strings).unwrap_or_else(|_| "[]".to_string())
}

pub fn uuid_list_from_json(json: &str) -> Result<Vec<Uuid>> {
    let strings: Vec<String> = serde_json::from_str(json).map_err(Error::Serialization)?;
    strings
        .into_iter()
        .map(|s| Uuid::parse_str(&s).map_err(|e| Error::Corruption(format!("malformed uuid in json list: {e}"))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_blob_round_trips() {
        let id = Uuid::new_v4();
        assert_eq!(uuid_from_blob(&uuid_to_blob(id)).unwrap(), id);
    }

    #[test]
    fn vector_blob_round_trips() {
        let v = vec![1.0_f32, -2.5, 3.0];
        assert_eq!(vector_from_blob(&vector_to_blob(&v)).unwrap(), v);
    }

    #[test]
    fn turn_indices_round_trip() {
        let indices = vec![1, 3, 4];
        let json = turn_indices_to_json(&indices);
        assert_eq!(turn_indices_from_json(&json).unwrap(), indices);
    }

    #[test]
    fn uuid_list_round_trips() {
        let ids = vec![Uuid::new_v4(), Uuid::new_v4()];
        let json = uuid_list_to_json(&ids);
        assert_eq!(uuid_list_from_json(&json).unwrap(), ids);
    }
}
