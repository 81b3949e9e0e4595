//! JSON payload codec for [`Batch`] values carried in `IngestRequest.payload`

use sensorline_common::Batch;

#[derive(thiserror::Error, Debug)]
pub enum PayloadError {
    #[error("payload is not a valid batch: {0}")]
    Invalid(#[from] serde_json::Error),
}

pub fn encode_batch(batch: &Batch) -> Result<Vec<u8>, PayloadError> {
    Ok(serde_json::to_vec(batch)?)
}

pub fn decode_batch(payload: &[u8]) -> Result<Batch, PayloadError> {
    Ok(serde_json::from_slice(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_wire_example() {
        let payload = br#"{"12":[{"locationId":12,"temperature":21.5,"capturedAt":"2024-05-01T08:00:00"}],
                          "13":[{"locationId":13,"temperature":19.8,"capturedAt":"2024-05-01T08:00:00"}]}"#;
        let batch = decode_batch(payload).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.for_location(13)[0].temperature, 19.8);

        let encoded = encode_batch(&batch).unwrap();
        assert_eq!(decode_batch(&encoded).unwrap(), batch);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_batch(b"not json").is_err());
        assert!(decode_batch(br#"{"12": {"temperature": 1}}"#).is_err());
        assert!(decode_batch(br#"{"abc": []}"#).is_err());
    }

    #[test]
    fn test_decode_empty_object() {
        assert!(decode_batch(b"{}").unwrap().is_empty());
    }
}
