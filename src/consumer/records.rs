use crate::broker::RawMessage;
use crate::error::RestMqError;
use crate::types::{ConsumerRecord, EmbeddedFormat, Payload};
use crate::Result;

/// Convert a raw broker message into the client-facing record plus a rough
/// size: an over-approximation of the bytes the record will contribute to the
/// HTTP response, used for the response size cap. The overshoot of one read
/// is bounded by a single record because the cap is checked before the
/// message is taken.
pub(crate) fn create_consumer_record(
    format: EmbeddedFormat,
    raw: &RawMessage,
) -> Result<(ConsumerRecord, u64)> {
    let (key, value, size) = match format {
        EmbeddedFormat::Binary => {
            let key_len = raw.key.as_ref().map(|k| k.len()).unwrap_or(0);
            let size = (key_len + raw.value.len()) as u64;
            (
                raw.key.clone().map(Payload::Binary),
                Payload::Binary(raw.value.clone()),
                size,
            )
        }
        EmbeddedFormat::Json => {
            let key = raw
                .key
                .as_ref()
                .map(|k| decode_json(k, raw, "key"))
                .transpose()?;
            let value = decode_json(&raw.value, raw, "value")?;
            let key_len = key.as_ref().map(rendered_len).unwrap_or(0);
            let size = key_len + rendered_len(&value);
            (key.map(Payload::Json), Payload::Json(value), size)
        }
    };
    let record = ConsumerRecord {
        topic: raw.topic.clone(),
        key,
        value,
        partition: raw.partition,
        offset: raw.offset,
    };
    Ok((record, size))
}

fn decode_json(bytes: &[u8], raw: &RawMessage, field: &str) -> Result<serde_json::Value> {
    serde_json::from_slice(bytes).map_err(|e| {
        RestMqError::PayloadDecoding(format!(
            "Invalid JSON {} at {}:{} offset {}: {}",
            field, raw.topic, raw.partition, raw.offset, e
        ))
    })
}

fn rendered_len(value: &serde_json::Value) -> u64 {
    value.to_string().len() as u64
}
