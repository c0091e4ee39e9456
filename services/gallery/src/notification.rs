//! Decoding of S3 object-created notifications delivered through the queue.

use crate::error::{GalleryError, Result};
use crate::object_store::ObjectRef;
use serde::Deserialize;

/// Event name S3 sends once when a notification target is configured
const TEST_EVENT: &str = "s3:TestEvent";

/// S3 event notification body
#[derive(Debug, Deserialize)]
pub struct S3EventEnvelope {
    #[serde(rename = "Records")]
    pub records: Option<Vec<S3EventRecord>>,
    /// Only present on test events
    #[serde(rename = "Event")]
    pub event: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct S3EventRecord {
    pub s3: S3Entity,
}

#[derive(Debug, Deserialize)]
pub struct S3Entity {
    pub bucket: S3Bucket,
    pub object: S3ObjectEntity,
}

#[derive(Debug, Deserialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct S3ObjectEntity {
    /// URL-encoded key, spaces as `+`
    pub key: String,
}

/// Decode one queue message body into the objects it references
///
/// A test event yields no objects. Anything else that is not a valid
/// envelope is rejected.
pub fn decode_notification(body: &str) -> Result<Vec<ObjectRef>> {
    let envelope: S3EventEnvelope = serde_json::from_str(body)
        .map_err(|e| GalleryError::MalformedNotification(format!("Invalid event JSON: {e}")))?;

    let records = match (envelope.records, envelope.event.as_deref()) {
        (Some(records), _) => records,
        (None, Some(TEST_EVENT)) => return Ok(Vec::new()),
        (None, _) => {
            return Err(GalleryError::MalformedNotification(
                "Event has no Records".to_string(),
            ))
        }
    };

    records
        .into_iter()
        .map(|record| {
            let key = decode_object_key(&record.s3.object.key)?;
            Ok(ObjectRef::new(record.s3.bucket.name, key))
        })
        .collect()
}

/// Recover the real object key from its event encoding
///
/// S3 form-encodes keys in notifications: `+` stands for a space and other
/// reserved bytes are percent-escaped.
pub fn decode_object_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|key| key.into_owned())
        .map_err(|e| GalleryError::MalformedNotification(format!("Invalid key encoding {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_body(bucket: &str, key: &str) -> String {
        serde_json::json!({
            "Records": [{
                "eventVersion": "2.1",
                "eventSource": "aws:s3",
                "eventName": "ObjectCreated:Put",
                "s3": {
                    "bucket": { "name": bucket, "arn": format!("arn:aws:s3:::{bucket}") },
                    "object": { "key": key, "size": 1024, "eTag": "abc" }
                }
            }]
        })
        .to_string()
    }

    #[test]
    fn test_plus_decodes_to_space() {
        assert_eq!(decode_object_key("foo+bar.png").unwrap(), "foo bar.png");
    }

    #[test]
    fn test_percent_escapes_decoded() {
        assert_eq!(
            decode_object_key("uploads/1700000000000-my%2Bcat+%281%29.png").unwrap(),
            "uploads/1700000000000-my+cat (1).png"
        );
        assert_eq!(decode_object_key("caf%C3%A9.png").unwrap(), "café.png");
    }

    #[test]
    fn test_invalid_utf8_key_rejected() {
        assert!(matches!(
            decode_object_key("bad%FF.png"),
            Err(GalleryError::MalformedNotification(_))
        ));
    }

    #[test]
    fn test_decode_notification() {
        let objects = decode_notification(&event_body("gallery-images", "uploads/1-foo+bar.png"))
            .unwrap();
        assert_eq!(
            objects,
            vec![ObjectRef::new("gallery-images", "uploads/1-foo bar.png")]
        );
    }

    #[test]
    fn test_multiple_records() {
        let body = serde_json::json!({
            "Records": [
                { "s3": { "bucket": { "name": "b" }, "object": { "key": "uploads/a.png" } } },
                { "s3": { "bucket": { "name": "b" }, "object": { "key": "uploads/b.png" } } }
            ]
        })
        .to_string();

        let objects = decode_notification(&body).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[1].key, "uploads/b.png");
    }

    #[test]
    fn test_test_event_yields_nothing() {
        let body = r#"{"Service":"Amazon S3","Event":"s3:TestEvent","Time":"2024-01-15T10:30:00.000Z","Bucket":"gallery-images"}"#;
        assert!(decode_notification(body).unwrap().is_empty());
    }

    #[test]
    fn test_missing_records_rejected() {
        assert!(matches!(
            decode_notification(r#"{"hello":"world"}"#),
            Err(GalleryError::MalformedNotification(_))
        ));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            decode_notification("not json"),
            Err(GalleryError::MalformedNotification(_))
        ));
    }
}
