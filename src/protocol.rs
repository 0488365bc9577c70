//! Wire codec for the CIS-IP2 control protocol.
//!
//! Every frame is a single JSON object:
//!
//! ```text
//! {"type": "set" | "get" | "notify" | "result", "feature": "<name>", "value": <opt>}
//! ```
//!
//! There is no length prefix. The receiver writes one document per TCP
//! segment in practice, but segments can coalesce or split, so
//! [`FrameDecoder`] treats the stream as a sequence of concatenated JSON
//! documents and buffers incomplete ones across reads.
//!
//! Direction:
//! - `set`, `get`: client → receiver
//! - `notify`, `result`: receiver → client

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::MAX_PENDING_FRAME_BYTES;
use crate::error::ClientError;

/// Envelope `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Change a feature (client → receiver).
    Set,
    /// Query a feature (client → receiver).
    Get,
    /// Unsolicited state change (receiver → client).
    Notify,
    /// Reply to a `set` or `get` (receiver → client).
    Result,
}

impl MessageKind {
    /// Wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Get => "get",
            Self::Notify => "notify",
            Self::Result => "result",
        }
    }

    /// True for kinds only the receiver sends.
    pub fn is_inbound(self) -> bool {
        matches!(self, Self::Notify | Self::Result)
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The subset of [`MessageKind`] a client may put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Query a feature.
    Get,
    /// Change a feature.
    Set,
}

impl From<RequestKind> for MessageKind {
    fn from(kind: RequestKind) -> Self {
        match kind {
            RequestKind::Get => Self::Get,
            RequestKind::Set => Self::Set,
        }
    }
}

/// A decoded protocol envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Envelope type.
    #[serde(rename = "type")]
    pub kind: MessageKind,
    /// Feature name. Replies from the receiver may leave it out, in which
    /// case it decodes as an empty string.
    #[serde(default)]
    pub feature: String,
    /// Opaque payload (string, number, or absent).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl Message {
    /// Encode this message as a wire frame.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("JSON serialization cannot fail")
    }
}

/// Borrowed view of an outbound envelope so encoding doesn't clone the payload.
#[derive(Serialize)]
struct RequestEnvelope<'a> {
    #[serde(rename = "type")]
    kind: MessageKind,
    feature: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<&'a Value>,
}

/// Encode a `get` or `set` request.
///
/// The caller guarantees `feature` is non-empty; feature names are not
/// validated here.
pub fn encode_request(kind: RequestKind, feature: &str, value: Option<&Value>) -> Vec<u8> {
    let envelope = RequestEnvelope {
        kind: kind.into(),
        feature,
        value,
    };
    serde_json::to_vec(&envelope).expect("JSON serialization cannot fail")
}

/// Decode exactly one complete envelope.
///
/// # Errors
///
/// Returns [`ClientError::MalformedFrame`] if the bytes are not a JSON
/// object, carry trailing data, or lack a recognised `type`.
pub fn decode(bytes: &[u8]) -> Result<Message, ClientError> {
    serde_json::from_slice(bytes).map_err(|e| ClientError::MalformedFrame(e.to_string()))
}

fn message_from_value(value: Value) -> Result<Message, ClientError> {
    serde_json::from_value(value).map_err(|e| ClientError::MalformedFrame(e.to_string()))
}

/// Incremental decoder for a stream of concatenated JSON envelopes.
///
/// Feed raw chunks via [`FrameDecoder::feed`]; each call yields the frames
/// completed by that chunk, in stream order. Per-frame failures are returned
/// inline so one bad frame doesn't hide the good ones around it.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes into the decoder and extract every complete frame.
    ///
    /// An incomplete trailing document is kept for the next call. Bytes
    /// that cannot start or finish a document are reported as one
    /// `MalformedFrame` and skipped up to the next `{`, so frames after
    /// the junk still decode.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Result<Message, ClientError>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let blank = self.buf.iter().take_while(|b| b.is_ascii_whitespace()).count();
            self.buf.advance(blank);
            let Some(&first) = self.buf.first() else {
                break;
            };

            if first != b'{' {
                let skipped = self.resync(0);
                frames.push(Err(ClientError::MalformedFrame(format!(
                    "{skipped} stray bytes outside a frame"
                ))));
                continue;
            }

            let (next, end) = {
                let mut stream = serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
                let next = stream.next();
                (next, stream.byte_offset())
            };
            match next {
                Some(Ok(value)) => {
                    self.buf.advance(end);
                    frames.push(message_from_value(value));
                }
                // Incomplete document, wait for more data
                Some(Err(e)) if e.is_eof() => break,
                Some(Err(e)) => {
                    frames.push(Err(ClientError::MalformedFrame(format!("invalid JSON: {e}"))));
                    self.resync(1);
                }
                None => break,
            }
        }

        if self.buf.len() > MAX_PENDING_FRAME_BYTES {
            frames.push(Err(ClientError::MalformedFrame(format!(
                "unterminated frame exceeds {MAX_PENDING_FRAME_BYTES} bytes"
            ))));
            self.buf.clear();
        }

        frames
    }

    /// Drop everything before the first `{` at or after `from`, or the
    /// whole buffer if there is none. Returns the number of bytes dropped.
    fn resync(&mut self, from: usize) -> usize {
        let skip = self
            .buf
            .get(from..)
            .and_then(|rest| rest.iter().position(|&b| b == b'{'))
            .map_or(self.buf.len(), |pos| from + pos);
        self.buf.advance(skip);
        skip
    }

    /// Returns true if the decoder has buffered partial data.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_frames(decoder: &mut FrameDecoder, bytes: &[u8]) -> Vec<Message> {
        decoder
            .feed(bytes)
            .into_iter()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_set_request_round_trip() {
        let encoded = encode_request(RequestKind::Set, "power", Some(&json!("on")));
        let msg = decode(&encoded).unwrap();
        assert_eq!(msg.kind, MessageKind::Set);
        assert_eq!(msg.feature, "power");
        assert_eq!(msg.value, Some(json!("on")));
    }

    #[test]
    fn test_get_request_omits_value() {
        let encoded = encode_request(RequestKind::Get, "main.volumestep", None);
        let text = String::from_utf8(encoded.clone()).unwrap();
        assert!(!text.contains("value"));
        assert_eq!(
            serde_json::from_slice::<Value>(&encoded).unwrap(),
            json!({"type": "get", "feature": "main.volumestep"})
        );
    }

    #[test]
    fn test_numeric_value_round_trip() {
        let encoded = encode_request(RequestKind::Set, "main.volumestep", Some(&json!(35)));
        let msg = decode(&encoded).unwrap();
        assert_eq!(msg.value, Some(json!(35)));
    }

    #[test]
    fn test_message_encode_matches_request_encoding() {
        let msg = Message {
            kind: MessageKind::Set,
            feature: "main.input".to_string(),
            value: Some(json!("bd")),
        };
        assert_eq!(
            msg.encode(),
            encode_request(RequestKind::Set, "main.input", Some(&json!("bd")))
        );
    }

    #[test]
    fn test_result_without_feature_decodes() {
        let msg = decode(br#"{"type":"result","value":"ACK"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Result);
        assert_eq!(msg.feature, "");
        assert_eq!(msg.value, Some(json!("ACK")));
    }

    #[test]
    fn test_null_value_decodes_as_absent() {
        let msg = decode(br#"{"type":"notify","feature":"power","value":null}"#).unwrap();
        assert_eq!(msg.value, None);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let err = decode(br#"{"type":"event","feature":"power"}"#).unwrap_err();
        assert!(matches!(err, ClientError::MalformedFrame(_)));
    }

    #[test]
    fn test_type_is_case_sensitive() {
        assert!(decode(br#"{"type":"NOTIFY","feature":"power"}"#).is_err());
    }

    #[test]
    fn test_missing_type_rejected() {
        assert!(decode(br#"{"feature":"power","value":"on"}"#).is_err());
    }

    #[test]
    fn test_non_json_rejected() {
        assert!(decode(b"ACK\r\n").is_err());
    }

    #[test]
    fn test_multiple_frames_in_single_feed() {
        let mut decoder = FrameDecoder::new();
        let frames = ok_frames(
            &mut decoder,
            br#"{"type":"notify","feature":"power","value":"on"}{"type":"result","value":"ACK"}
{"type":"notify","feature":"main.mute","value":"off"}"#,
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].kind, MessageKind::Notify);
        assert_eq!(frames[1].kind, MessageKind::Result);
        assert_eq!(frames[2].feature, "main.mute");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_partial_frame_reassembly() {
        let encoded = br#"{"type":"result","feature":"main.input","value":"sat"}"#;
        let mut decoder = FrameDecoder::new();

        let mid = encoded.len() / 2;
        assert!(decoder.feed(&encoded[..mid]).is_empty());
        assert!(decoder.has_partial());

        let frames = ok_frames(&mut decoder, &encoded[mid..]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].value, Some(json!("sat")));
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_byte_at_a_time() {
        let encoded = br#"{"type":"notify","feature":"power","value":"off"}"#;
        let mut decoder = FrameDecoder::new();
        for (i, byte) in encoded.iter().enumerate() {
            let frames = decoder.feed(&[*byte]);
            if i < encoded.len() - 1 {
                assert!(frames.is_empty());
            } else {
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].as_ref().unwrap().feature, "power");
            }
        }
    }

    #[test]
    fn test_complete_frame_followed_by_partial() {
        let mut decoder = FrameDecoder::new();
        let frames = ok_frames(
            &mut decoder,
            br#"{"type":"result","value":"NAK"}{"type":"noti"#,
        );
        assert_eq!(frames.len(), 1);
        assert!(decoder.has_partial());

        let frames = ok_frames(&mut decoder, br#"fy","feature":"power"}"#);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Notify);
    }

    #[test]
    fn test_bad_frame_between_good_frames() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(
            br#"{"type":"result","value":"ACK"}{"type":"bogus"}{"type":"notify","feature":"power"}"#,
        );
        assert_eq!(frames.len(), 3);
        assert!(frames[0].is_ok());
        assert!(matches!(frames[1], Err(ClientError::MalformedFrame(_))));
        assert!(frames[2].is_ok());
    }

    #[test]
    fn test_stray_bytes_before_frame_skipped() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(br#"xx{"type":"result","value":"ACK"}"#);
        assert_eq!(frames.len(), 2);
        assert!(matches!(frames[0], Err(ClientError::MalformedFrame(_))));
        assert_eq!(frames[1].as_ref().unwrap().value, Some(json!("ACK")));
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_stray_bytes_before_split_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(br#"!{"type":"res"#);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert!(decoder.has_partial());

        let frames = ok_frames(&mut decoder, br#"ult","value":"ACK"}"#);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].kind, MessageKind::Result);
        assert_eq!(frames[0].value, Some(json!("ACK")));
    }

    #[test]
    fn test_broken_frame_does_not_swallow_next_frame() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(
            br#"{"type": "notify", oops}{"type":"result","value":"NAK"}"#,
        );
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert_eq!(frames[1].as_ref().unwrap().value, Some(json!("NAK")));
    }

    #[test]
    fn test_junk_without_brace_is_discarded() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"}}garbage");
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert!(!decoder.has_partial());

        let frames = ok_frames(&mut decoder, br#"{"type":"result","value":"ERR"}"#);
        assert_eq!(frames[0].value, Some(json!("ERR")));
    }

    #[test]
    fn test_non_object_document_rejected() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(br#"[1,2,3] {"type":"result"}"#);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].is_err());
        assert!(frames[1].is_ok());
    }

    #[test]
    fn test_oversized_partial_discarded() {
        let mut decoder = FrameDecoder::new();
        let mut chunk = br#"{"type":"notify","feature":""#.to_vec();
        chunk.extend(std::iter::repeat(b'a').take(MAX_PENDING_FRAME_BYTES + 1));
        let frames = decoder.feed(&chunk);
        assert_eq!(frames.len(), 1);
        assert!(frames[0].is_err());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_whitespace_only_is_consumed() {
        let mut decoder = FrameDecoder::new();
        assert!(decoder.feed(b"  \r\n").is_empty());
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_kind_direction() {
        assert!(MessageKind::Notify.is_inbound());
        assert!(MessageKind::Result.is_inbound());
        assert!(!MessageKind::from(RequestKind::Get).is_inbound());
        assert!(!MessageKind::from(RequestKind::Set).is_inbound());
    }
}
