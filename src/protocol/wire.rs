//! Wire codec for stream transports.
//!
//! Message transports (WebSocket) carry each encrypted record as one binary
//! message and need no extra framing. Stream transports (raw TCP) encode
//! each record as text-safe base64 delimited by a reserved byte that the
//! encoding alphabet never produces:
//!
//! ```text
//! <LF><base64(encrypted record)><LF>
//! ```
//!
//! The receiver buffers arbitrary read chunks, splits on the delimiter, and
//! yields complete records; a trailing partial fragment is retained for the
//! next read.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tracing::debug;

use crate::core::constants::RECORD_DELIMITER;

/// Encode one encrypted record for a stream transport.
pub fn encode_record(record: &[u8]) -> Vec<u8> {
    let encoded = BASE64.encode(record);
    let mut out = Vec::with_capacity(encoded.len() + 2);
    out.push(RECORD_DELIMITER);
    out.extend_from_slice(encoded.as_bytes());
    out.push(RECORD_DELIMITER);
    out
}

/// Reassembles delimited records from a fragmented byte stream.
#[derive(Default)]
pub struct RecordSplitter {
    buffer: Vec<u8>,
}

impl RecordSplitter {
    /// Create an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a read chunk; returns every complete record it finishes.
    ///
    /// Chunks that fail base64 decoding are dropped individually; the
    /// stream itself stays usable.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        if !self.buffer.contains(&RECORD_DELIMITER) {
            return Vec::new();
        }

        let mut pieces: Vec<&[u8]> = self.buffer.split(|&b| b == RECORD_DELIMITER).collect();
        // The final piece is an unterminated fragment (possibly empty).
        let tail = pieces.pop().map(<[u8]>::to_vec).unwrap_or_default();

        let mut records = Vec::new();
        for piece in pieces {
            if piece.is_empty() {
                continue;
            }
            match BASE64.decode(piece) {
                Ok(record) => records.push(record),
                Err(e) => debug!("dropping undecodable record chunk: {e}"),
            }
        }
        self.buffer = tail;
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_record_roundtrip() {
        let mut splitter = RecordSplitter::new();
        let wire = encode_record(b"encrypted bytes");
        let records = splitter.push(&wire);
        assert_eq!(records, vec![b"encrypted bytes".to_vec()]);
    }

    #[test]
    fn fragmented_record_reassembles() {
        let mut splitter = RecordSplitter::new();
        let wire = encode_record(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]);

        // Same record split across three separate reads.
        let (a, rest) = wire.split_at(3);
        let (b, c) = rest.split_at(rest.len() / 2);
        assert!(splitter.push(a).is_empty());
        assert!(splitter.push(b).is_empty());
        let records = splitter.push(c);
        assert_eq!(records, vec![vec![0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]]);
    }

    #[test]
    fn multiple_records_in_one_read() {
        let mut splitter = RecordSplitter::new();
        let mut wire = encode_record(b"first");
        wire.extend_from_slice(&encode_record(b"second"));
        let records = splitter.push(&wire);
        assert_eq!(records, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn partial_tail_is_retained() {
        let mut splitter = RecordSplitter::new();
        let first = encode_record(b"first");
        let second = encode_record(b"second");

        let mut read = first.clone();
        read.extend_from_slice(&second[..4]);
        assert_eq!(splitter.push(&read), vec![b"first".to_vec()]);
        assert_eq!(splitter.push(&second[4..]), vec![b"second".to_vec()]);
    }

    #[test]
    fn corrupt_chunk_is_dropped_stream_survives() {
        let mut splitter = RecordSplitter::new();
        let mut wire = b"\n!!!not base64!!!\n".to_vec();
        wire.extend_from_slice(&encode_record(b"good"));
        assert_eq!(splitter.push(&wire), vec![b"good".to_vec()]);
    }

    #[test]
    fn delimiter_is_outside_encoding_alphabet() {
        // A record of every byte value never encodes to the delimiter.
        let all_bytes = (0u8..=255).collect::<Vec<u8>>();
        let encoded = BASE64.encode(&all_bytes);
        assert!(!encoded.as_bytes().contains(&RECORD_DELIMITER));
    }
}
