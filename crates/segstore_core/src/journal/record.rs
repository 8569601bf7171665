//! Journal record types and serialization.

use crate::attributes::AttributeId;
use crate::error::{SegmentError, SegmentResult};
use crate::types::SegmentId;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const LOG_MAGIC: [u8; 4] = *b"SSLG";

/// Current journal format version.
pub const LOG_VERSION: u16 = 1;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogRecordType {
    /// Segment creation.
    CreateSegment = 1,
    /// Data append.
    Append = 2,
    /// Attribute-only update.
    UpdateAttributes = 3,
    /// Seal.
    Seal = 4,
    /// Merge of a sealed source into a target.
    Merge = 5,
    /// Truncation.
    Truncate = 6,
    /// Deletion.
    Delete = 7,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::CreateSegment),
            2 => Some(Self::Append),
            3 => Some(Self::UpdateAttributes),
            4 => Some(Self::Seal),
            5 => Some(Self::Merge),
            6 => Some(Self::Truncate),
            7 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Short name used in listings.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::CreateSegment => "create",
            Self::Append => "append",
            Self::UpdateAttributes => "update_attributes",
            Self::Seal => "seal",
            Self::Merge => "merge",
            Self::Truncate => "truncate",
            Self::Delete => "delete",
        }
    }
}

/// A committed mutation.
///
/// Attribute lists hold resolved values, never the conditional updates that
/// produced them, so replay does not re-evaluate conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogRecord {
    /// A segment was created.
    CreateSegment {
        /// Assigned id.
        segment_id: SegmentId,
        /// Segment name.
        name: String,
        /// Initial attribute values.
        attributes: Vec<(AttributeId, i64)>,
    },

    /// Bytes were appended.
    Append {
        /// Target segment.
        segment_id: SegmentId,
        /// Offset of the first byte.
        offset: u64,
        /// Appended bytes.
        #[serde(with = "cbor_bytes")]
        data: Vec<u8>,
        /// Attribute values committed with the append.
        attributes: Vec<(AttributeId, i64)>,
    },

    /// Attributes changed without data.
    UpdateAttributes {
        /// Target segment.
        segment_id: SegmentId,
        /// New values. NULL means removed.
        attributes: Vec<(AttributeId, i64)>,
    },

    /// A segment was sealed.
    Seal {
        /// Target segment.
        segment_id: SegmentId,
        /// Final length.
        length: u64,
    },

    /// A sealed source was merged into a target.
    Merge {
        /// Receiving segment.
        target_id: SegmentId,
        /// Merged segment.
        source_id: SegmentId,
        /// Bytes moved.
        source_length: u64,
        /// Target length before the merge.
        target_offset: u64,
    },

    /// A segment was truncated.
    Truncate {
        /// Target segment.
        segment_id: SegmentId,
        /// New truncation offset.
        offset: u64,
    },

    /// A segment was deleted.
    Delete {
        /// Target segment.
        segment_id: SegmentId,
    },
}

impl LogRecord {
    /// Maximum encoded payload size; the length field is 4 bytes.
    pub const MAX_PAYLOAD_SIZE: usize = u32::MAX as usize;

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::CreateSegment { .. } => LogRecordType::CreateSegment,
            Self::Append { .. } => LogRecordType::Append,
            Self::UpdateAttributes { .. } => LogRecordType::UpdateAttributes,
            Self::Seal { .. } => LogRecordType::Seal,
            Self::Merge { .. } => LogRecordType::Merge,
            Self::Truncate { .. } => LogRecordType::Truncate,
            Self::Delete { .. } => LogRecordType::Delete,
        }
    }

    /// Returns the segment the record changes. For merges, the target.
    #[must_use]
    pub fn segment_id(&self) -> SegmentId {
        match self {
            Self::CreateSegment { segment_id, .. }
            | Self::Append { segment_id, .. }
            | Self::UpdateAttributes { segment_id, .. }
            | Self::Seal { segment_id, .. }
            | Self::Truncate { segment_id, .. }
            | Self::Delete { segment_id } => *segment_id,
            Self::Merge { target_id, .. } => *target_id,
        }
    }

    /// Serializes the record payload (without envelope) as CBOR.
    ///
    /// # Errors
    ///
    /// Returns a codec error if encoding fails.
    pub fn encode_payload(&self) -> SegmentResult<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| SegmentError::codec(format!("failed to encode {}: {e}", self.record_type().name())))?;
        Ok(buf)
    }

    /// Deserializes a record payload and checks it against the header type.
    ///
    /// # Errors
    ///
    /// Returns a codec error for undecodable payloads and a corruption
    /// error if the payload disagrees with `record_type`.
    pub fn decode_payload(record_type: LogRecordType, payload: &[u8]) -> SegmentResult<Self> {
        let record: Self = ciborium::from_reader(payload)
            .map_err(|e| SegmentError::codec(format!("failed to decode {}: {e}", record_type.name())))?;
        if record.record_type() != record_type {
            return Err(SegmentError::journal_corruption(format!(
                "header says {} but payload is {}",
                record_type.name(),
                record.record_type().name()
            )));
        }
        Ok(record)
    }
}

/// Serializes `Vec<u8>` as a CBOR byte string instead of an array.
mod cbor_bytes {
    use serde::de::{self, SeqAccess, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(data)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        deserializer.deserialize_byte_buf(BytesVisitor)
    }

    struct BytesVisitor;

    impl<'de> Visitor<'de> for BytesVisitor {
        type Value = Vec<u8>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a byte string")
        }

        fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
            Ok(v.to_vec())
        }

        fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
            Ok(v)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_type_bytes() {
        for b in 1..=7u8 {
            let t = LogRecordType::from_byte(b).unwrap();
            assert_eq!(t.as_byte(), b);
        }
        assert!(LogRecordType::from_byte(0).is_none());
        assert!(LogRecordType::from_byte(8).is_none());
    }

    #[test]
    fn append_payload_keeps_data_and_attributes() {
        let record = LogRecord::Append {
            segment_id: SegmentId::new(4),
            offset: 12,
            data: b"payload".to_vec(),
            attributes: vec![(AttributeId::EVENT_COUNT, 3), (AttributeId::from_parts(1, 2), -1)],
        };
        let payload = record.encode_payload().unwrap();
        // Byte string, not an array of small integers.
        assert!(payload.windows(7).any(|w| w == b"payload"));
        let decoded = LogRecord::decode_payload(LogRecordType::Append, &payload).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn header_type_mismatch_is_corruption() {
        let record = LogRecord::Delete {
            segment_id: SegmentId::new(1),
        };
        let payload = record.encode_payload().unwrap();
        let err = LogRecord::decode_payload(LogRecordType::Seal, &payload).unwrap_err();
        assert!(matches!(err, SegmentError::JournalCorruption { .. }));
    }

    #[test]
    fn merge_reports_target() {
        let record = LogRecord::Merge {
            target_id: SegmentId::new(1),
            source_id: SegmentId::new(2),
            source_length: 10,
            target_offset: 5,
        };
        assert_eq!(record.segment_id(), SegmentId::new(1));
    }

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(compute_crc32(b""), 0);
    }
}
