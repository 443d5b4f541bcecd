//! Per-block chunk tokenizer.
//!
//! The on-wire chunk encoding isn't documented by FileMaker; this crate
//! treats it as a black-box tokenizer. The layout below is this crate's own
//! choice (see `DESIGN.md`, Open Question 2), picked only to be internally
//! consistent and to produce every field a chunk needs downstream:
//!
//! ```text
//! byte 0         tag
//!   0x01  PATH_PUSH        byte 1 = segment length n (1..=3), then n bytes of segment data
//!   0x02  PATH_POP         (no operands)
//!   0x03  FIELD_REF_SIMPLE byte 1 = ref_simple, bytes 2..4 = data length (u16 BE), then data
//!   0x04  DATA_SEGMENT     bytes 1..3 = segment_index (u16 BE), bytes 3..5 = data length (u16 BE), then data
//!   0x05  NOOP             bytes 1..3 = data length (u16 BE), then data (carried through unchanged)
//!   0x00  END              terminates the chunk chain for this block
//! ```
//! Decoding stops (tolerantly, not as an error) on an unrecognized tag, a
//! truncated operand, or the `END` marker — whichever comes first.

/// The closed set of chunk kinds a block's payload can tokenize into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkType {
    PathPush,
    PathPop,
    FieldRefSimple,
    DataSegment,
    Noop,
}

/// One decoded chunk, before path annotation (the dispatcher adds that).
#[derive(Debug, Clone)]
pub struct RawChunk {
    pub kind: ChunkType,
    pub data: Vec<u8>,
    pub ref_simple: u8,
    pub segment_index: u16,
}

const TAG_END: u8 = 0x00;
const TAG_PATH_PUSH: u8 = 0x01;
const TAG_PATH_POP: u8 = 0x02;
const TAG_FIELD_REF_SIMPLE: u8 = 0x03;
const TAG_DATA_SEGMENT: u8 = 0x04;
const TAG_NOOP: u8 = 0x05;

/// Parses a block's payload into a (logically) singly linked chunk chain,
/// represented as a `Vec` in traversal order (DESIGN.md, Open Question 1).
pub fn decode_chunks(payload: &[u8]) -> Vec<RawChunk> {
    let mut chunks = Vec::new();
    let mut pos = 0usize;

    while pos < payload.len() {
        let tag = payload[pos];
        pos += 1;

        match tag {
            TAG_END => break,
            TAG_PATH_PUSH => {
                let Some(&len) = payload.get(pos) else { break };
                pos += 1;
                let len = len as usize;
                if len == 0 || len > 3 || pos + len > payload.len() {
                    break;
                }
                let data = payload[pos..pos + len].to_vec();
                pos += len;
                chunks.push(RawChunk {
                    kind: ChunkType::PathPush,
                    data,
                    ref_simple: 0,
                    segment_index: 0,
                });
            }
            TAG_PATH_POP => {
                chunks.push(RawChunk {
                    kind: ChunkType::PathPop,
                    data: Vec::new(),
                    ref_simple: 0,
                    segment_index: 0,
                });
            }
            TAG_FIELD_REF_SIMPLE => {
                let Some(&ref_simple) = payload.get(pos) else { break };
                pos += 1;
                let Some(len) = read_u16_be(payload, pos) else { break };
                pos += 2;
                let len = len as usize;
                if pos + len > payload.len() {
                    break;
                }
                let data = payload[pos..pos + len].to_vec();
                pos += len;
                chunks.push(RawChunk {
                    kind: ChunkType::FieldRefSimple,
                    data,
                    ref_simple,
                    segment_index: 0,
                });
            }
            TAG_DATA_SEGMENT => {
                let Some(segment_index) = read_u16_be(payload, pos) else { break };
                pos += 2;
                let Some(len) = read_u16_be(payload, pos) else { break };
                pos += 2;
                let len = len as usize;
                if pos + len > payload.len() {
                    break;
                }
                let data = payload[pos..pos + len].to_vec();
                pos += len;
                chunks.push(RawChunk {
                    kind: ChunkType::DataSegment,
                    data,
                    ref_simple: 0,
                    segment_index,
                });
            }
            TAG_NOOP => {
                let Some(len) = read_u16_be(payload, pos) else { break };
                pos += 2;
                let len = len as usize;
                if pos + len > payload.len() {
                    break;
                }
                let data = payload[pos..pos + len].to_vec();
                pos += len;
                chunks.push(RawChunk {
                    kind: ChunkType::Noop,
                    data,
                    ref_simple: 0,
                    segment_index: 0,
                });
            }
            _ => break,
        }
    }

    chunks
}

fn read_u16_be(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push(segment: &[u8]) -> Vec<u8> {
        let mut v = vec![TAG_PATH_PUSH, segment.len() as u8];
        v.extend_from_slice(segment);
        v
    }

    fn field_ref(ref_simple: u8, data: &[u8]) -> Vec<u8> {
        let mut v = vec![TAG_FIELD_REF_SIMPLE, ref_simple];
        v.extend_from_slice(&(data.len() as u16).to_be_bytes());
        v.extend_from_slice(data);
        v
    }

    #[test]
    fn decodes_push_then_field_ref_then_pop() {
        let mut payload = Vec::new();
        payload.extend(push(&[3]));
        payload.extend(field_ref(16, b"Contacts"));
        payload.push(TAG_PATH_POP);
        payload.push(TAG_END);

        let chunks = decode_chunks(&payload);
        assert_eq!(chunks.len(), 3);
        assert!(matches!(chunks[0].kind, ChunkType::PathPush));
        assert_eq!(chunks[0].data, vec![3]);
        assert!(matches!(chunks[1].kind, ChunkType::FieldRefSimple));
        assert_eq!(chunks[1].ref_simple, 16);
        assert_eq!(chunks[1].data, b"Contacts");
        assert!(matches!(chunks[2].kind, ChunkType::PathPop));
    }

    #[test]
    fn stops_tolerantly_on_truncated_operand() {
        let payload = vec![TAG_FIELD_REF_SIMPLE, 5, 0]; // missing second length byte and data
        let chunks = decode_chunks(&payload);
        assert!(chunks.is_empty());
    }

    #[test]
    fn data_segment_round_trips_segment_index() {
        let mut payload = Vec::new();
        payload.push(TAG_DATA_SEGMENT);
        payload.extend_from_slice(&42u16.to_be_bytes());
        payload.extend_from_slice(&4u16.to_be_bytes());
        payload.extend_from_slice(b"data");

        let chunks = decode_chunks(&payload);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].segment_index, 42);
        assert_eq!(chunks[0].data, b"data");
    }
}
