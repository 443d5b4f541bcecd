//! Decoded sectors: each sector decodes into a doubly linked block carrying
//! a demasked payload ready for chunk parsing.

use crate::error::{Error, Result};
use crate::header::FormatParams;

/// The deletion flag is not named at a specific bit by spec; this crate
/// uses the top bit of the raw `prev_id` field (DESIGN.md, Open Question 3).
const DELETED_FLAG: u32 = 0x8000_0000;

/// A decoded sector: the links in the block chain plus its demasked payload.
#[derive(Debug, Clone)]
pub struct Block {
    pub this_id: u32,
    pub prev_id: u32,
    pub next_id: u32,
    pub payload: Vec<u8>,
    pub deleted: bool,
}

/// Parses one sector into a `Block`, XOR-demasking its payload.
pub fn decode_block(sector: &[u8], params: &FormatParams, this_id: u32) -> Result<Block> {
    let raw_prev = read_uint_be(sector, params.prev_offset, 4)
        .ok_or(Error::Malloc("sector too small for prev_id field".into()))?;
    let next_id = read_uint_be(sector, params.next_offset, 4)
        .ok_or(Error::Malloc("sector too small for next_id field".into()))?;

    let deleted = raw_prev & DELETED_FLAG != 0;
    let prev_id = raw_prev & !DELETED_FLAG;

    let payload_len = match params.payload_len_offset {
        Some(offset) => {
            read_uint_be(sector, offset, 2).unwrap_or(0) as usize
        }
        None => (params.sector_size as usize).saturating_sub(params.head_len),
    };

    let start = params.head_len;
    let end = (start + payload_len).min(sector.len());
    let mut payload = if start <= end {
        sector[start..end].to_vec()
    } else {
        Vec::new()
    };

    if params.xor_mask != 0 {
        for b in payload.iter_mut() {
            *b ^= params.xor_mask;
        }
    }

    Ok(Block {
        this_id,
        prev_id,
        next_id,
        payload,
        deleted,
    })
}

/// Reads a `width`-byte (2 or 4) big-endian unsigned integer at `offset`.
fn read_uint_be(buf: &[u8], offset: usize, width: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + width)?;
    let mut value = 0u32;
    for &b in bytes {
        value = (value << 8) | b as u32;
    }
    Some(value)
}

/// Validates block 1's reported sector count against the file's actual size:
/// the last sector in the chain plus the header sector plus any throwaway
/// sectors should exactly cover the file.
pub fn validate_sector_count(block1: &Block, params: &FormatParams, file_size: u64) -> Result<()> {
    let expected_sectors = block1.next_id as u64 + 1 + params.sector_index_shift;
    let expected = expected_sectors * params.sector_size as u64;
    if expected != file_size {
        return Err(Error::BadSectorCount {
            expected,
            actual: file_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Charset;

    fn v7_params() -> FormatParams {
        FormatParams {
            version_num: 7,
            sector_size: 4096,
            xor_mask: 0x5A,
            prev_offset: 4,
            next_offset: 8,
            payload_len_offset: None,
            head_len: 20,
            charset: Charset::Scsu,
            sector_index_shift: 0,
            version_date: None,
            version_string: None,
        }
    }

    #[test]
    fn decodes_links_and_demasks_payload() {
        let mut sector = vec![0u8; 4096];
        sector[4..8].copy_from_slice(&7u32.to_be_bytes());
        sector[8..12].copy_from_slice(&9u32.to_be_bytes());
        sector[20] = 0xAA; // masked byte
        let params = v7_params();

        let block = decode_block(&sector, &params, 1).unwrap();
        assert_eq!(block.prev_id, 7);
        assert_eq!(block.next_id, 9);
        assert_eq!(block.payload[0], 0xAA ^ 0x5A);
        assert!(!block.deleted);
    }

    #[test]
    fn deleted_flag_is_masked_off_prev_id() {
        let mut sector = vec![0u8; 4096];
        let raw_prev = 5u32 | DELETED_FLAG;
        sector[4..8].copy_from_slice(&raw_prev.to_be_bytes());
        let params = v7_params();

        let block = decode_block(&sector, &params, 2).unwrap();
        assert!(block.deleted);
        assert_eq!(block.prev_id, 5);
    }

    #[test]
    fn sector_count_mismatch_is_an_error() {
        let params = v7_params();
        let block = Block {
            this_id: 1,
            prev_id: 0,
            next_id: 3,
            payload: Vec::new(),
            deleted: false,
        };
        let err = validate_sector_count(&block, &params, 123).unwrap_err();
        assert!(matches!(err, Error::BadSectorCount { .. }));
    }

    #[test]
    fn sector_count_match_is_ok() {
        let params = v7_params();
        let block = Block {
            this_id: 1,
            prev_id: 0,
            next_id: 3,
            payload: Vec::new(),
            deleted: false,
        };
        // (3 + 1 + 0) * 4096
        validate_sector_count(&block, &params, 4 * 4096).unwrap();
    }
}
