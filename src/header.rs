//! Header recognition: validates the 15-byte magic signature every
//! FileMaker container starts with, then reads the `HBAM3`/`HBAM5`/`HBAM7`
//! tag at offset 15 to pick the sector size, XOR mask, sector-header field
//! offsets, and character set for the file's format family.

use std::io::{Read, Seek, SeekFrom};

use crate::error::{Error, Result};

/// The 15-byte signature every recognized FileMaker container starts with.
pub const MAGIC: [u8; 15] = [
    0x00, 0x01, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x05, 0x00, 0x02, 0x00, 0x02, 0xC0,
];

const HEADER_BUF_LEN: usize = 1024;

/// The character-set converter selected for a given format family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Charset {
    /// Macintosh (classic Mac OS Roman) codepage, used by v3 files.
    Macintosh,
    /// Windows-1252, used by v5 files.
    Windows1252,
    /// The v7+ family has no table-driven converter; values are SCSU-encoded.
    Scsu,
}

/// Format parameters selected by the header, consumed by every later stage.
#[derive(Debug, Clone)]
pub struct FormatParams {
    pub version_num: u8,
    pub sector_size: u32,
    pub xor_mask: u8,
    pub prev_offset: usize,
    pub next_offset: usize,
    /// `None` means payload length is implicit: `sector_size - head_len`.
    pub payload_len_offset: Option<usize>,
    pub head_len: usize,
    pub charset: Charset,
    /// Extra sectors between the header sector and sector index 1 (the
    /// position block 1 would otherwise occupy). Pre-v7 files carry one
    /// throwaway sector here, shifting block 1 to sector index 2; v7+
    /// files have none.
    pub sector_index_shift: u64,
    pub version_date: Option<String>,
    pub version_string: Option<String>,
}

impl FormatParams {
    /// Offset (from the start of the file) of the first real block,
    /// past the format's throwaway sector(s).
    pub fn first_block_offset(&self) -> u64 {
        (1 + self.sector_index_shift) * self.sector_size as u64
    }

    /// 0-based sector index of block 1, accounting for `sector_index_shift`.
    pub fn first_block_sector_index(&self) -> u64 {
        self.first_block_offset() / self.sector_size as u64
    }
}

/// Parses the first 1024 bytes of `reader`, validating the magic and
/// selecting format parameters. On success, positions `reader` just past
/// the format's throwaway sector, ready for block 1.
pub fn parse_header<R: Read + Seek>(mut reader: R) -> Result<FormatParams> {
    let mut buf = [0u8; HEADER_BUF_LEN];
    reader.read_exact(&mut buf).map_err(Error::Read)?;

    if buf[0..15] != MAGIC {
        return Err(Error::BadMagic);
    }

    let tag = &buf[15..20];
    let params = if tag == b"HBAM7" {
        let version_num = if buf[521] == 0x1E { 12 } else { 7 };
        FormatParams {
            version_num,
            sector_size: 4096,
            xor_mask: 0x5A,
            prev_offset: 4,
            next_offset: 8,
            payload_len_offset: None,
            head_len: 20,
            charset: Charset::Scsu,
            sector_index_shift: 0,
            version_date: parse_version_date(&buf),
            version_string: parse_version_string(&buf),
        }
    } else if tag == b"HBAM3" {
        FormatParams {
            version_num: 3,
            sector_size: 1024,
            xor_mask: 0,
            prev_offset: 2,
            next_offset: 6,
            payload_len_offset: Some(12),
            head_len: 14,
            charset: Charset::Macintosh,
            sector_index_shift: 1,
            version_date: parse_version_date(&buf),
            version_string: parse_version_string(&buf),
        }
    } else if tag == b"HBAM5" {
        FormatParams {
            version_num: 5,
            sector_size: 1024,
            xor_mask: 0,
            prev_offset: 2,
            next_offset: 6,
            payload_len_offset: Some(12),
            head_len: 14,
            charset: Charset::Windows1252,
            sector_index_shift: 1,
            version_date: parse_version_date(&buf),
            version_string: parse_version_string(&buf),
        }
    } else {
        return Err(Error::BadMagic);
    };

    reader
        .seek(SeekFrom::Start(params.first_block_offset()))
        .map_err(Error::Read)?;

    Ok(params)
}

/// Best-effort parse of the 7-byte `dd-mon-yy` version-date field at offset 531.
fn parse_version_date(buf: &[u8]) -> Option<String> {
    let raw = buf.get(531..538)?;
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_matches(char::from(0)).trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// Best-effort parse of the Pascal-length version string at offset 541.
fn parse_version_string(buf: &[u8]) -> Option<String> {
    let len = *buf.get(541)? as usize;
    let start = 542;
    let end = start.checked_add(len)?;
    let raw = buf.get(start..end.min(buf.len()))?;
    if raw.is_empty() {
        None
    } else {
        Some(String::from_utf8_lossy(raw).into_owned())
    }
}
