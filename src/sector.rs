//! Sector sources: a stream backend that eagerly reads every sector up
//! front, and a memory-mapped backend for files too large to comfortably
//! copy into the heap.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Mutex;

use memmap2::{Mmap, MmapOptions};

use crate::error::{Error, Result};

/// Files at or above this size prefer the mapped backend over the stream
/// backend.
pub const MAPPED_BACKEND_THRESHOLD: u64 = 100 * 1024 * 1024;

/// Sectors beyond this many stay cached once decoded by the mapped backend.
const MAPPED_CACHE_SLOTS: usize = 1024;

/// `get_sector(i)` -> byte slice of length `sector_size`, for 0-based `i`.
pub trait SectorSource {
    fn sector_size(&self) -> u32;
    fn sector_count(&self) -> u64;
    fn get_sector(&self, index: u64) -> Result<Vec<u8>>;
}

/// Eagerly reads the whole file into sector-sized chunks at construction
/// time, the way a `RAW` image wrapper reads fixed-size blocks off a
/// `Read + Seek` handle; this backend just reads all of them once instead
/// of on demand.
pub struct StreamSectorSource {
    sector_size: u32,
    sectors: Vec<Vec<u8>>,
}

impl StreamSectorSource {
    pub fn open<R: Read + Seek>(mut reader: R, sector_size: u32) -> Result<Self> {
        reader.seek(SeekFrom::Start(0)).map_err(Error::Read)?;
        let mut sectors = Vec::new();
        let mut buf = vec![0u8; sector_size as usize];
        loop {
            let mut filled = 0usize;
            while filled < buf.len() {
                let n = reader.read(&mut buf[filled..]).map_err(Error::Read)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            if filled == 0 {
                break;
            }
            let mut sector = buf.clone();
            sector.truncate(filled);
            sector.resize(sector_size as usize, 0);
            sectors.push(sector);
        }
        Ok(StreamSectorSource {
            sector_size,
            sectors,
        })
    }
}

impl SectorSource for StreamSectorSource {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.sectors.len() as u64
    }

    fn get_sector(&self, index: u64) -> Result<Vec<u8>> {
        self.sectors
            .get(index as usize)
            .cloned()
            .ok_or(Error::BadSector {
                index,
                available: self.sector_count(),
            })
    }
}

/// Backed by a read-only memory mapping; sectors are projected as
/// sub-slices of the mapping and a small bounded cache keeps the hottest
/// ones already copied out, in the style of `NodeSegmentV2::open`'s
/// `unsafe { Mmap::map(&file) }` over a segment file.
pub struct MappedSectorSource {
    sector_size: u32,
    mmap: Mmap,
    cache: Mutex<Vec<Option<Vec<u8>>>>,
}

impl MappedSectorSource {
    pub fn open(file: &File, sector_size: u32) -> Result<Self> {
        // Safety: the mapping is read-only for the lifetime of this source,
        // and the caller is expected not to mutate the backing file out
        // from under it (the same contract `segment.rs`'s readers rely on).
        let mmap = unsafe { MmapOptions::new().map(file) }.map_err(Error::Read)?;
        let slots = MAPPED_CACHE_SLOTS.min((mmap.len() / sector_size.max(1) as usize).max(1));
        Ok(MappedSectorSource {
            sector_size,
            mmap,
            cache: Mutex::new(vec![None; slots]),
        })
    }
}

impl SectorSource for MappedSectorSource {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn sector_count(&self) -> u64 {
        self.mmap.len() as u64 / self.sector_size as u64
    }

    fn get_sector(&self, index: u64) -> Result<Vec<u8>> {
        let available = self.sector_count();
        if index >= available {
            return Err(Error::BadSector { index, available });
        }

        let start = index as usize * self.sector_size as usize;
        let end = start + self.sector_size as usize;
        let slice = self
            .mmap
            .get(start..end)
            .ok_or(Error::BadSector { index, available })?;

        let mut cache = self.cache.lock().expect("sector cache mutex poisoned");
        let slots = cache.len();
        if slots == 0 {
            return Ok(slice.to_vec());
        }
        let slot = (index as usize) % slots;
        if let Some(cached) = &cache[slot] {
            if cached.as_slice() == slice {
                return Ok(cached.clone());
            }
        }
        let owned = slice.to_vec();
        cache[slot] = Some(owned.clone());
        Ok(owned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn stream_source_splits_into_fixed_size_sectors() {
        let data = vec![1u8; 4096 * 3];
        let source = StreamSectorSource::open(Cursor::new(data), 4096).unwrap();
        assert_eq!(source.sector_count(), 3);
        assert_eq!(source.get_sector(0).unwrap().len(), 4096);
    }

    #[test]
    fn stream_source_pads_a_short_trailing_sector() {
        let mut data = vec![2u8; 4096];
        data.extend(vec![3u8; 100]);
        let source = StreamSectorSource::open(Cursor::new(data), 4096).unwrap();
        assert_eq!(source.sector_count(), 2);
        let last = source.get_sector(1).unwrap();
        assert_eq!(last.len(), 4096);
        assert_eq!(last[0], 3);
        assert_eq!(last[100], 0);
    }

    #[test]
    fn stream_source_reports_bad_sector_out_of_range() {
        let source = StreamSectorSource::open(Cursor::new(vec![0u8; 4096]), 4096).unwrap();
        let err = source.get_sector(5).unwrap_err();
        assert!(matches!(err, Error::BadSector { index: 5, available: 1 }));
    }

    #[test]
    fn mapped_source_reads_sectors_from_a_real_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        let mut data = vec![7u8; 4096];
        data.extend(vec![8u8; 4096]);
        std::io::Write::write_all(&mut tmp, &data).unwrap();
        tmp.flush().unwrap();

        let file = File::open(tmp.path()).unwrap();
        let source = MappedSectorSource::open(&file, 4096).unwrap();
        assert_eq!(source.sector_count(), 2);
        assert_eq!(source.get_sector(0).unwrap()[0], 7);
        assert_eq!(source.get_sector(1).unwrap()[0], 8);
    }

    #[test]
    fn mapped_source_reports_bad_sector_out_of_range() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut tmp, &vec![0u8; 4096]).unwrap();
        tmp.flush().unwrap();

        let file = File::open(tmp.path()).unwrap();
        let source = MappedSectorSource::open(&file, 4096).unwrap();
        let err = source.get_sector(9).unwrap_err();
        assert!(matches!(err, Error::BadSector { index: 9, available: 1 }));
    }
}
