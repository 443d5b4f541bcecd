//! The top-level `FileContext`: opens a FileMaker file, picks the right
//! sector backend, and drives block traversal for metadata discovery and
//! row emission.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use log::{debug, info};

use crate::block::{decode_block, validate_sector_count, Block};
use crate::chunk::decode_chunks;
use crate::dispatch::{dispatch_block, ChunkConsumer, ChunkStatus};
use crate::error::{Error, Result};
use crate::header::{parse_header, FormatParams};
use crate::metadata::{Metadata, MetadataExtractor};
use crate::path::PathStack;
use crate::row::RowAssembler;
use crate::sector::{MappedSectorSource, SectorSource, StreamSectorSource, MAPPED_BACKEND_THRESHOLD};

/// In-memory buffers above this size are rejected (`NoInMemoryOpenSupport`,
/// DESIGN.md Open Question 6); the mapped backend needs a real file
/// descriptor, and copying an arbitrarily large buffer defeats the purpose
/// of offering it as an alternative to the stream backend.
const MAX_IN_MEMORY_OPEN_SIZE: usize = 64 * 1024 * 1024;

/// Blocks are visited at most twice their total count before traversal
/// gives up: an always-on, bitset-based visited tracker bounds a corrupt or
/// cyclic chain regardless of file size.
const MAX_TRAVERSAL_FACTOR: u64 = 2;

/// Owns every resource a decode pass needs: format parameters, the sector
/// backend, and the file stem used to seed table names.
pub struct FileContext {
    params: FormatParams,
    source: Box<dyn SectorSource>,
    file_stem: Option<String>,
}

impl FileContext {
    /// Opens `path`, selecting the stream or mapped sector backend by file
    /// size.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::Open(format!("{}: {}", path.display(), e)))?;
        let file_size = file.metadata().map_err(Error::Read)?.len();

        let mut header_reader = file.try_clone().map_err(Error::Read)?;
        let params = parse_header(&mut header_reader)?;

        let source: Box<dyn SectorSource> = if file_size >= MAPPED_BACKEND_THRESHOLD {
            debug!("opening '{}' with the mapped sector backend", path.display());
            Box::new(MappedSectorSource::open(&file, params.sector_size)?)
        } else {
            debug!("opening '{}' with the stream sector backend", path.display());
            Box::new(StreamSectorSource::open(file, params.sector_size)?)
        };

        validate_first_block(&*source, &params, file_size)?;

        let file_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s.to_string());

        Ok(FileContext {
            params,
            source,
            file_stem,
        })
    }

    /// Opens an in-memory buffer with the stream backend. Buffers above
    /// `MAX_IN_MEMORY_OPEN_SIZE` are rejected rather than silently copied.
    pub fn open_in_memory(buffer: Vec<u8>) -> Result<Self> {
        if buffer.len() > MAX_IN_MEMORY_OPEN_SIZE {
            return Err(Error::NoInMemoryOpenSupport);
        }
        let file_size = buffer.len() as u64;

        let mut header_reader = Cursor::new(&buffer);
        let params = parse_header(&mut header_reader)?;

        let source: Box<dyn SectorSource> = Box::new(StreamSectorSource::open(
            Cursor::new(buffer),
            params.sector_size,
        )?);

        validate_first_block(&*source, &params, file_size)?;

        Ok(FileContext {
            params,
            source,
            file_stem: None,
        })
    }

    /// Releases this context's resources. Dropping a `FileContext` already
    /// does this; the explicit method exists for callers that prefer to
    /// close a file deliberately rather than rely on scope exit.
    pub fn close(self) {}

    /// One-pass metadata extraction: walks every block once, recording
    /// every table and column definition it finds.
    pub fn discover_all_metadata(&self) -> Result<Metadata> {
        let mut extractor = MetadataExtractor::new(&self.params, self.file_stem.as_deref());
        self.traverse(&mut extractor)?;
        Ok(extractor.finish())
    }

    /// Convenience façade: a full metadata pass, returning only the table
    /// list.
    pub fn list_tables(&self) -> Result<Vec<crate::metadata::Table>> {
        Ok(self.discover_all_metadata()?.tables)
    }

    /// Convenience façade: a full metadata pass, returning one table's
    /// column list.
    pub fn list_columns(&self, table_index: u32) -> Result<Vec<crate::metadata::Column>> {
        Ok(self.discover_all_metadata()?.columns_for(table_index).to_vec())
    }

    /// One-pass row emission across every table. `callback` receives
    /// `(table_index, row, column_index, value)` and returns whether to
    /// keep going.
    pub fn read_all_values<F>(&self, metadata: &Metadata, callback: F) -> Result<()>
    where
        F: FnMut(u32, u64, u32, &str) -> ChunkStatus,
    {
        self.read_values_impl(metadata, None, callback)
    }

    /// Per-table variant of `read_all_values`.
    pub fn read_values<F>(&self, metadata: &Metadata, table_index: u32, callback: F) -> Result<()>
    where
        F: FnMut(u32, u64, u32, &str) -> ChunkStatus,
    {
        self.read_values_impl(metadata, Some(table_index), callback)
    }

    fn read_values_impl<F>(&self, metadata: &Metadata, only_table: Option<u32>, callback: F) -> Result<()>
    where
        F: FnMut(u32, u64, u32, &str) -> ChunkStatus,
    {
        let mut assembler = RowAssembler::new(&self.params, metadata, only_table, callback);
        let status = self.traverse(&mut assembler)?;
        if status == ChunkStatus::Abort {
            return Err(Error::UserAborted);
        }
        let final_status = assembler.finish();
        if final_status == ChunkStatus::Abort {
            return Err(Error::UserAborted);
        }
        Ok(())
    }

    /// Walks the block chain from block 1 along `next_id`, dispatching every
    /// block's chunks to `consumer`. A visited bitset bounds the walk at
    /// `2 * sector_count` steps regardless of file size, so a corrupt or
    /// cyclic chain always terminates.
    ///
    /// Block 1 sits at sector index 1 for the v7+ family, but at sector
    /// index 2 for pre-v7 files, which carry one extra throwaway sector
    /// between the header and the first real block.
    fn traverse(&self, consumer: &mut dyn ChunkConsumer) -> Result<ChunkStatus> {
        let sector_count = self.source.sector_count();
        let mut visited = vec![false; sector_count as usize];
        let max_steps = sector_count.saturating_mul(MAX_TRAVERSAL_FACTOR);
        let mut path_stack = PathStack::new(self.params.version_num);

        let mut this_id = self.params.first_block_sector_index() as u32;
        let mut steps = 0u64;

        loop {
            if steps >= max_steps {
                info!("traversal hit the {}-step cap, stopping", max_steps);
                break;
            }
            steps += 1;

            if this_id == 0 {
                break;
            }
            let index = this_id as u64;
            if index >= sector_count {
                return Err(Error::BadSector {
                    index,
                    available: sector_count,
                });
            }
            if visited[index as usize] {
                break;
            }
            visited[index as usize] = true;

            let block = self.read_block(this_id)?;
            let raw_chunks = decode_chunks(&block.payload);
            let status = dispatch_block(&mut path_stack, &raw_chunks, self.params.version_num, consumer);
            match status {
                ChunkStatus::Next => {}
                ChunkStatus::Done => return Ok(ChunkStatus::Done),
                ChunkStatus::Abort => return Ok(ChunkStatus::Abort),
            }

            if block.next_id == 0 {
                break;
            }
            this_id = block.next_id;
        }

        Ok(ChunkStatus::Next)
    }

    fn read_block(&self, this_id: u32) -> Result<Block> {
        let sector = self.source.get_sector(this_id as u64)?;
        decode_block(&sector, &self.params, this_id)
    }
}

fn validate_first_block(source: &dyn SectorSource, params: &FormatParams, file_size: u64) -> Result<()> {
    let index = params.first_block_sector_index();
    let sector = source.get_sector(index)?;
    let block1 = decode_block(&sector, params, 1)?;
    validate_sector_count(&block1, params, file_size)
}
