//! The Table/Column/Metadata data model and the metadata extractor that
//! walks a file's block chain, recognizing table- and column-definition
//! chunks by their path shape, to build it.

use std::collections::HashMap;

use strum::Display;

use crate::chunk::ChunkType;
use crate::dispatch::{Chunk, ChunkConsumer, ChunkStatus};
use crate::header::{Charset, FormatParams};
use crate::path::depth3_value;

/// The closed set of column types FileMaker fields can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ColumnType {
    String,
    Number,
    Date,
    Time,
    Container,
    Calc,
    Summary,
    Global,
    Unknown,
}

impl ColumnType {
    /// Maps a pre-v7 column-type byte to the closed enum, falling back
    /// to `Unknown` for anything above the known range.
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => ColumnType::String,
            2 => ColumnType::Number,
            3 => ColumnType::Date,
            4 => ColumnType::Time,
            5 => ColumnType::Container,
            6 => ColumnType::Calc,
            7 => ColumnType::Summary,
            8 => ColumnType::Global,
            _ => ColumnType::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Column {
    pub index: u32,
    pub name: String,
    pub col_type: ColumnType,
    pub collation: u8,
}

impl Column {
    fn empty(index: u32) -> Self {
        Column {
            index,
            name: String::new(),
            col_type: ColumnType::Unknown,
            collation: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub index: u32,
    pub name: String,
    pub skip: bool,
}

impl Table {
    fn empty(index: u32) -> Self {
        Table {
            index,
            name: String::new(),
            skip: false,
        }
    }
}

/// A table list plus a sparse `table_index -> column list` mapping, keyed
/// by *compacted* table position (DESIGN.md, Open Question 8) once
/// `MetadataExtractor::finish` has run.
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    pub tables: Vec<Table>,
    pub columns: HashMap<u32, Vec<Column>>,
}

impl Metadata {
    pub fn columns_for(&self, table_index: u32) -> &[Column] {
        static EMPTY: [Column; 0] = [];
        // Find the compacted position of the table carrying this original index.
        match self.tables.iter().position(|t| t.index == table_index) {
            Some(pos) => self
                .columns
                .get(&(pos as u32 + 1))
                .map(|v| v.as_slice())
                .unwrap_or(&EMPTY),
            None => &EMPTY,
        }
    }
}

const COLUMN_GROWTH_CHUNK: usize = 128;

/// One pass of metadata extraction over a file's block chain.
pub struct MetadataExtractor {
    version_num: u8,
    xor_mask: u8,
    charset: Charset,
    /// `None` marks an as-yet-unseen table index; the list is grown to the
    /// largest index seen so far, leaving holes for gaps.
    tables: Vec<Option<Table>>,
    columns: HashMap<u32, Vec<Option<Column>>>,
    /// Pre-v7 files synthesize a single table named after the source file.
    single_table_name: Option<String>,
}

impl MetadataExtractor {
    pub fn new(params: &FormatParams, file_stem: Option<&str>) -> Self {
        let single_table_name = if params.version_num < 7 {
            Some(file_stem.unwrap_or("table").to_string())
        } else {
            None
        };

        MetadataExtractor {
            version_num: params.version_num,
            xor_mask: params.xor_mask,
            charset: params.charset,
            tables: Vec::new(),
            columns: HashMap::new(),
            single_table_name,
        }
    }

    fn ensure_table(&mut self, index: u32) -> &mut Table {
        let needed = index as usize;
        if self.tables.len() < needed {
            self.tables.resize_with(needed, || None);
        }
        let slot = &mut self.tables[needed - 1];
        if slot.is_none() {
            *slot = Some(Table::empty(index));
        }
        slot.as_mut().unwrap()
    }

    fn ensure_column(&mut self, table_index: u32, col_index: u32) -> &mut Column {
        let needed = col_index as usize;
        let cols = self.columns.entry(table_index).or_default();
        if cols.len() < needed {
            let grown = ((needed + COLUMN_GROWTH_CHUNK - 1) / COLUMN_GROWTH_CHUNK) * COLUMN_GROWTH_CHUNK;
            cols.resize_with(grown, || None);
        }
        let slot = &mut cols[needed - 1];
        if slot.is_none() {
            *slot = Some(Column::empty(col_index));
        }
        slot.as_mut().unwrap()
    }

    fn synthesize_single_table(&mut self) {
        if let Some(name) = self.single_table_name.take() {
            let table = self.ensure_table(1);
            table.name = name;
        }
    }

    /// Consumes this extractor and produces the compacted `Metadata` (spec
    /// §4.6 Compaction): retain only entries with nonzero `index`,
    /// preserving relative order, and re-key columns by compacted position.
    pub fn finish(mut self) -> Metadata {
        if self.version_num < 7 {
            self.synthesize_single_table();
        }

        let mut tables = Vec::new();
        let mut columns = HashMap::new();

        for slot in self.tables.into_iter().flatten() {
            tables.push(slot);
        }

        for (compacted_pos, table) in tables.iter().enumerate() {
            if let Some(cols) = self.columns.get(&table.index) {
                let compacted_cols: Vec<Column> = cols.iter().flatten().cloned().collect();
                columns.insert(compacted_pos as u32 + 1, compacted_cols);
            }
        }

        Metadata { tables, columns }
    }

    fn handle_v7_plus(&mut self, chunk: &Chunk) -> ChunkStatus {
        let path = &chunk.path.values;

        if path.is_empty() {
            return ChunkStatus::Next;
        }

        // Stop scanning once we've moved past the metadata region.
        if path[0] > 3 && path[0] < 128 {
            return ChunkStatus::Done;
        }

        // Table definition: path == [3, 16, 5, 128+n], FIELD_REF_SIMPLE ref_simple==16.
        if path.len() >= 4
            && path[0] == 3
            && path[1] == 16
            && path[2] == 5
            && path[3] >= 128
            && chunk.kind == ChunkType::FieldRefSimple
            && chunk.ref_simple == 16
        {
            let table_index = path[3] - 128;
            let name = crate::charset::convert(&chunk.data, self.xor_mask, self.charset);
            self.ensure_table(table_index).name = name;
            return ChunkStatus::Next;
        }

        // Column definition: path[0] >= 128 names the table; the rest of the
        // path (after the table segment) has the {*, 3, 5} field shape.
        if path[0] >= 128 {
            let table_index = path[0] - 128;
            if let Some(col_index) = depth3_value(&path[1..]) {
                if chunk.kind == ChunkType::FieldRefSimple && chunk.ref_simple == 16 {
                    let name = crate::charset::convert(&chunk.data, self.xor_mask, self.charset);
                    self.ensure_table(table_index);
                    self.ensure_column(table_index, col_index).name = name;
                }
            }
        }

        ChunkStatus::Next
    }

    fn handle_pre_v7(&mut self, chunk: &Chunk) -> ChunkStatus {
        let path = &chunk.path.values;

        let Some(col_index) = depth3_value(path) else {
            return ChunkStatus::Next;
        };

        if chunk.kind != ChunkType::FieldRefSimple {
            return ChunkStatus::Next;
        }

        match chunk.ref_simple {
            1 => {
                let name = crate::charset::convert(&chunk.data, self.xor_mask, self.charset);
                self.ensure_column(1, col_index).name = name;
            }
            2 => {
                let col_type = chunk.data.get(1).copied().map(ColumnType::from_byte).unwrap_or(ColumnType::Unknown);
                let collation = chunk.data.get(3).copied().unwrap_or(0);
                let col = self.ensure_column(1, col_index);
                col.col_type = col_type;
                col.collation = collation;
            }
            _ => {}
        }

        ChunkStatus::Next
    }
}

impl ChunkConsumer for MetadataExtractor {
    fn consume(&mut self, chunk: &Chunk) -> ChunkStatus {
        if self.version_num >= 7 {
            self.handle_v7_plus(chunk)
        } else {
            self.handle_pre_v7(chunk)
        }
    }
}
