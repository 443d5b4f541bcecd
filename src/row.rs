//! Row reconstruction and long-string reassembly.

use std::collections::HashMap;

use crate::chunk::ChunkType;
use crate::dispatch::{Chunk, ChunkConsumer, ChunkStatus};
use crate::header::{Charset, FormatParams};
use crate::metadata::Metadata;
use crate::path::depth3_value;

const RESERVED_REF_SIMPLE: u8 = 252;

/// `ref_simple` sentinels that the metadata extractor reserves for
/// table/column *names* and pre-v7 *types*, under the very same `{*, 3, 5}`
/// depth-3 path shape the row assembler uses to recognize long-string
/// continuations. Without excluding them here, a table's own
/// schema-definition chunks would be swept up as phantom long-string
/// fragments of its row data the first time that table's path is visited,
/// since a table's first {*, 3, 5}-shaped chunk always satisfies
/// `last_column == 0`. Excluded the same way `RESERVED_REF_SIMPLE` is
/// excluded from regular-value resolution.
const V7_NAME_REF_SIMPLE: u8 = 16;
const PRE_V7_NAME_REF_SIMPLE: u8 = 1;
const PRE_V7_TYPE_REF_SIMPLE: u8 = 2;

/// Per-table bookkeeping the assembler carries across chunks.
#[derive(Debug, Default)]
struct RowState {
    current_row: u64,
    last_row: u64,
    last_column: u32,
    long_string_buffer: Vec<u8>,
}

/// One pass of row reconstruction over a file's block chain, streaming
/// `(table_index, row, column_index, utf8_value)` tuples to a callback.
pub struct RowAssembler<'m, F> {
    version_num: u8,
    xor_mask: u8,
    charset: Charset,
    metadata: &'m Metadata,
    /// original table index -> compacted column list, pre-resolved once.
    columns_by_table: HashMap<u32, &'m [crate::metadata::Column]>,
    states: HashMap<u32, RowState>,
    /// restrict emission to a single table when set.
    only_table: Option<u32>,
    callback: F,
}

impl<'m, F> RowAssembler<'m, F>
where
    F: FnMut(u32, u64, u32, &str) -> ChunkStatus,
{
    pub fn new(params: &FormatParams, metadata: &'m Metadata, only_table: Option<u32>, callback: F) -> Self {
        let mut columns_by_table = HashMap::new();
        for table in &metadata.tables {
            columns_by_table.insert(table.index, metadata.columns_for(table.index));
        }

        RowAssembler {
            version_num: params.version_num,
            xor_mask: params.xor_mask,
            charset: params.charset,
            metadata,
            columns_by_table,
            states: HashMap::new(),
            only_table,
            callback,
        }
    }

    /// Flushes every table's buffered long string. Call this once after the
    /// block chain is exhausted.
    pub fn finish(&mut self) -> ChunkStatus {
        let table_indices: Vec<u32> = self.states.keys().copied().collect();
        for table_index in table_indices {
            if let Some(status) = self.flush_long_string(table_index) {
                if status != ChunkStatus::Next {
                    return status;
                }
            }
        }
        ChunkStatus::Next
    }

    fn table_raw_id(&self, path0: u32) -> Option<u32> {
        if self.version_num >= 7 {
            if path0 >= 128 {
                Some(path0 - 128)
            } else {
                None
            }
        } else if path0 <= 3 {
            Some(1)
        } else {
            None
        }
    }

    fn flush_long_string(&mut self, table_index: u32) -> Option<ChunkStatus> {
        let state = self.states.get_mut(&table_index)?;
        if state.long_string_buffer.is_empty() {
            return None;
        }
        let value = crate::charset::convert(&state.long_string_buffer, self.xor_mask, self.charset);
        state.long_string_buffer.clear();
        let row = state.current_row;
        let column = state.last_column;

        Some((self.callback)(table_index, row, column, &value))
    }

    fn column_count(&self, table_index: u32) -> usize {
        self.columns_by_table
            .get(&table_index)
            .map(|cols| cols.len())
            .unwrap_or(0)
    }

    fn has_column(&self, table_index: u32, col_index: u32) -> bool {
        self.columns_by_table
            .get(&table_index)
            .map(|cols| cols.iter().any(|c| c.index == col_index))
            .unwrap_or(false)
    }
}

impl<'m, F> ChunkConsumer for RowAssembler<'m, F>
where
    F: FnMut(u32, u64, u32, &str) -> ChunkStatus,
{
    fn consume(&mut self, chunk: &Chunk) -> ChunkStatus {
        if chunk.kind != ChunkType::FieldRefSimple && chunk.kind != ChunkType::DataSegment {
            return ChunkStatus::Next;
        }

        let path = &chunk.path.values;
        let Some(&path0) = path.first() else {
            return ChunkStatus::Next;
        };
        let Some(table_index) = self.table_raw_id(path0) else {
            return ChunkStatus::Next;
        };
        if let Some(only) = self.only_table {
            if only != table_index {
                return ChunkStatus::Next;
            }
        }
        if !self.columns_by_table.contains_key(&table_index) {
            return ChunkStatus::Next; // table not in discovered metadata
        }

        let effective = if self.version_num >= 7 { &path[1..] } else { &path[..] };
        let long_string_shape = depth3_value(effective);

        // Column resolution: the long-string path shape wins outright,
        // otherwise fall back to ref_simple/segment_index bounds-checked
        // against the table's declared column count.
        let col_index = if let Some(idx) = long_string_shape {
            Some(idx)
        } else {
            match chunk.kind {
                ChunkType::FieldRefSimple => {
                    let r = chunk.ref_simple as u32;
                    if r > 0 && r as usize <= self.column_count(table_index) && chunk.ref_simple != RESERVED_REF_SIMPLE {
                        Some(r)
                    } else {
                        None
                    }
                }
                ChunkType::DataSegment => {
                    let s = chunk.segment_index as u32;
                    if s > 0 && s as usize <= self.column_count(table_index) {
                        Some(s)
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        let Some(col_index) = col_index else {
            return ChunkStatus::Next;
        };
        if !self.has_column(table_index, col_index) {
            return ChunkStatus::Next;
        }

        // Rich-text formatting markers, and the schema's own name/type
        // chunks under this same table path, are dropped rather than
        // treated as long-string row content.
        if long_string_shape.is_some() && chunk.kind == ChunkType::FieldRefSimple {
            let is_schema_chunk = if self.version_num >= 7 {
                chunk.ref_simple == V7_NAME_REF_SIMPLE
            } else {
                matches!(chunk.ref_simple, PRE_V7_NAME_REF_SIMPLE | PRE_V7_TYPE_REF_SIMPLE)
            };
            if is_schema_chunk || chunk.ref_simple == 0 {
                return ChunkStatus::Next;
            }
        }

        let (last_column, buffer_pending) = {
            let state = self.states.entry(table_index).or_default();
            (state.last_column, !state.long_string_buffer.is_empty())
        };

        let is_new_row = col_index < last_column;
        let is_continuation = !is_new_row && last_column != 0 && col_index == last_column;
        let is_long_string = long_string_shape.is_some() && (last_column == 0 || is_new_row || is_continuation);

        // Column changed: flush whatever long-string fragment was pending.
        if col_index != last_column && buffer_pending {
            if let Some(status) = self.flush_long_string(table_index) {
                if status != ChunkStatus::Next {
                    return status;
                }
            }
        }

        {
            let state = self.states.entry(table_index).or_default();
            if is_new_row || last_column == 0 {
                state.current_row += 1;
            }
        }

        if is_long_string {
            let state = self.states.entry(table_index).or_default();
            state.long_string_buffer.extend_from_slice(&chunk.data);
        } else {
            let value = crate::charset::convert(&chunk.data, self.xor_mask, self.charset);
            let row = self.states.entry(table_index).or_default().current_row;
            let status = (self.callback)(table_index, row, col_index, &value);
            if status != ChunkStatus::Next {
                return status;
            }
        }

        let state = self.states.entry(table_index).or_default();
        state.last_row = state.current_row;
        state.last_column = col_index;

        ChunkStatus::Next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Column, ColumnType, Table};
    use crate::path::PathSnapshot;

    fn params() -> FormatParams {
        FormatParams {
            version_num: 7,
            sector_size: 4096,
            xor_mask: 0,
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

    fn metadata_with_one_table(columns: usize) -> Metadata {
        let mut m = Metadata::default();
        m.tables.push(Table {
            index: 1,
            name: "T".into(),
            skip: false,
        });
        let cols = (1..=columns as u32)
            .map(|i| Column {
                index: i,
                name: format!("c{i}"),
                col_type: ColumnType::String,
                collation: 0,
            })
            .collect();
        m.columns.insert(1, cols);
        m
    }

    fn chunk(path0: u32, kind: ChunkType, ref_simple: u8, data: &[u8]) -> Chunk {
        Chunk {
            kind,
            data: data.to_vec(),
            ref_simple,
            segment_index: 0,
            path: PathSnapshot { values: vec![path0] },
            version_num: 7,
        }
    }

    #[test]
    fn emits_regular_values_in_row_order() {
        let params = params();
        let metadata = metadata_with_one_table(2);
        let mut emitted = Vec::new();
        {
            let mut assembler = RowAssembler::new(&params, &metadata, None, |t, r, c, v| {
                emitted.push((t, r, c, v.to_string()));
                ChunkStatus::Next
            });

            // table raw id 129 => table_index 1
            assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 1, b"Alice"));
            assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 2, b"30"));
            // column wraps back to 1: new row
            assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 1, b"Bob"));
            assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 2, b"40"));
            assembler.finish();
        }

        assert_eq!(emitted.len(), 4);
        assert_eq!(emitted[0], (1, 1, 1, "Alice".to_string()));
        assert_eq!(emitted[1], (1, 1, 2, "30".to_string()));
        assert_eq!(emitted[2], (1, 2, 1, "Bob".to_string()));
        assert_eq!(emitted[3], (1, 2, 2, "40".to_string()));
    }

    #[test]
    fn abort_from_callback_propagates() {
        let params = params();
        let metadata = metadata_with_one_table(1);
        let mut assembler = RowAssembler::new(&params, &metadata, None, |_, _, _, _| ChunkStatus::Abort);
        let status = assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 1, b"x"));
        assert_eq!(status, ChunkStatus::Abort);
    }

    #[test]
    fn unresolvable_column_is_skipped_not_errored() {
        let params = params();
        let metadata = metadata_with_one_table(1);
        let mut emitted = Vec::new();
        let mut assembler = RowAssembler::new(&params, &metadata, None, |t, r, c, v| {
            emitted.push((t, r, c, v.to_string()));
            ChunkStatus::Next
        });
        // ref_simple 9 has no matching column (only 1 column declared)
        let status = assembler.consume(&chunk(129, ChunkType::FieldRefSimple, 9, b"ignored"));
        assert_eq!(status, ChunkStatus::Next);
        assert!(emitted.is_empty());
    }
}
