//! The downstream value sink. The decoder does not persist anything itself;
//! this module is the thin adapter the
//! `fmdump` binary needs to have somewhere to put what it reads. One CSV
//! file per table, written as rows are received — the sink relies on the
//! row assembler's guarantee that all values for one `(table_index, row)`
//! arrive contiguously before the row advances.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::dispatch::ChunkStatus;
use crate::error::{Error, Result};
use crate::metadata::Metadata;

/// Something that can receive `(table_index, row, column, value)` tuples.
/// Implemented here by `CsvSink`; other downstream adapters (a relational
/// exporter, say) would implement the same trait.
pub trait ValueSink {
    fn accept(&mut self, table_index: u32, row: u64, column: u32, value: &str) -> ChunkStatus;
    fn finish(&mut self) -> Result<()>;
}

/// Writes one CSV file per table into `output_dir`, named after the table.
/// Column order follows the table's compacted column list; the header row
/// uses column names (falling back to `col_<index>` when a name never
/// surfaced during metadata extraction).
pub struct CsvSink {
    output_dir: PathBuf,
    writers: HashMap<u32, BufWriter<File>>,
    /// table_index -> (column.index -> column position in its row).
    columns: HashMap<u32, HashMap<u32, usize>>,
    /// table_index -> column count, to size each row buffer.
    widths: HashMap<u32, usize>,
    /// Values collected for the row currently being assembled, per table.
    pending_rows: HashMap<u32, (u64, Vec<String>)>,
}

impl CsvSink {
    pub fn new<P: AsRef<Path>>(output_dir: P, metadata: &Metadata) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&output_dir).map_err(Error::Read)?;

        let mut writers = HashMap::new();
        let mut columns = HashMap::new();
        let mut widths = HashMap::new();

        for table in &metadata.tables {
            let cols = metadata.columns_for(table.index);
            let file_name = format!("{}.csv", sanitize(&table.name, table.index));
            let path = output_dir.join(file_name);
            let file = File::create(&path).map_err(Error::Read)?;
            let mut writer = BufWriter::new(file);

            let header: Vec<String> = cols
                .iter()
                .map(|c| {
                    if c.name.is_empty() {
                        format!("col_{}", c.index)
                    } else {
                        c.name.clone()
                    }
                })
                .collect();
            writeln!(writer, "{}", header.join(",")).map_err(Error::Read)?;

            let mut positions = HashMap::new();
            for (pos, col) in cols.iter().enumerate() {
                positions.insert(col.index, pos);
            }

            writers.insert(table.index, writer);
            widths.insert(table.index, cols.len());
            columns.insert(table.index, positions);
        }

        Ok(CsvSink {
            output_dir,
            writers,
            columns,
            widths,
            pending_rows: HashMap::new(),
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn flush_row(&mut self, table_index: u32) -> Result<()> {
        let Some((_, values)) = self.pending_rows.remove(&table_index) else {
            return Ok(());
        };
        if let Some(writer) = self.writers.get_mut(&table_index) {
            let escaped: Vec<String> = values.iter().map(|v| escape_csv(v)).collect();
            writeln!(writer, "{}", escaped.join(",")).map_err(Error::Read)?;
        }
        Ok(())
    }
}

impl ValueSink for CsvSink {
    fn accept(&mut self, table_index: u32, row: u64, column: u32, value: &str) -> ChunkStatus {
        let Some(width) = self.widths.get(&table_index).copied() else {
            return ChunkStatus::Next;
        };
        let Some(pos) = self.columns.get(&table_index).and_then(|m| m.get(&column)).copied() else {
            return ChunkStatus::Next;
        };

        let needs_flush = self
            .pending_rows
            .get(&table_index)
            .map(|(pending, _)| *pending != row)
            .unwrap_or(false);

        if needs_flush {
            if self.flush_row(table_index).is_err() {
                return ChunkStatus::Abort;
            }
        }

        self.pending_rows
            .entry(table_index)
            .or_insert_with(|| (row, vec![String::new(); width]));

        if let Some((_, values)) = self.pending_rows.get_mut(&table_index) {
            if let Some(slot) = values.get_mut(pos) {
                *slot = value.to_string();
            }
        }

        ChunkStatus::Next
    }

    fn finish(&mut self) -> Result<()> {
        let table_indices: Vec<u32> = self.pending_rows.keys().copied().collect();
        for table_index in table_indices {
            self.flush_row(table_index)?;
        }
        for writer in self.writers.values_mut() {
            writer.flush().map_err(Error::Read)?;
        }
        Ok(())
    }
}

fn sanitize(name: &str, fallback_index: u32) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        format!("table_{}", fallback_index)
    } else {
        cleaned
    }
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{Column, ColumnType, Table};

    fn metadata_one_table() -> Metadata {
        let mut m = Metadata::default();
        m.tables.push(Table {
            index: 1,
            name: "Contacts".into(),
            skip: false,
        });
        m.columns.insert(
            1,
            vec![
                Column {
                    index: 1,
                    name: "Name".into(),
                    col_type: ColumnType::String,
                    collation: 0,
                },
                Column {
                    index: 2,
                    name: "Email".into(),
                    col_type: ColumnType::String,
                    collation: 0,
                },
            ],
        );
        m
    }

    #[test]
    fn writes_a_header_and_rows_to_csv() {
        let tmp = tempfile::tempdir().unwrap();
        let metadata = metadata_one_table();
        let mut sink = CsvSink::new(tmp.path(), &metadata).unwrap();

        sink.accept(1, 1, 1, "Alice");
        sink.accept(1, 1, 2, "alice@example.com");
        sink.accept(1, 2, 1, "Bob");
        sink.accept(1, 2, 2, "bob@example.com");
        sink.finish().unwrap();

        let contents = std::fs::read_to_string(tmp.path().join("Contacts.csv")).unwrap();
        let mut lines = contents.lines();
        assert_eq!(lines.next(), Some("Name,Email"));
        assert_eq!(lines.next(), Some("Alice,alice@example.com"));
        assert_eq!(lines.next(), Some("Bob,bob@example.com"));
    }

    #[test]
    fn escapes_values_containing_commas() {
        let got = escape_csv("a,b");
        assert_eq!(got, "\"a,b\"");
    }

    #[test]
    fn unresolvable_column_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let metadata = metadata_one_table();
        let mut sink = CsvSink::new(tmp.path(), &metadata).unwrap();
        let status = sink.accept(1, 1, 99, "ignored");
        assert_eq!(status, ChunkStatus::Next);
    }
}
