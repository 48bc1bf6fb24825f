//! Tab-separated tick log

use crate::error::{ResultExt, Result};
use crate::types::{Role, SampleTick};
use std::fmt::Write as FmtWrite;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes one row per tick, one column per enabled channel
///
/// The header carries the role label of each column. A column whose role is
/// `Off` or has no value in a tick is written as an empty cell.
pub struct TickExporter {
    writer: BufWriter<File>,
    path: PathBuf,
    columns: Vec<Role>,
    rows_written: u64,
    row: String,
}

impl TickExporter {
    /// Create (truncate) the log at `path` and write the header
    pub fn create(path: &Path, columns: Vec<Role>) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating export file {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        let header: Vec<&str> = columns.iter().map(|r| r.label()).collect();
        writeln!(writer, "{}", header.join("\t"))
            .with_context(|| format!("writing header to {}", path.display()))?;
        tracing::info!(
            "Exporting {} columns to {}",
            columns.len(),
            path.display()
        );
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            columns,
            rows_written: 0,
            row: String::new(),
        })
    }

    pub fn write_tick(&mut self, tick: &SampleTick) -> Result<()> {
        self.row.clear();
        for (i, role) in self.columns.iter().enumerate() {
            if i > 0 {
                self.row.push('\t');
            }
            if let Some(value) = tick.role(*role) {
                let _ = write!(self.row, "{}", value);
            }
        }
        writeln!(self.writer, "{}", self.row)
            .with_context(|| format!("writing row to {}", self.path.display()))?;
        self.rows_written += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the file, returning the number of rows written
    pub fn finish(mut self) -> Result<u64> {
        self.writer
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;
        tracing::info!(
            "Export to {} closed after {} rows",
            self.path.display(),
            self.rows_written
        );
        Ok(self.rows_written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_and_rows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.tsv");
        let mut exporter =
            TickExporter::create(&path, vec![Role::X, Role::Off, Role::Z3]).unwrap();

        let mut tick = SampleTick::new();
        tick.set_role(Role::X, 1.5);
        tick.set_role(Role::Z3, -0.25);
        exporter.write_tick(&tick).unwrap();

        let mut partial = SampleTick::new();
        partial.set_role(Role::Z3, 2.0);
        exporter.write_tick(&partial).unwrap();

        assert_eq!(exporter.finish().unwrap(), 2);
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "X\tOff\tZ3\n1.5\t\t-0.25\n\t\t2\n");
    }

    #[test]
    fn test_create_in_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing").join("log.tsv");
        assert!(TickExporter::create(&path, vec![Role::X]).is_err());
    }
}
