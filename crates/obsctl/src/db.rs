//! Database writer surface. The analytics backend is an external
//! collaborator; everything the pipeline needs from it is `write_row`.

use std::collections::HashMap;
use std::fs::File;
use std::path::PathBuf;

use anyhow::Context;
use models::Scalar;

/// A per-table row writer. Implementations own batching and transaction
/// boundaries; the pipeline hands over one row at a time, columns in the
/// observation's declaration order.
pub trait Db: Send {
    fn write_row(&mut self, table: &str, row: &[(&'static str, Scalar)]) -> anyhow::Result<()>;

    fn flush(&mut self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Writes one CSV file per table under an output directory. The header is
/// derived from the first row written to each table.
pub struct CsvDb {
    output_dir: PathBuf,
    writers: HashMap<String, csv::Writer<File>>,
}

impl CsvDb {
    pub fn new(output_dir: PathBuf) -> CsvDb {
        CsvDb {
            output_dir,
            writers: HashMap::new(),
        }
    }
}

impl Db for CsvDb {
    fn write_row(&mut self, table: &str, row: &[(&'static str, Scalar)]) -> anyhow::Result<()> {
        if !self.writers.contains_key(table) {
            std::fs::create_dir_all(&self.output_dir)?;
            let path = self.output_dir.join(format!("{table}.csv"));
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(row.iter().map(|(name, _)| *name))?;
            self.writers.insert(table.to_string(), writer);
        }
        let writer = self.writers.get_mut(table).expect("writer just inserted");
        writer.write_record(row.iter().map(|(_, cell)| cell.to_string()))?;
        Ok(())
    }

    fn flush(&mut self) -> anyhow::Result<()> {
        for writer in self.writers.values_mut() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// Counts rows and drops them. Dry runs and tests.
#[derive(Debug, Default)]
pub struct NullDb {
    pub rows: u64,
}

impl Db for NullDb {
    fn write_row(&mut self, _table: &str, _row: &[(&'static str, Scalar)]) -> anyhow::Result<()> {
        self.rows += 1;
        Ok(())
    }
}
