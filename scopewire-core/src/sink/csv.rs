//! Capture-to-CSV sink: one `Sample,Value` row per decoded sample.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::{debug, info};

use super::SampleSink;
use crate::{buffering::SampleBlock, error::Result};

pub struct CsvSink<W: Write + Send + 'static> {
    out: W,
    /// Running sample index across all blocks.
    index: u64,
    header_written: bool,
}

impl CsvSink<BufWriter<File>> {
    /// Create (or truncate) `path` and write rows to it.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        info!(path = %path.display(), "writing samples to csv");
        Ok(Self::new(BufWriter::new(file)))
    }
}

impl<W: Write + Send + 'static> CsvSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            index: 0,
            header_written: false,
        }
    }

    /// Rows written so far.
    pub fn rows(&self) -> u64 {
        self.index
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send + 'static> SampleSink for CsvSink<W> {
    fn on_sample_block(&mut self, block: SampleBlock) -> Result<()> {
        if !self.header_written {
            writeln!(self.out, "Sample,Value")?;
            self.header_written = true;
        }
        for s in &block.samples {
            writeln!(self.out, "{},{}", self.index, s)?;
            self.index += 1;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        debug!(rows = self.index, "csv sink flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PackingMode;

    #[test]
    fn rows_are_indexed_across_blocks() {
        let mut sink = CsvSink::new(Vec::new());
        sink.on_sample_block(SampleBlock::new(0, PackingMode::Packed12, vec![100, 200]))
            .unwrap();
        sink.on_sample_block(SampleBlock::new(1, PackingMode::Packed12, vec![4095]))
            .unwrap();
        sink.finish().unwrap();

        assert_eq!(sink.rows(), 3);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text, "Sample,Value\n0,100\n1,200\n2,4095\n");
    }

    #[test]
    fn create_writes_file() {
        let dir = std::env::temp_dir().join(format!("scopewire-csv-{}", std::process::id()));
        let path = dir.join("capture.csv");
        let mut sink = CsvSink::create(&path).unwrap();
        sink.on_sample_block(SampleBlock::new(0, PackingMode::Raw16, vec![65535]))
            .unwrap();
        sink.finish().unwrap();
        drop(sink);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Sample,Value\n0,65535\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
