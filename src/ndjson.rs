use crate::util::{create_with_backoff, replace_file_atomic_backoff};
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Buffered NDJSON writer for phase dumps. Writes go to `<final>.inprogress` and are
/// promoted by [`NdjsonWriter::finish`].
pub struct NdjsonWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    w: BufWriter<File>,
}

impl NdjsonWriter {
    pub fn create(final_path: &Path, buf_bytes: usize) -> Result<Self> {
        let tmp_path = final_path.with_extension("ndjson.inprogress");
        let f = create_with_backoff(&tmp_path, 16, 50)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        Ok(Self {
            tmp_path,
            final_path: final_path.to_path_buf(),
            w: BufWriter::with_capacity(buf_bytes.max(8 * 1024), f),
        })
    }

    /// Serialize one `[key, value]` pair as a line.
    pub fn write_pair<K: Serialize, V: Serialize>(&mut self, key: &K, value: &V) -> Result<()> {
        serde_json::to_writer(&mut self.w, &(key, value))?;
        self.w.write_all(b"\n")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.w.flush().with_context(|| format!("flush {}", self.tmp_path.display()))?;
        drop(self.w);
        replace_file_atomic_backoff(&self.tmp_path, &self.final_path)?;
        Ok(self.final_path)
    }
}

/// Dump a phase's `(key, value)` output to `path`.
pub fn dump_pairs<K: Serialize, V: Serialize>(path: &Path, pairs: &[(K, V)], buf_bytes: usize) -> Result<PathBuf> {
    let mut w = NdjsonWriter::create(path, buf_bytes)?;
    for (k, v) in pairs {
        w.write_pair(k, v)?;
    }
    w.finish()
}
