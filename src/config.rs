use crate::corpus::DEFAULT_THRESHOLD;
use std::path::{Path, PathBuf};

/// Export location used when no source is given.
pub const DEFAULT_SOURCE: &str = "./data/export/opinions.tsv.bz2";
/// Scratch/output directory used when none is given.
pub const DEFAULT_WORK_DIR: &str = "./sites_work";

/// User-facing options with sensible defaults and builder chaining.
#[derive(Clone, Debug)]
pub struct ClusterOptions {
    pub source: PathBuf,
    pub work_dir: PathBuf,
    pub parallelism: Option<usize>,   // Some(N) to set rayon threads, None to use default
    pub threshold: f64,               // corpus similarity threshold
    pub progress: bool,
    pub dump_stages: bool,            // write each phase's output as NDJSON into work_dir
    pub skip_load: bool,
    pub load_command: Option<String>, // shell command that receives load.sql on stdin

    // IO tuning
    pub read_buffer_bytes: usize,
    pub write_buffer_bytes: usize,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            source: PathBuf::from(DEFAULT_SOURCE),
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            parallelism: None,
            threshold: DEFAULT_THRESHOLD,
            progress: true,
            dump_stages: false,
            skip_load: false,
            load_command: None,
            read_buffer_bytes: 256 * 1024,
            write_buffer_bytes: 256 * 1024,
        }
    }
}

impl ClusterOptions {
    pub fn with_source(mut self, path: impl AsRef<Path>) -> Self {
        self.source = path.as_ref().to_path_buf();
        self
    }
    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = dir.as_ref().to_path_buf();
        self
    }
    pub fn with_parallelism(mut self, threads: usize) -> Self {
        self.parallelism = Some(threads);
        self
    }
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }
    pub fn with_progress(mut self, yes: bool) -> Self {
        self.progress = yes;
        self
    }
    pub fn with_dump_stages(mut self, yes: bool) -> Self {
        self.dump_stages = yes;
        self
    }
    pub fn with_skip_load(mut self, yes: bool) -> Self {
        self.skip_load = yes;
        self
    }
    pub fn with_load_command(mut self, cmd: impl Into<String>) -> Self {
        let cmd = cmd.into();
        self.load_command = if cmd.trim().is_empty() { None } else { Some(cmd) };
        self
    }
    pub fn with_io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self {
        self.read_buffer_bytes = read_bytes.max(8 * 1024);
        self.write_buffer_bytes = write_bytes.max(8 * 1024);
        self
    }
}
