//! Job driver: runs the five map/reduce phases over an export file, normalizes the result
//! into the three load tables and optionally bulk loads them.

use crate::config::ClusterOptions;
use crate::corpus::{CorpusFactory, TfIdfCorpusFactory};
use crate::counters::{self, CounterSnapshot, Counters};
use crate::load::{run_load_command, write_load_script};
use crate::mapreduce::{run_map, run_parallel, run_sequential, shuffle};
use crate::ndjson::dump_pairs;
use crate::normalize::{normalize_rows, NormalizedCounts, CLUSTERS_TSV, COMMENTS_TSV, SITESUMMARIES_TSV};
use crate::progress::ProgressScope;
use crate::source::{comment_records, SourceMissing};
use crate::tasks::{
    ClusterIdReducer, CommentClusteringReducer, DenormalizedRow, DenormalizingReducer, SiteSummaryMapper,
    SummaryIdReducer, SummarySizeReducer,
};
use crate::tsv::TsvWriter;
use crate::util::init_tracing_once;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use walkdir::WalkDir;

pub const COUNTERS_JSON: &str = "counters.json";

/// Pair counts flowing out of each phase, plus the ids handed out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub mapped: u64,
    pub mapped_groups: u64,
    pub clustered: u64,
    pub cluster_ids: u64,
    pub comment_refs: u64,
    pub sized: u64,
    pub summary_ids: u64,
    pub denormalized: u64,
}

/// Per-run settings for the in-memory phases.
#[derive(Clone, Default)]
pub struct RunContext {
    pub counters: Counters,
    pub progress: bool,
    /// When set, every phase's output is dumped as NDJSON into this directory.
    pub dump_dir: Option<PathBuf>,
    pub write_buffer_bytes: usize,
}

impl RunContext {
    pub fn new(counters: Counters) -> Self {
        Self { counters, progress: false, dump_dir: None, write_buffer_bytes: 256 * 1024 }
    }

    fn dump<K: Serialize, V: Serialize>(&self, n: usize, name: &str, pairs: &[(K, V)]) -> Result<()> {
        if let Some(dir) = &self.dump_dir {
            let path = dir.join(format!("stage_{n}_{name}.ndjson"));
            dump_pairs(&path, pairs, self.write_buffer_bytes)?;
            tracing::debug!(path = %path.display(), rows = pairs.len(), "dumped phase output");
        }
        Ok(())
    }
}

/// Output of the in-memory phases: denormalized rows in final load order.
pub struct ClusterOutput {
    pub rows: Vec<DenormalizedRow>,
    pub phases: PhaseCounts,
}

fn log_phase(name: &str, started: Instant, groups: usize, rows: usize) {
    tracing::info!(phase = name, groups, rows, elapsed_ms = started.elapsed().as_millis() as u64, "phase done");
}

/// Run all phases over logical export records.
/// Clustering and summary sizing fan out across keys; both id phases run as one task each.
pub fn cluster_records<I, C>(records: I, corpora: C, ctx: &RunContext) -> Result<ClusterOutput>
where
    I: IntoIterator<Item = Result<String>>,
    C: CorpusFactory,
{
    let mut phases = PhaseCounts::default();

    // map
    let started = Instant::now();
    let mapper = SiteSummaryMapper::new(&ctx.counters);
    let mapped = run_map(&mapper, records)?;
    phases.mapped = mapped.len() as u64;
    ctx.dump(0, "mapped", &mapped)?;
    let groups = shuffle(mapped);
    phases.mapped_groups = groups.len() as u64;
    log_phase("map", started, groups.len(), phases.mapped as usize);

    // cluster
    let started = Instant::now();
    let n_groups = groups.len();
    let pb = ProgressScope::count_if(ctx.progress, "Cluster comments", n_groups as u64);
    let clustering = CommentClusteringReducer::new(corpora, &ctx.counters);
    let clustered = run_parallel(&clustering, groups, Some(&pb))?;
    pb.finish("clustered");
    phases.clustered = clustered.len() as u64;
    ctx.dump(1, "clustered", &clustered)?;
    log_phase("cluster", started, n_groups, clustered.len());

    // cluster ids
    let started = Instant::now();
    let groups = shuffle(clustered);
    let n_groups = groups.len();
    let pb = ProgressScope::count_if(ctx.progress, "Assign cluster ids", n_groups as u64);
    let mut cluster_ids = ClusterIdReducer::new();
    let with_ids = run_sequential(&mut cluster_ids, groups, Some(&pb))?;
    pb.finish("cluster ids assigned");
    phases.cluster_ids = cluster_ids.clusters_assigned();
    phases.comment_refs = cluster_ids.refs_assigned();
    ctx.counters.counter(counters::CLUSTER_IDS).add(phases.cluster_ids);
    ctx.dump(2, "cluster_ids", &with_ids)?;
    log_phase("cluster ids", started, n_groups, with_ids.len());

    // summary sizes
    let started = Instant::now();
    let groups = shuffle(with_ids);
    let n_groups = groups.len();
    let pb = ProgressScope::count_if(ctx.progress, "Size site summaries", n_groups as u64);
    let sized = run_parallel(&SummarySizeReducer::new(&ctx.counters), groups, Some(&pb))?;
    pb.finish("summaries sized");
    phases.sized = sized.len() as u64;
    ctx.dump(3, "summary_sizes", &sized)?;
    log_phase("summary sizes", started, n_groups, sized.len());

    // summary ids
    let started = Instant::now();
    let groups = shuffle(sized);
    let n_groups = groups.len();
    let pb = ProgressScope::count_if(ctx.progress, "Assign summary ids", n_groups as u64);
    let mut summary_ids = SummaryIdReducer::new();
    let with_site_ids = run_sequential(&mut summary_ids, groups, Some(&pb))?;
    pb.finish("summary ids assigned");
    phases.summary_ids = summary_ids.summaries_assigned();
    ctx.counters.counter(counters::SUMMARY_IDS).add(phases.summary_ids);
    ctx.dump(4, "summary_ids", &with_site_ids)?;
    log_phase("summary ids", started, n_groups, with_site_ids.len());

    // denormalize, then the final sort
    let started = Instant::now();
    let groups = shuffle(with_site_ids);
    let n_groups = groups.len();
    let pb = ProgressScope::count_if(ctx.progress, "Denormalize", n_groups as u64);
    let denormalized = run_parallel(&DenormalizingReducer, groups, Some(&pb))?;
    pb.finish("denormalized");
    phases.denormalized = denormalized.len() as u64;
    ctx.dump(5, "denormalized", &denormalized)?;
    let rows: Vec<DenormalizedRow> = shuffle(denormalized).into_iter().flat_map(|(_, rows)| rows).collect();
    log_phase("denormalize", started, n_groups, rows.len());

    Ok(ClusterOutput { rows, phases })
}

/// Paths of the three load tables in `dir`.
pub fn table_paths(dir: &Path) -> [PathBuf; 3] {
    [dir.join(SITESUMMARIES_TSV), dir.join(CLUSTERS_TSV), dir.join(COMMENTS_TSV)]
}

/// Write the three load tables for `rows` into `dir`.
pub fn write_tables(rows: &[DenormalizedRow], dir: &Path, write_buf: usize) -> Result<NormalizedCounts> {
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let [s_path, c_path, m_path] = table_paths(dir);
    let mut summaries = TsvWriter::create(&s_path, write_buf)?;
    let mut clusters = TsvWriter::create(&c_path, write_buf)?;
    let mut comments = TsvWriter::create(&m_path, write_buf)?;
    let counts = normalize_rows(rows, &mut summaries, &mut clusters, &mut comments)?;
    summaries.finish()?;
    clusters.finish()?;
    comments.finish()?;
    Ok(counts)
}

#[derive(Serialize)]
struct RunReport<'a> {
    source: String,
    started_at: String,
    finished_at: String,
    phases: &'a PhaseCounts,
    counters: &'a CounterSnapshot,
}

fn rfc3339(t: OffsetDateTime) -> String {
    t.format(&Rfc3339).unwrap_or_else(|_| t.unix_timestamp().to_string())
}

/// What a completed run produced.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub output_dir: PathBuf,
    pub sitesummaries: PathBuf,
    pub clusters: PathBuf,
    pub comments: PathBuf,
    pub load_script: Option<PathBuf>,
    pub rows: NormalizedCounts,
    pub phases: PhaseCounts,
    pub counters: CounterSnapshot,
    /// Worker threads the parallel phases ran on.
    pub threads: usize,
}

#[derive(Clone)]
pub struct SiteClusterJob {
    pub(crate) opts: ClusterOptions,
}

impl Default for SiteClusterJob {
    fn default() -> Self {
        Self::new()
    }
}

impl SiteClusterJob {
    pub fn new() -> Self {
        Self { opts: ClusterOptions::default() }
    }

    pub fn from_options(opts: ClusterOptions) -> Self {
        Self { opts }
    }

    pub fn options(&self) -> &ClusterOptions {
        &self.opts
    }

    // -------- Builder methods --------
    pub fn source(mut self, path: impl AsRef<Path>) -> Self { self.opts = self.opts.with_source(path); self }
    pub fn work_dir(mut self, dir: impl AsRef<Path>) -> Self { self.opts = self.opts.with_work_dir(dir); self }
    pub fn parallelism(mut self, threads: usize) -> Self { self.opts = self.opts.with_parallelism(threads); self }
    pub fn threshold(mut self, threshold: f64) -> Self { self.opts = self.opts.with_threshold(threshold); self }
    pub fn progress(mut self, yes: bool) -> Self { self.opts = self.opts.with_progress(yes); self }
    pub fn dump_stages(mut self, yes: bool) -> Self { self.opts = self.opts.with_dump_stages(yes); self }
    pub fn skip_load(mut self, yes: bool) -> Self { self.opts = self.opts.with_skip_load(yes); self }
    pub fn load_command(mut self, cmd: impl Into<String>) -> Self { self.opts = self.opts.with_load_command(cmd); self }
    pub fn io_buffers(mut self, read_bytes: usize, write_bytes: usize) -> Self { self.opts = self.opts.with_io_buffers(read_bytes, write_bytes); self }

    /// Run with the bundled TF-IDF corpus at the configured threshold.
    pub fn run(&self) -> Result<RunSummary> {
        self.run_with(TfIdfCorpusFactory { threshold: self.opts.threshold })
    }

    /// Run end to end with a caller-provided corpus. Any phase error aborts the whole run;
    /// previously written tables are only replaced once every phase succeeded.
    pub fn run_with<C: CorpusFactory>(&self, corpora: C) -> Result<RunSummary> {
        init_tracing_once();
        match self.opts.parallelism {
            Some(n) if n > 0 => {
                // scoped pool: every run honours its own thread count
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .context("build worker pool")?;
                pool.install(|| self.run_phases(corpora))
            }
            _ => self.run_phases(corpora),
        }
    }

    fn run_phases<C: CorpusFactory>(&self, corpora: C) -> Result<RunSummary> {
        let started_at = OffsetDateTime::now_utc();

        let source = &self.opts.source;
        if !source.exists() {
            return Err(SourceMissing(source.clone()).into());
        }
        let work_dir = &self.opts.work_dir;
        fs::create_dir_all(work_dir).with_context(|| format!("create {}", work_dir.display()))?;
        let threads = rayon::current_num_threads();
        tracing::info!(source = %source.display(), work_dir = %work_dir.display(), threads, "generating sites");

        let counters = Counters::new();
        let ctx = RunContext {
            counters: counters.clone(),
            progress: self.opts.progress,
            dump_dir: self.opts.dump_stages.then(|| work_dir.clone()),
            write_buffer_bytes: self.opts.write_buffer_bytes,
        };

        let records = comment_records(source, self.opts.read_buffer_bytes)?;
        let output = cluster_records(records, corpora, &ctx)
            .with_context(|| format!("clustering comments from {}", source.display()))?;

        tracing::info!(dir = %work_dir.display(), "exporting normalized tables");
        let rows = write_tables(&output.rows, work_dir, self.opts.write_buffer_bytes)?;
        counters.counter(counters::SITESUMMARY_ROWS).add(rows.sitesummaries);
        counters.counter(counters::CLUSTER_ROWS).add(rows.clusters);
        counters.counter(counters::COMMENT_ROWS).add(rows.comments);

        let load_script = if self.opts.skip_load {
            None
        } else {
            let script = write_load_script(work_dir)?;
            match &self.opts.load_command {
                Some(cmd) => run_load_command(cmd, &script)?,
                None => tracing::info!(script = %script.display(), "no load command configured; load script written"),
            }
            Some(script)
        };

        let snapshot = counters.snapshot();
        counters.log_totals();
        let report = RunReport {
            source: source.display().to_string(),
            started_at: rfc3339(started_at),
            finished_at: rfc3339(OffsetDateTime::now_utc()),
            phases: &output.phases,
            counters: &snapshot,
        };
        let report_path = work_dir.join(COUNTERS_JSON);
        fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
            .with_context(|| format!("write {}", report_path.display()))?;

        let [sitesummaries, clusters, comments] = table_paths(work_dir);
        Ok(RunSummary {
            output_dir: work_dir.clone(),
            sitesummaries,
            clusters,
            comments,
            load_script,
            rows,
            phases: output.phases,
            counters: snapshot,
            threads,
        })
    }

    /// Remove the work directory. Returns the number of files removed.
    pub fn clean(&self) -> Result<usize> {
        init_tracing_once();
        let dir = &self.opts.work_dir;
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "nothing to clean");
            return Ok(0);
        }
        let files = WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count();
        tracing::info!(dir = %dir.display(), files, "removing output");
        fs::remove_dir_all(dir).with_context(|| format!("remove {}", dir.display()))?;
        Ok(files)
    }
}
