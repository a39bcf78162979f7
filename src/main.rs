use anyhow::Result;
use clap::Parser;
use sitecluster::{init_tracing_once, SiteClusterJob, DEFAULT_SOURCE, DEFAULT_WORK_DIR};
use std::path::PathBuf;
use std::process::ExitCode;

/// Cluster site feedback comments and bulk load the site summary tables.
#[derive(Parser, Debug)]
#[command(name = "generate-sites", version)]
struct Args {
    /// Comment export (TSV, optionally .bz2 or .zst)
    #[arg(long, env = "SITECLUSTER_SOURCE", default_value = DEFAULT_SOURCE)]
    source: PathBuf,
    /// Directory for intermediate and output files
    #[arg(long, default_value = DEFAULT_WORK_DIR)]
    work_dir: PathBuf,
    /// Write the TSV tables but do not load them
    #[arg(long)]
    skip_load: bool,
    /// Remove the work directory and exit
    #[arg(long)]
    clean: bool,
    /// Worker threads for the parallel phases (default: all cores)
    #[arg(long)]
    threads: Option<usize>,
    /// Minimum similarity for a comment to join a cluster, in (0, 1]
    #[arg(long, value_parser = parse_threshold)]
    threshold: Option<f64>,
    /// Dump every phase's output as NDJSON into the work directory
    #[arg(long)]
    dump_stages: bool,
    /// Disable progress bars
    #[arg(long)]
    no_progress: bool,
    /// Shell command that receives load.sql on stdin, e.g. "mysql sites"
    #[arg(long)]
    load_command: Option<String>,
}

fn parse_threshold(s: &str) -> Result<f64, String> {
    let t: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if t > 0.0 && t <= 1.0 {
        Ok(t)
    } else {
        Err(format!("{t} is not in (0, 1]"))
    }
}

fn run(args: Args) -> Result<()> {
    let mut job = SiteClusterJob::new()
        .source(&args.source)
        .work_dir(&args.work_dir)
        .skip_load(args.skip_load)
        .dump_stages(args.dump_stages)
        .progress(!args.no_progress);
    if let Some(n) = args.threads {
        job = job.parallelism(n);
    }
    if let Some(t) = args.threshold {
        job = job.threshold(t);
    }
    if let Some(cmd) = args.load_command {
        job = job.load_command(cmd);
    }

    if args.clean {
        let removed = job.clean()?;
        println!("Removed {removed} files from {}", args.work_dir.display());
        return Ok(());
    }

    let summary = job.run()?;
    println!(
        "Wrote {} site summaries, {} clusters, {} comments to {}",
        summary.rows.sitesummaries,
        summary.rows.clusters,
        summary.rows.comments,
        summary.output_dir.display()
    );
    if let Some(script) = &summary.load_script {
        println!("Load script: {}", script.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    init_tracing_once();
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
