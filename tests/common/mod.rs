#![allow(dead_code)]

use sitecluster::{join_fields, split_fields, SiteClusterJob};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const CREATED: &str = "1302825600";

/// One export row in column order: id, created, type, product, version, os, locale,
/// manufacturer, device, url, description.
pub fn export_row(id: u64, kind: &str, version: &str, os: &str, url: &str, message: &str) -> String {
    join_fields(&[
        id.to_string().as_str(),
        CREATED,
        kind,
        "firefox",
        version,
        os,
        "en-US",
        "",
        "",
        url,
        message,
    ])
}

/// Three comments on one site: a praise and two near-identical issues that cluster together.
pub fn scenario_rows() -> Vec<String> {
    vec![
        export_row(1, "praise", "4.0", "mac", "http://example.com", "Great site, love the design"),
        export_row(2, "issue", "4.0", "mac", "http://example.com", "The page crashes when loading video"),
        export_row(3, "issue", "4.0", "mac", "http://example.com", "Page crashes when loading the video"),
    ]
}

pub fn write_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let mut f = File::create(path).unwrap();
    for l in lines {
        writeln!(&mut f, "{}", l).unwrap();
    }
}

/// Write a compressed `.bz2` export containing the provided lines.
pub fn write_bz2_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = bzip2::write::BzEncoder::new(f, bzip2::Compression::default());
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Write a compressed `.zst` export containing the provided lines.
pub fn write_zst_lines(path: &Path, lines: &[String]) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let f = File::create(path).unwrap();
    let mut enc = zstd::stream::write::Encoder::new(f, 3).unwrap();
    for l in lines {
        writeln!(&mut enc, "{}", l).unwrap();
    }
    enc.finish().unwrap();
}

/// Read a text file line-by-line into strings (skips empty lines).
pub fn read_lines(path: &Path) -> Vec<String> {
    let f = File::open(path).unwrap();
    let r = BufReader::new(f);
    r.lines().map(|l| l.unwrap()).filter(|s| !s.is_empty()).collect()
}

/// Read an output table, unescaping every field.
pub fn read_table(path: &Path) -> Vec<Vec<String>> {
    read_lines(path).iter().map(|l| split_fields(l, 16)).collect()
}

/// Scratch dir with `opinions.tsv` holding `rows`; returns (guard, source, work dir).
pub fn make_source(rows: &[String]) -> (TempDir, PathBuf, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("export").join("opinions.tsv");
    write_lines(&source, rows);
    let work = dir.path().join("work");
    (dir, source, work)
}

/// A job over `source` writing into `work`, quiet and without a load step.
pub fn quiet_job(source: &Path, work: &Path) -> SiteClusterJob {
    SiteClusterJob::new()
        .source(source)
        .work_dir(work)
        .progress(false)
        .skip_load(true)
}

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests").join("data").join(name)
}
