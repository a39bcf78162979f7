//! Bulk load of the normalized tables: a truncate-and-reload SQL script, optionally piped
//! into an external database shell.

use crate::normalize::{CLUSTERS_TSV, COMMENTS_TSV, SITESUMMARIES_TSV};
use anyhow::{bail, Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

pub const LOAD_SQL: &str = "load.sql";

/// (table, tsv file, column list) in load order: parents before children.
const TABLES: [(&str, &str, &str); 3] = [
    ("website_issues_sitesummary", SITESUMMARIES_TSV, "id, url, version, positive, os, size, issues_count, praise_count"),
    ("website_issues_cluster", CLUSTERS_TSV, "id, site_summary_id, size, primary_description, primary_comment_id, positive"),
    ("website_issues_comment", COMMENTS_TSV, "id, cluster_id, description, opinion_id, score"),
];

fn sql_quote(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

/// Render the load script for TSVs living in `dir`.
/// Ids are freshly assigned each run, so tables are emptied first, children first.
pub fn render_load_sql(dir: &Path) -> String {
    let mut sql = String::new();
    sql.push_str("SET FOREIGN_KEY_CHECKS = 0;\n");
    for (table, _, _) in TABLES.iter().rev() {
        sql.push_str(&format!("TRUNCATE TABLE {table};\n"));
    }
    for (table, file, columns) in TABLES {
        let path = dir.join(file);
        sql.push_str(&format!(
            "LOAD DATA LOCAL INFILE {} INTO TABLE {table}\n  \
             FIELDS TERMINATED BY '\\t' ESCAPED BY '\\\\'\n  \
             LINES TERMINATED BY '\\n'\n  ({columns});\n",
            sql_quote(&path.to_string_lossy()),
        ));
    }
    sql.push_str("SET FOREIGN_KEY_CHECKS = 1;\n");
    sql
}

/// Write `load.sql` into `dir` (absolute TSV paths) and return its path.
pub fn write_load_script(dir: &Path) -> Result<PathBuf> {
    let abs = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    let script = abs.join(LOAD_SQL);
    fs::write(&script, render_load_sql(&abs)).with_context(|| format!("write {}", script.display()))?;
    Ok(script)
}

/// Pipe `script` into `command` (run through `sh -c`). A non-zero exit is an error.
pub fn run_load_command(command: &str, script: &Path) -> Result<()> {
    let sql = fs::read(script).with_context(|| format!("read {}", script.display()))?;
    tracing::info!(command, script = %script.display(), "loading results into sites database");

    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::piped())
        .spawn()
        .with_context(|| format!("spawn load command {command:?}"))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(&sql).context("write load script to load command")?;
    }
    let status = child.wait().context("wait for load command")?;
    if !status.success() {
        bail!("load command {command:?} failed with {status}");
    }
    Ok(())
}
