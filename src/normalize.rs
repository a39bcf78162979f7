//! Split the sorted denormalized stream into the three bulk-load tables.
//!
//! Column order follows the relational layout:
//!  - sitesummaries: site_id, url, version, positive, platform, size, sad_size, happy_size
//!  - clusters:      cluster_id, site_id, size, primary_description, primary m_refid, positive
//!  - comments:      m_refid, cluster_id, message, comment_id, score
//!
//! A cluster row is taken from the first row seen for a new cluster id; with the output
//! ordering (score descending within a cluster) that is the pivot.

use crate::comment::positive_flag;
use crate::tsv::{TsvWriter, NULL};
use crate::tasks::DenormalizedRow;
use anyhow::Result;

pub const SITESUMMARIES_TSV: &str = "sitesummaries.tsv";
pub const CLUSTERS_TSV: &str = "clusters.tsv";
pub const COMMENTS_TSV: &str = "comments.tsv";

/// Destination for one table's rows.
pub trait RowSink {
    fn put(&mut self, fields: &[String]) -> Result<()>;
}

impl RowSink for TsvWriter {
    fn put(&mut self, fields: &[String]) -> Result<()> {
        self.write_row(fields)?;
        Ok(())
    }
}

/// In-memory sink; handy for inspecting output without touching disk.
impl RowSink for Vec<Vec<String>> {
    fn put(&mut self, fields: &[String]) -> Result<()> {
        self.push(fields.to_vec());
        Ok(())
    }
}

/// Rows written per table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NormalizedCounts {
    pub sitesummaries: u64,
    pub clusters: u64,
    pub comments: u64,
}

/// Float repr as the bulk loader expects it (`1.0`, `0.5`).
pub fn format_score(score: f64) -> String {
    format!("{score:?}")
}

fn platform_or_null(platform: &Option<String>) -> String {
    platform.clone().unwrap_or_else(|| NULL.to_string())
}

/// Walk `rows` in order and emit summary, cluster and comment records.
pub fn normalize_rows<'a, I, S1, S2, S3>(
    rows: I,
    sitesummaries: &mut S1,
    clusters: &mut S2,
    comments: &mut S3,
) -> Result<NormalizedCounts>
where
    I: IntoIterator<Item = &'a DenormalizedRow>,
    S1: RowSink + ?Sized,
    S2: RowSink + ?Sized,
    S3: RowSink + ?Sized,
{
    let mut counts = NormalizedCounts::default();
    // -1 never matches a real id
    let mut last_s_id: i64 = -1;
    let mut last_c_id: i64 = -1;

    for row in rows {
        if row.cluster_id as i64 != last_c_id {
            if row.site_id as i64 != last_s_id {
                last_s_id = row.site_id as i64;
                sitesummaries.put(&[
                    row.site_id.to_string(),
                    row.site.clone(),
                    row.version.clone(),
                    positive_flag(row.sentiment.as_ref()).to_string(),
                    platform_or_null(&row.platform),
                    row.summary_size.to_string(),
                    row.sad_size.to_string(),
                    row.happy_size.to_string(),
                ])?;
                counts.sitesummaries += 1;
            }
            last_c_id = row.cluster_id as i64;
            clusters.put(&[
                row.cluster_id.to_string(),
                row.site_id.to_string(),
                row.c_size.to_string(),
                row.message.clone(),
                row.m_refid.to_string(),
                positive_flag(Some(&row.c_type)).to_string(),
            ])?;
            counts.clusters += 1;
        }
        comments.put(&[
            row.m_refid.to_string(),
            row.cluster_id.to_string(),
            row.message.clone(),
            row.comment_id.to_string(),
            format_score(row.score),
        ])?;
        counts.comments += 1;
    }
    Ok(counts)
}
