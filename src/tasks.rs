//! The five clustering phases.
//!
//! Streaming is denormalized: every row carries its site summary (`s_*`), cluster (`c_*`)
//! and comment (`m_*`) attributes, and the sort keys are chosen so the busiest summaries
//! and largest clusters come first.
//!
//! ```text
//! SiteSummaryMapper         record -> (version, site, platform, type), (m_id, message)
//! CommentClusteringReducer  -> (sortkey, version, site, platform, s_type, c_index, c_type, c_size), (m_id, message, score)
//! ClusterIdReducer          -> (version, site, platform, s_type), (c_id, c_type, c_size, m_refid, m_id, message, score)
//! SummarySizeReducer        -> (s_sortkey, version, site, platform, s_type), (s_size, ..)
//! SummaryIdReducer          -> (version, site, platform), (s_type, s_id, s_size, ..)
//! DenormalizingReducer      -> (s_id, c_id, score), full flat row
//! ```

use crate::comment::{Comment, FeedbackType};
use crate::corpus::{CorpusFactory, SimilarityCorpus};
use crate::counters::{self, Counter, Counters};
use crate::mapreduce::{IdSequence, Mapper, Reducer, SequentialReducer};
use crate::site::normalize_url;
use anyhow::{bail, Context, Result};
use serde::Serialize;

/// Upper bound for summary and cluster sizes; `MAX_SIZE - size` sorts biggest first.
pub const MAX_SIZE: u64 = 1_000_000_000;

/// Malformed rows logged individually before going quiet.
const MALFORMED_LOG_LIMIT: u64 = 5;

// ----------------------------- Keys and values -----------------------------

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct GroupKey {
    pub version: String,
    pub site: String,
    /// `None` is the all-platforms bucket.
    pub platform: Option<String>,
    pub kind: FeedbackType,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MappedComment {
    pub id: u64,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ClusterKey {
    pub sort_key: u64,
    pub version: String,
    pub site: String,
    pub platform: Option<String>,
    /// Sentiment bucket; `None` aggregates all feedback types.
    pub sentiment: Option<FeedbackType>,
    pub c_index: u32,
    pub c_type: FeedbackType,
    pub c_size: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScoredComment {
    pub id: u64,
    pub message: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SummaryKey {
    pub version: String,
    pub site: String,
    pub platform: Option<String>,
    pub sentiment: Option<FeedbackType>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ClusteredComment {
    pub cluster_id: u64,
    pub c_type: FeedbackType,
    pub c_size: u64,
    pub m_refid: u64,
    pub comment_id: u64,
    pub message: String,
    pub score: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SizedSummaryKey {
    /// `%09d` of `MAX_SIZE - summary size`.
    pub size_key: String,
    pub version: String,
    pub site: String,
    pub platform: Option<String>,
    pub sentiment: Option<FeedbackType>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SizedComment {
    pub summary_size: u64,
    pub comment: ClusteredComment,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SiteKey {
    pub version: String,
    pub site: String,
    pub platform: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SummaryRow {
    pub sentiment: Option<FeedbackType>,
    pub site_id: u64,
    pub summary_size: u64,
    pub comment: ClusteredComment,
}

/// Final sort key: zero-padded site id, zero-padded cluster id, then `10.0 - score`
/// so higher similarity sorts first within a cluster.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct OutputKey {
    pub site_id: String,
    pub cluster_id: String,
    pub score: String,
}

impl OutputKey {
    pub fn new(site_id: u64, cluster_id: u64, score: f64) -> Self {
        Self {
            site_id: format!("{site_id:09}"),
            cluster_id: format!("{cluster_id:09}"),
            score: format!("{:02.5}", 10.0 - score),
        }
    }
}

/// Fully flattened summary/cluster/comment row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DenormalizedRow {
    pub version: String,
    pub site: String,
    pub platform: Option<String>,
    pub sentiment: Option<FeedbackType>,
    pub site_id: u64,
    pub summary_size: u64,
    pub sad_size: u64,
    pub happy_size: u64,
    pub cluster_id: u64,
    pub c_type: FeedbackType,
    pub c_size: u64,
    pub m_refid: u64,
    pub comment_id: u64,
    pub message: String,
    pub score: f64,
}

// ----------------------------- Phase 1: map + cluster -----------------------------

/// Keys each usable comment by site, version, platform and type.
/// Emits every comment twice: under its own platform and under the aggregate `None`.
pub struct SiteSummaryMapper {
    comments_in: Counter,
    comments_used: Counter,
    malformed: Counter,
}

impl SiteSummaryMapper {
    pub fn new(counters: &Counters) -> Self {
        Self {
            comments_in: counters.counter(counters::COMMENTS_IN),
            comments_used: counters.counter(counters::COMMENTS_USED),
            malformed: counters.counter(counters::COMMENTS_MALFORMED),
        }
    }
}

impl Mapper for SiteSummaryMapper {
    type Input = String;
    type Key = GroupKey;
    type Value = MappedComment;

    fn map<F>(&self, line: String, emit: &mut F) -> Result<()>
    where
        F: FnMut(GroupKey, MappedComment),
    {
        self.comments_in.inc();
        let comment = match Comment::parse(&line) {
            Ok(c) => c,
            Err(e) => {
                self.malformed.inc();
                if self.malformed.get() <= MALFORMED_LOG_LIMIT {
                    tracing::warn!(error = %e, "skipping malformed comment row");
                }
                return Ok(());
            }
        };
        if comment.url.is_empty() || !comment.kind.is_supported() {
            return Ok(());
        }
        self.comments_used.inc();

        let site = normalize_url(&comment.url);
        for platform in [Some(comment.os.clone()), None] {
            emit(
                GroupKey {
                    version: comment.version.clone(),
                    site: site.clone(),
                    platform,
                    kind: comment.kind.clone(),
                },
                MappedComment { id: comment.id, message: comment.message.clone() },
            );
        }
        Ok(())
    }
}

/// Clusters all comments sharing a [`GroupKey`] with a fresh similarity corpus.
///
/// Each resulting (cluster, comment) row is emitted for the specific sentiment bucket and
/// again for the aggregate `None` bucket. Comments the corpus leaves out become
/// single-comment clusters with score 1.0.
pub struct CommentClusteringReducer<C> {
    corpora: C,
    clusters: Counter,
}

impl<C: CorpusFactory> CommentClusteringReducer<C> {
    pub fn new(corpora: C, counters: &Counters) -> Self {
        Self { corpora, clusters: counters.counter(counters::CLUSTERS) }
    }
}

impl<C: CorpusFactory> Reducer for CommentClusteringReducer<C> {
    type Key = GroupKey;
    type ValueIn = MappedComment;
    type KeyOut = ClusterKey;
    type ValueOut = ScoredComment;

    fn reduce<F>(&self, key: GroupKey, values: Vec<MappedComment>, emit: &mut F) -> Result<()>
    where
        F: FnMut(ClusterKey, ScoredComment),
    {
        let mut emit_row = |c_index: u32, c_size: usize, value: &MappedComment, score: f64| {
            for sentiment in [Some(key.kind.clone()), None] {
                emit(
                    ClusterKey {
                        sort_key: MAX_SIZE - c_size as u64,
                        version: key.version.clone(),
                        site: key.site.clone(),
                        platform: key.platform.clone(),
                        sentiment,
                        c_index,
                        c_type: key.kind.clone(),
                        c_size: c_size as u64,
                    },
                    ScoredComment { id: value.id, message: value.message.clone(), score },
                );
            }
        };

        let mut c_index: u32 = 1;
        if values.len() == 1 {
            emit_row(c_index, 1, &values[0], 1.0);
            self.clusters.add(2);
            return Ok(());
        }

        let mut corpus = self.corpora.create();
        for (doc, value) in values.iter().enumerate() {
            corpus.add(doc, &value.message);
        }
        let groups = corpus.cluster().with_context(|| {
            format!(
                "clustering {} comments for {} {} ({})",
                values.len(),
                key.site,
                key.version,
                key.kind
            )
        })?;

        let mut claimed = vec![false; values.len()];
        for group in groups {
            c_index += 1;
            let c_size = group.size();
            let members = std::iter::once((group.primary, 1.0)).chain(group.similars);
            for (doc, score) in members {
                match claimed.get_mut(doc) {
                    Some(seen) if !*seen => *seen = true,
                    Some(_) => bail!("corpus returned document {doc} in more than one cluster"),
                    None => bail!("corpus returned unknown document {doc}"),
                }
                emit_row(c_index, c_size, &values[doc], score);
            }
            self.clusters.add(2);
        }

        for (doc, value) in values.iter().enumerate() {
            if !claimed[doc] {
                c_index += 1;
                emit_row(c_index, 1, value, 1.0);
                self.clusters.add(2);
            }
        }
        if values.len() > 1000 {
            tracing::debug!(site = %key.site, version = %key.version, comments = values.len(), clusters = c_index - 1, "clustered large group");
        }
        Ok(())
    }
}

// ----------------------------- Phase 2: cluster ids -----------------------------

/// Assigns cluster ids and comment reference ids in shuffle order.
/// Holds the id sequences, so it must see every key: one task only.
#[derive(Default)]
pub struct ClusterIdReducer {
    cluster_ids: IdSequence,
    ref_ids: IdSequence,
}

impl ClusterIdReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clusters_assigned(&self) -> u64 {
        self.cluster_ids.last()
    }

    pub fn refs_assigned(&self) -> u64 {
        self.ref_ids.last()
    }
}

impl SequentialReducer for ClusterIdReducer {
    type Key = ClusterKey;
    type ValueIn = ScoredComment;
    type KeyOut = SummaryKey;
    type ValueOut = ClusteredComment;

    fn reduce<F>(&mut self, key: ClusterKey, values: Vec<ScoredComment>, emit: &mut F) -> Result<()>
    where
        F: FnMut(SummaryKey, ClusteredComment),
    {
        let cluster_id = self.cluster_ids.next_id();
        for value in values {
            let m_refid = self.ref_ids.next_id();
            emit(
                SummaryKey {
                    version: key.version.clone(),
                    site: key.site.clone(),
                    platform: key.platform.clone(),
                    sentiment: key.sentiment.clone(),
                },
                ClusteredComment {
                    cluster_id,
                    c_type: key.c_type.clone(),
                    c_size: key.c_size,
                    m_refid,
                    comment_id: value.id,
                    message: value.message,
                    score: value.score,
                },
            );
        }
        Ok(())
    }
}

// ----------------------------- Phase 3: summary sizes -----------------------------

/// Counts the rows of each site summary and prefixes the summary-size sort key.
pub struct SummarySizeReducer {
    summaries: Counter,
}

impl SummarySizeReducer {
    pub fn new(counters: &Counters) -> Self {
        Self { summaries: counters.counter(counters::SITE_SUMMARIES) }
    }
}

impl Reducer for SummarySizeReducer {
    type Key = SummaryKey;
    type ValueIn = ClusteredComment;
    type KeyOut = SizedSummaryKey;
    type ValueOut = SizedComment;

    fn reduce<F>(&self, key: SummaryKey, values: Vec<ClusteredComment>, emit: &mut F) -> Result<()>
    where
        F: FnMut(SizedSummaryKey, SizedComment),
    {
        let summary_size = values.len() as u64;
        let size_key = format!("{:09}", MAX_SIZE - summary_size);
        for comment in values {
            emit(
                SizedSummaryKey {
                    size_key: size_key.clone(),
                    version: key.version.clone(),
                    site: key.site.clone(),
                    platform: key.platform.clone(),
                    sentiment: key.sentiment.clone(),
                },
                SizedComment { summary_size, comment },
            );
        }
        self.summaries.inc();
        Ok(())
    }
}

// ----------------------------- Phase 4: summary ids -----------------------------

/// Assigns site summary ids, busiest summaries first, and drops the sentiment from the key.
/// One task only, like [`ClusterIdReducer`].
#[derive(Default)]
pub struct SummaryIdReducer {
    site_ids: IdSequence,
}

impl SummaryIdReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summaries_assigned(&self) -> u64 {
        self.site_ids.last()
    }
}

impl SequentialReducer for SummaryIdReducer {
    type Key = SizedSummaryKey;
    type ValueIn = SizedComment;
    type KeyOut = SiteKey;
    type ValueOut = SummaryRow;

    fn reduce<F>(&mut self, key: SizedSummaryKey, values: Vec<SizedComment>, emit: &mut F) -> Result<()>
    where
        F: FnMut(SiteKey, SummaryRow),
    {
        let site_id = self.site_ids.next_id();
        for value in values {
            emit(
                SiteKey {
                    version: key.version.clone(),
                    site: key.site.clone(),
                    platform: key.platform.clone(),
                },
                SummaryRow {
                    sentiment: key.sentiment.clone(),
                    site_id,
                    summary_size: value.summary_size,
                    comment: value.comment,
                },
            );
        }
        Ok(())
    }
}

// ----------------------------- Phase 5: denormalize -----------------------------

/// Joins the happy/sad counts of sibling summaries onto every row of a site.
///
/// `happy_size` is the size of the praise summary. `sad_size` is the size of the *last*
/// non-praise summary row seen, the aggregate bucket included; rows arrive busiest summary
/// first, so with a single non-praise type this is that type's size.
#[derive(Default)]
pub struct DenormalizingReducer;

impl Reducer for DenormalizingReducer {
    type Key = SiteKey;
    type ValueIn = SummaryRow;
    type KeyOut = OutputKey;
    type ValueOut = DenormalizedRow;

    fn reduce<F>(&self, key: SiteKey, values: Vec<SummaryRow>, emit: &mut F) -> Result<()>
    where
        F: FnMut(OutputKey, DenormalizedRow),
    {
        let (mut sad_size, mut happy_size) = (0u64, 0u64);
        for row in &values {
            match &row.sentiment {
                Some(t) if t.is_praise() => happy_size = row.summary_size,
                _ => sad_size = row.summary_size,
            }
        }
        for row in values {
            let c = row.comment;
            emit(
                OutputKey::new(row.site_id, c.cluster_id, c.score),
                DenormalizedRow {
                    version: key.version.clone(),
                    site: key.site.clone(),
                    platform: key.platform.clone(),
                    sentiment: row.sentiment,
                    site_id: row.site_id,
                    summary_size: row.summary_size,
                    sad_size,
                    happy_size,
                    cluster_id: c.cluster_id,
                    c_type: c.c_type,
                    c_size: c.c_size,
                    m_refid: c.m_refid,
                    comment_id: c.comment_id,
                    message: c.message,
                    score: c.score,
                },
            );
        }
        Ok(())
    }
}
