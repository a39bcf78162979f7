mod config;
mod counters;
mod progress;
mod util;
mod pipeline;

mod comment;
mod site;
mod tsv;
mod source;

mod corpus;
mod mapreduce;
mod tasks;

mod ndjson;
mod normalize;
mod load;

pub use crate::config::{ClusterOptions, DEFAULT_SOURCE, DEFAULT_WORK_DIR};
pub use crate::pipeline::{cluster_records, table_paths, write_tables, ClusterOutput, PhaseCounts, RunContext, RunSummary, SiteClusterJob, COUNTERS_JSON};
pub use crate::source::{comment_records, open_source, Compression, SourceMissing};

// Export records and the TSV dialect.
pub use crate::comment::{positive_flag, Comment, FeedbackType, RowError, EXPORT_COLUMNS};
pub use crate::site::normalize_url;
pub use crate::tsv::{escape_field, has_continuation, join_fields, split_fields, Recombined, TsvWriter, NULL};

// Export the map/reduce runtime and the clustering phases so callers can run them piecemeal.
pub use crate::mapreduce::{run_map, run_parallel, run_sequential, shuffle, IdSequence, Mapper, Reducer, SequentialReducer};
pub use crate::tasks::{
    ClusterIdReducer, ClusterKey, ClusteredComment, CommentClusteringReducer, DenormalizedRow, DenormalizingReducer,
    GroupKey, MappedComment, OutputKey, ScoredComment, SiteKey, SiteSummaryMapper, SizedComment, SizedSummaryKey,
    SummaryIdReducer, SummaryKey, SummaryRow, SummarySizeReducer, MAX_SIZE,
};

// Similarity corpus seam.
pub use crate::corpus::{CorpusFactory, SimilarityCorpus, SimilarityGroup, TfIdfCorpus, TfIdfCorpusFactory, DEFAULT_THRESHOLD};

pub use crate::counters::{Counter, CounterSnapshot, Counters};
pub mod counter_names {
    pub use crate::counters::{
        CLUSTERS, CLUSTER_IDS, CLUSTER_ROWS, COMMENTS_IN, COMMENTS_MALFORMED, COMMENTS_USED, COMMENT_ROWS,
        REPORT_EVERY, SITESUMMARY_ROWS, SITE_SUMMARIES, SUMMARY_IDS,
    };
}

pub use crate::normalize::{format_score, normalize_rows, NormalizedCounts, RowSink, CLUSTERS_TSV, COMMENTS_TSV, SITESUMMARIES_TSV};
pub use crate::load::{render_load_sql, run_load_command, write_load_script, LOAD_SQL};
pub use crate::ndjson::{dump_pairs, NdjsonWriter};
pub use crate::progress::ProgressScope;

// Export robust file ops and logging setup so the binary can import from crate root.
pub use crate::util::{create_with_backoff, init_tracing_once, open_with_backoff, remove_with_backoff, replace_file_atomic_backoff};
