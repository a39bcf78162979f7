#[path = "common/mod.rs"]
mod common;

use anyhow::{anyhow, Result};
use common::*;
use sitecluster::counter_names::*;
use sitecluster::*;

fn mapped_groups(rows: &[String], counters: &Counters) -> Vec<(GroupKey, Vec<MappedComment>)> {
    let mapper = SiteSummaryMapper::new(counters);
    let pairs = run_map(&mapper, rows.iter().cloned().map(Ok)).unwrap();
    shuffle(pairs)
}

#[test]
fn mapper_emits_platform_and_aggregate_buckets() {
    let counters = Counters::new();
    let mut rows = scenario_rows();
    rows.push(export_row(9, "rating", "4.0", "mac", "http://example.com", "5 stars"));
    rows.push("not\ta\tvalid\trow".to_string());

    let mapper = SiteSummaryMapper::new(&counters);
    let pairs = run_map(&mapper, rows.into_iter().map(Ok)).unwrap();
    assert_eq!(pairs.len(), 6);
    assert_eq!(pairs[0].0.platform.as_deref(), Some("mac"));
    assert_eq!(pairs[1].0.platform, None);
    assert_eq!(pairs[0].1, MappedComment { id: 1, message: "Great site, love the design".into() });
    assert_eq!(counters.get(COMMENTS_IN), 5);
    assert_eq!(counters.get(COMMENTS_USED), 3);
    assert_eq!(counters.get(COMMENTS_MALFORMED), 1);

    let groups = shuffle(pairs);
    assert_eq!(groups.len(), 4);
    // all-platforms sorts before "mac"; praise before issue
    assert_eq!(groups[0].0.platform, None);
    assert_eq!(groups[0].0.kind, FeedbackType::Praise);
    assert_eq!(groups[1].1.iter().map(|m| m.id).collect::<Vec<_>>(), vec![2, 3]);
}

#[test]
fn golden_mapper_count() {
    let counters = Counters::new();
    let mapper = SiteSummaryMapper::new(&counters);
    let records = comment_records(&fixture("opinions_100.tsv"), 64 * 1024).unwrap();
    let pairs = run_map(&mapper, records).unwrap();
    assert_eq!(pairs.len(), 136);
}

#[test]
fn singleton_groups_skip_the_corpus() {
    let counters = Counters::new();
    let rows = vec![export_row(5, "issue", "4.0", "mac", "http://solo.example", "the")];
    let groups = mapped_groups(&rows, &counters);
    let reducer = CommentClusteringReducer::new(FailingCorpus, &counters);
    let out = run_parallel(&reducer, groups, None).unwrap();

    // 2 platform buckets x 2 sentiment buckets
    assert_eq!(out.len(), 4);
    for (key, value) in &out {
        assert_eq!(key.c_size, 1);
        assert_eq!(key.sort_key, MAX_SIZE - 1);
        assert_eq!(key.c_index, 1);
        assert_eq!(value.message, "the");
        assert_eq!(value.score, 1.0);
    }
    assert_eq!(counters.get(CLUSTERS), 4);
}

#[test]
fn unclaimed_comments_become_singletons() {
    let counters = Counters::new();
    let rows = vec![
        export_row(1, "issue", "4.0", "mac", "http://a.example", "Video playback freezes constantly"),
        export_row(2, "issue", "4.0", "mac", "http://a.example", "Checkout button missing"),
        export_row(3, "issue", "4.0", "mac", "http://a.example", "video playback freezes"),
    ];
    let groups: Vec<_> = mapped_groups(&rows, &counters)
        .into_iter()
        .filter(|(k, _)| k.platform.is_none())
        .collect();
    let reducer = CommentClusteringReducer::new(TfIdfCorpusFactory::default(), &counters);
    let out = run_parallel(&reducer, groups, None).unwrap();
    let specific: Vec<_> = out.iter().filter(|(k, _)| k.sentiment.is_some()).collect();
    assert_eq!(specific.len(), 3);

    let pair: Vec<_> = specific.iter().filter(|(k, _)| k.c_size == 2).collect();
    assert_eq!(pair.len(), 2);
    assert_eq!(pair[0].1.id, 1);
    assert_eq!(pair[0].1.score, 1.0);
    assert_eq!(pair[1].1.id, 3);
    assert!(pair[1].1.score >= DEFAULT_THRESHOLD && pair[1].1.score < 1.0);

    let single: Vec<_> = specific.iter().filter(|(k, _)| k.c_size == 1).collect();
    assert_eq!(single.len(), 1);
    assert_eq!(single[0].1.id, 2);
    assert_ne!(single[0].0.c_index, pair[0].0.c_index);
}

/// Corpus that fails on every clustering call.
struct FailingCorpus;

struct Failing;

impl SimilarityCorpus for Failing {
    fn add(&mut self, _doc: usize, _text: &str) {}
    fn cluster(&mut self) -> Result<Vec<SimilarityGroup>> {
        Err(anyhow!("similarity backend unavailable"))
    }
}

impl CorpusFactory for FailingCorpus {
    type Corpus = Failing;
    fn create(&self) -> Failing {
        Failing
    }
}

/// Corpus that puts document 0 into two groups.
struct OverlappingCorpus;

struct Overlapping(usize);

impl SimilarityCorpus for Overlapping {
    fn add(&mut self, _doc: usize, _text: &str) {
        self.0 += 1;
    }
    fn cluster(&mut self) -> Result<Vec<SimilarityGroup>> {
        Ok(vec![
            SimilarityGroup { primary: 0, similars: vec![(1, 0.9)] },
            SimilarityGroup { primary: 0, similars: vec![] },
        ])
    }
}

impl CorpusFactory for OverlappingCorpus {
    type Corpus = Overlapping;
    fn create(&self) -> Overlapping {
        Overlapping(0)
    }
}

#[test]
fn corpus_failure_aborts_the_run() {
    let (_guard, source, work) = make_source(&scenario_rows());
    let err = quiet_job(&source, &work).run_with(FailingCorpus).unwrap_err();
    assert!(format!("{err:#}").contains("similarity backend unavailable"));
    assert!(!work.join(COMMENTS_TSV).exists());

    let err = quiet_job(&source, &work).run_with(OverlappingCorpus).unwrap_err();
    assert!(format!("{err:#}").contains("more than one cluster"));
}

#[test]
fn sequential_ids_are_gapless_in_shuffle_order() {
    let counters = Counters::new();
    let rows: Vec<String> = (1..=12)
        .map(|i| {
            let kind = ["praise", "issue", "brokenwebsite"][i % 3];
            let site = format!("http://site{}.example", i % 4);
            export_row(i as u64, kind, "4.0", "linux", &site, &format!("distinct message number {i}"))
        })
        .collect();
    let groups = mapped_groups(&rows, &counters);
    let clustered = run_parallel(&CommentClusteringReducer::new(TfIdfCorpusFactory::default(), &counters), groups, None).unwrap();
    let n_rows = clustered.len() as u64;

    let mut ids = ClusterIdReducer::new();
    let with_ids = run_sequential(&mut ids, shuffle(clustered), None).unwrap();
    let refs: Vec<u64> = with_ids.iter().map(|(_, v)| v.m_refid).collect();
    assert_eq!(refs, (1..=n_rows).collect::<Vec<_>>());
    let mut cluster_ids: Vec<u64> = with_ids.iter().map(|(_, v)| v.cluster_id).collect();
    assert!(cluster_ids.windows(2).all(|w| w[0] <= w[1]));
    cluster_ids.dedup();
    assert_eq!(cluster_ids, (1..=ids.clusters_assigned()).collect::<Vec<_>>());

    let sized = run_parallel(&SummarySizeReducer::new(&counters), shuffle(with_ids), None).unwrap();
    for (key, value) in &sized {
        assert_eq!(key.size_key, format!("{:09}", MAX_SIZE - value.summary_size));
    }
    let mut summary_ids = SummaryIdReducer::new();
    let with_site_ids = run_sequential(&mut summary_ids, shuffle(sized), None).unwrap();
    let mut site_ids: Vec<u64> = with_site_ids.iter().map(|(_, v)| v.site_id).collect();
    // busiest summaries get the lowest ids
    assert!(with_site_ids.windows(2).all(|w| w[0].1.summary_size >= w[1].1.summary_size));
    site_ids.dedup();
    assert_eq!(site_ids, (1..=summary_ids.summaries_assigned()).collect::<Vec<_>>());
    assert_eq!(counters.get(SITE_SUMMARIES), summary_ids.summaries_assigned());
}

#[test]
fn denormalizer_orders_by_site_cluster_and_score() {
    assert_eq!(OutputKey::new(3, 12, 1.0).score, "9.00000");
    assert_eq!(OutputKey::new(3, 12, 0.75).score, "9.25000");
    assert_eq!(OutputKey::new(3, 12, 0.75).site_id, "000000003");
    assert!(OutputKey::new(3, 12, 0.9) < OutputKey::new(3, 12, 0.6));
    assert!(OutputKey::new(2, 99, 0.1) < OutputKey::new(3, 1, 1.0));

    let key = SiteKey { version: "4.0".into(), site: "http://x.example".into(), platform: None };
    let comment = |cluster_id, m_refid, score| ClusteredComment {
        cluster_id,
        c_type: FeedbackType::Issue,
        c_size: 2,
        m_refid,
        comment_id: m_refid * 10,
        message: format!("m{m_refid}"),
        score,
    };
    let rows = vec![
        SummaryRow { sentiment: None, site_id: 1, summary_size: 3, comment: comment(1, 1, 1.0) },
        SummaryRow { sentiment: Some(FeedbackType::Issue), site_id: 2, summary_size: 2, comment: comment(2, 3, 1.0) },
        SummaryRow { sentiment: Some(FeedbackType::Praise), site_id: 3, summary_size: 1, comment: comment(3, 5, 1.0) },
    ];
    let out = run_parallel(&DenormalizingReducer, vec![(key, rows)], None).unwrap();
    assert_eq!(out.len(), 3);
    for (_, row) in &out {
        assert_eq!(row.sad_size, 2);
        assert_eq!(row.happy_size, 1);
    }

    let mut sites: Vec<Vec<String>> = Vec::new();
    let mut clusters: Vec<Vec<String>> = Vec::new();
    let mut comments: Vec<Vec<String>> = Vec::new();
    let flat: Vec<DenormalizedRow> = shuffle(out).into_iter().flat_map(|(_, v)| v).collect();
    let counts = normalize_rows(&flat, &mut sites, &mut clusters, &mut comments).unwrap();
    assert_eq!(counts, NormalizedCounts { sitesummaries: 3, clusters: 3, comments: 3 });
    assert_eq!(sites[0], ["1", "http://x.example", "4.0", "NULL", "NULL", "3", "2", "1"]);
    assert_eq!(sites[2][3], "1");
    assert_eq!(clusters[1], ["2", "2", "2", "m3", "3", "0"]);
    assert_eq!(comments[2], ["5", "3", "m5", "50", "1.0"]);
}
