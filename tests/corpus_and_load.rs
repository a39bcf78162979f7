#[path = "common/mod.rs"]
mod common;

use common::*;
use sitecluster::{
    render_load_sql, run_load_command, CorpusFactory, SimilarityCorpus, TfIdfCorpus, TfIdfCorpusFactory, CLUSTERS_TSV,
    COMMENTS_TSV, LOAD_SQL, SITESUMMARIES_TSV,
};
use std::fs;
use std::path::Path;

fn cluster(texts: &[&str]) -> Vec<(usize, Vec<usize>)> {
    let mut corpus = TfIdfCorpus::default();
    for (i, t) in texts.iter().enumerate() {
        corpus.add(i, t);
    }
    corpus
        .cluster()
        .unwrap()
        .into_iter()
        .map(|g| (g.primary, g.similars.iter().map(|(d, _)| *d).collect()))
        .collect()
}

#[test]
fn near_duplicates_cluster_around_the_first_pivot() {
    let groups = cluster(&[
        "Flash video does not play",
        "Bookmarks toolbar disappeared",
        "flash video does not play at all",
        "bookmarks toolbar disappeared after update",
    ]);
    assert_eq!(groups, vec![(0, vec![2]), (1, vec![3])]);
}

#[test]
fn short_and_duplicate_texts_are_not_filtered() {
    assert_eq!(cluster(&["ok", "ok", "ok"]), vec![(0, vec![1, 2])]);
    // nothing indexable: never clusters, left to the caller as singletons
    assert!(cluster(&["", "the", "!!"]).is_empty());
    assert!(cluster(&["slow", "crash"]).is_empty());
}

#[test]
fn similars_are_scored_best_first() {
    let mut corpus = TfIdfCorpusFactory { threshold: 0.3 }.create();
    corpus.add(10, "tabs crash when opening many windows");
    corpus.add(11, "tabs crash");
    corpus.add(12, "tabs crash when opening many windows quickly");
    let groups = corpus.cluster().unwrap();
    assert_eq!(groups.len(), 1);
    let g = &groups[0];
    assert_eq!(g.primary, 10);
    assert_eq!(g.size(), 3);
    assert_eq!(g.similars[0].0, 12);
    assert!(g.similars[0].1 > g.similars[1].1);
    assert!(g.similars.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
}

#[test]
fn load_script_truncates_then_loads_each_table() {
    let sql = render_load_sql(Path::new("/srv/sites"));
    let truncate = sql.find("TRUNCATE TABLE website_issues_comment").unwrap();
    let first_load = sql.find("LOAD DATA").unwrap();
    assert!(truncate < first_load);
    for file in [SITESUMMARIES_TSV, CLUSTERS_TSV, COMMENTS_TSV] {
        assert!(sql.contains(&format!("'/srv/sites/{file}'")), "{file} not loaded");
    }
    let summaries = sql.find("INTO TABLE website_issues_sitesummary").unwrap();
    let comments = sql.find("INTO TABLE website_issues_comment").unwrap();
    assert!(summaries < comments);
}

#[test]
fn run_writes_and_pipes_load_script() {
    let (guard, source, work) = make_source(&scenario_rows());
    let captured = guard.path().join("captured.sql");
    let summary = quiet_job(&source, &work)
        .skip_load(false)
        .load_command(format!("cat > '{}'", captured.display()))
        .run()
        .unwrap();

    let script = summary.load_script.unwrap();
    assert_eq!(script.file_name().unwrap(), LOAD_SQL);
    assert_eq!(fs::read(&script).unwrap(), fs::read(&captured).unwrap());
    let sql = fs::read_to_string(&script).unwrap();
    assert!(sql.contains(COMMENTS_TSV));
}

#[test]
fn failing_load_command_fails_the_run() {
    let (_guard, source, work) = make_source(&scenario_rows());
    let err = quiet_job(&source, &work).skip_load(false).load_command("exit 3").run().unwrap_err();
    assert!(err.to_string().contains("failed"));

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join(LOAD_SQL);
    fs::write(&script, "SELECT 1;\n").unwrap();
    assert!(run_load_command("cat > /dev/null", &script).is_ok());
}

#[test]
fn words_outside_ascii_are_indexed() {
    assert_eq!(cluster(&["Seite lädt nicht richtig", "die Seite lädt nicht"]), vec![(0, vec![1])]);
    assert_eq!(cluster(&["страница не загружается", "страница не загружается вообще"]), vec![(0, vec![1])]);
}

#[test]
fn zero_threshold_never_joins_unrelated_texts() {
    let mut corpus = TfIdfCorpusFactory { threshold: 0.0 }.create();
    corpus.add(0, "video freezes");
    corpus.add(1, "bookmarks vanished");
    assert!(corpus.cluster().unwrap().is_empty());
}
