//! Text-similarity clustering primitive used by the clustering reducer.
//!
//! [`SimilarityCorpus`] is the seam: documents go in with a caller-chosen index, and
//! `cluster()` returns groups made of a pivot plus the documents similar to it. Documents
//! that are not similar enough to anything are left out of the result; the caller turns
//! them into single-comment clusters.

use ahash::{AHashMap, AHashSet};
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

/// One similarity group: the pivot and its similars with scores in `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct SimilarityGroup {
    pub primary: usize,
    pub similars: Vec<(usize, f64)>,
}

impl SimilarityGroup {
    pub fn size(&self) -> usize {
        self.similars.len() + 1
    }
}

pub trait SimilarityCorpus {
    /// Add a document. `doc` identifies it in the returned groups.
    fn add(&mut self, doc: usize, text: &str);

    /// Group the added documents. Every document appears in at most one group.
    fn cluster(&mut self) -> Result<Vec<SimilarityGroup>>;
}

/// Builds a fresh corpus per reducer group; shared across parallel reducer tasks.
pub trait CorpusFactory: Send + Sync {
    type Corpus: SimilarityCorpus;

    fn create(&self) -> Self::Corpus;
}

/// Minimum cosine similarity for a document to join a pivot.
pub const DEFAULT_THRESHOLD: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is",
    "it", "its", "no", "not", "of", "on", "or", "so", "such", "that", "the", "their", "then",
    "there", "these", "they", "this", "to", "was", "will", "with", "i", "me", "my", "we",
    "you", "your",
];

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{Alphabetic}\p{N}]+(?:'\p{Alphabetic}+)?").unwrap())
}

fn tokenize(text: &str, stop: &AHashSet<&'static str>) -> Vec<String> {
    let lower = text.to_lowercase();
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| !stop.contains(*w))
        .map(str::to_string)
        .collect()
}

/// TF-IDF weighted cosine-similarity corpus with greedy pivot grouping.
///
/// Documents are visited in insertion order. An unvisited document becomes a pivot and
/// every later unvisited document scoring at least `threshold` (and above zero) against it
/// joins the group, best score first. Documents without any indexable word never cluster.
pub struct TfIdfCorpus {
    threshold: f64,
    stop: AHashSet<&'static str>,
    docs: Vec<(usize, Vec<String>)>,
}

impl TfIdfCorpus {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            stop: STOPWORDS.iter().copied().collect(),
            docs: Vec::new(),
        }
    }

    fn vectors(&self) -> Vec<AHashMap<&str, f64>> {
        let n = self.docs.len() as f64;
        let mut df: AHashMap<&str, usize> = AHashMap::new();
        for (_, toks) in &self.docs {
            let uniq: AHashSet<&str> = toks.iter().map(String::as_str).collect();
            for t in uniq {
                *df.entry(t).or_insert(0) += 1;
            }
        }

        self.docs
            .iter()
            .map(|(_, toks)| {
                let mut v: AHashMap<&str, f64> = AHashMap::new();
                for t in toks {
                    *v.entry(t.as_str()).or_insert(0.0) += 1.0;
                }
                for (t, w) in v.iter_mut() {
                    let idf = ((n + 1.0) / (df[t] as f64 + 1.0)).ln() + 1.0;
                    *w *= idf;
                }
                let norm = v.values().map(|w| w * w).sum::<f64>().sqrt();
                if norm > 0.0 {
                    for w in v.values_mut() {
                        *w /= norm;
                    }
                }
                v
            })
            .collect()
    }
}

impl Default for TfIdfCorpus {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

fn cosine(a: &AHashMap<&str, f64>, b: &AHashMap<&str, f64>) -> f64 {
    let (small, large) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let dot: f64 = small.iter().filter_map(|(t, w)| large.get(t).map(|o| w * o)).sum();
    if dot > 0.0 {
        dot.min(1.0)
    } else {
        0.0
    }
}

impl SimilarityCorpus for TfIdfCorpus {
    fn add(&mut self, doc: usize, text: &str) {
        let toks = tokenize(text, &self.stop);
        self.docs.push((doc, toks));
    }

    fn cluster(&mut self) -> Result<Vec<SimilarityGroup>> {
        let vecs = self.vectors();
        let mut visited = vec![false; self.docs.len()];
        let mut groups = Vec::new();

        for i in 0..self.docs.len() {
            if visited[i] {
                continue;
            }
            visited[i] = true;
            if vecs[i].is_empty() {
                continue;
            }
            let mut similars: Vec<(usize, f64)> = ((i + 1)..self.docs.len())
                .filter(|&j| !visited[j] && !vecs[j].is_empty())
                .map(|j| (j, cosine(&vecs[i], &vecs[j])))
                // documents sharing no word never join, whatever the threshold
                .filter(|&(_, score)| score > 0.0 && score >= self.threshold)
                .collect();
            if similars.is_empty() {
                continue;
            }
            // best score first, insertion order breaks ties
            similars.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
            for &(j, _) in &similars {
                visited[j] = true;
            }
            groups.push(SimilarityGroup {
                primary: self.docs[i].0,
                similars: similars.into_iter().map(|(j, s)| (self.docs[j].0, s)).collect(),
            });
        }
        Ok(groups)
    }
}

/// Factory for [`TfIdfCorpus`] with a fixed threshold.
#[derive(Clone, Copy, Debug)]
pub struct TfIdfCorpusFactory {
    pub threshold: f64,
}

impl Default for TfIdfCorpusFactory {
    fn default() -> Self {
        Self { threshold: DEFAULT_THRESHOLD }
    }
}

impl CorpusFactory for TfIdfCorpusFactory {
    type Corpus = TfIdfCorpus;

    fn create(&self) -> TfIdfCorpus {
        TfIdfCorpus::new(self.threshold)
    }
}
