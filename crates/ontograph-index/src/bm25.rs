//! BM25 inverted index over tokenized documents.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Scoring knobs. `k` is the default result count when callers pass no
/// explicit limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Bm25Params {
    pub k1: f32,
    pub b: f32,
    pub k: usize,
}

impl Default for Bm25Params {
    fn default() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            k: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    params: Bm25Params,
    /// term → (doc ordinal, term frequency), doc ordinals ascending.
    postings: AHashMap<String, Vec<(u32, u32)>>,
    doc_lengths: Vec<u32>,
    avg_doc_len: f32,
}

impl Bm25Index {
    /// Indexes one token stream per document.
    pub fn build(token_streams: &[Vec<String>], params: Bm25Params) -> Self {
        let mut postings: AHashMap<String, Vec<(u32, u32)>> = AHashMap::new();
        let mut doc_lengths = Vec::with_capacity(token_streams.len());

        for (doc, tokens) in token_streams.iter().enumerate() {
            doc_lengths.push(tokens.len() as u32);
            let mut counts: AHashMap<&str, u32> = AHashMap::new();
            for token in tokens {
                *counts.entry(token.as_str()).or_insert(0) += 1;
            }
            for (term, tf) in counts {
                postings
                    .entry(term.to_string())
                    .or_default()
                    .push((doc as u32, tf));
            }
        }
        for list in postings.values_mut() {
            list.sort_by_key(|&(doc, _)| doc);
        }

        let total: u64 = doc_lengths.iter().map(|&l| u64::from(l)).sum();
        let avg_doc_len = if doc_lengths.is_empty() {
            0.0
        } else {
            total as f32 / doc_lengths.len() as f32
        };

        Self {
            params,
            postings,
            doc_lengths,
            avg_doc_len,
        }
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn term_count(&self) -> usize {
        self.postings.len()
    }

    pub fn avg_doc_len(&self) -> f32 {
        self.avg_doc_len
    }

    /// Scores the query against every matching document and returns up to
    /// `k` results, best first; ties break on document ordinal.
    pub fn search(&self, query_tokens: &[String], k: usize) -> Vec<(usize, f32)> {
        if self.doc_lengths.is_empty() || query_tokens.is_empty() {
            return Vec::new();
        }
        let n = self.doc_lengths.len() as f32;
        let mut scores: AHashMap<u32, f32> = AHashMap::new();

        for term in query_tokens {
            let Some(list) = self.postings.get(term) else {
                continue;
            };
            let df = list.len() as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            for &(doc, tf) in list {
                let tf = tf as f32;
                let len = self.doc_lengths[doc as usize] as f32;
                let norm = 1.0 - self.params.b + self.params.b * len / self.avg_doc_len.max(1.0);
                let contribution = idf * tf * (self.params.k1 + 1.0) / (tf + self.params.k1 * norm);
                *scores.entry(doc).or_insert(0.0) += contribution;
            }
        }

        let mut ranked: Vec<(usize, f32)> = scores
            .into_iter()
            .map(|(doc, score)| (doc as usize, score))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k.max(1).min(ranked.len()));
        ranked
    }
}
