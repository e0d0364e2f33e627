//! Deterministic feature-hash embeddings and the dense cosine table.
//!
//! No model download, no network: each token is FNV-1a hashed into a
//! signed bucket, token vectors are averaged per document, and the result
//! is L2-normalized so cosine similarity reduces to a dot product. The
//! same embedder instance serves documents and queries.

pub const EMBEDDING_DIM: usize = 256;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01B3;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn l2_normalize(v: &mut [f32]) {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "dimension must be > 0");
        Self { dimension }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Averaged signed-bucket vector over the token stream, L2-normalized.
    /// An empty stream embeds to the zero vector.
    pub fn embed(&self, tokens: &[String]) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        if tokens.is_empty() {
            return vector;
        }
        for token in tokens {
            let h = fnv1a(token.as_bytes());
            let bucket = (h as usize) % self.dimension;
            let sign = if (h >> 32) & 1 == 0 { 1.0f32 } else { -1.0f32 };
            vector[bucket] += sign;
        }
        let inv = 1.0 / tokens.len() as f32;
        for x in vector.iter_mut() {
            *x *= inv;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(EMBEDDING_DIM)
    }
}

/// One stored vector per document; brute-force cosine scan. The ontology
/// document set is small enough that a flat table beats any ANN structure.
#[derive(Debug, Clone, Default)]
pub struct DenseIndex {
    vectors: Vec<Vec<f32>>,
}

impl DenseIndex {
    pub fn build(embedder: &HashEmbedder, token_streams: &[Vec<String>]) -> Self {
        Self {
            vectors: token_streams.iter().map(|t| embedder.embed(t)).collect(),
        }
    }

    pub fn doc_count(&self) -> usize {
        self.vectors.len()
    }

    /// Top-`k` documents by cosine similarity, zero-similarity documents
    /// excluded; ties break on document ordinal.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut ranked: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(doc, v)| (doc, dot(query, v)))
            .filter(|&(_, score)| score > 0.0)
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

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
