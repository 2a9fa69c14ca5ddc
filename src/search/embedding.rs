//! Embedders
//!
//! The core only needs a deterministic text → fixed-length vector function.
//! [`Embedder`] is that contract; [`HtpEmbedder`] is the built-in model, a
//! Harmonic Token Projection (HTP) embedding:
//!
//! "Harmonic Token Projection: A Vocabulary-Free, Training-Free,
//!  Deterministic, and Reversible Embedding Methodology"
//! https://arxiv.org/html/2511.20665
//!
//! HTP needs no model file, so loading is instant, but the embedder is still
//! constructed once per process and shared by reference.

use std::f64::consts::PI;

use crate::core::error::{Result, SearchError};

/// Dense embedding vector
pub type EmbeddingVector = Vec<f32>;

/// Embedding dimension of the built-in model (2 * number of coprime moduli)
pub const EMBEDDING_DIM: usize = 384;

/// Model identifier recorded in the index
pub const HTP_MODEL_ID: &str = "htp-384-v1";

const NUM_MODULI: usize = EMBEDDING_DIM / 2;

/// Maximum token length (Unicode code points)
const MAX_TOKEN_LENGTH: usize = 64;

/// First NUM_MODULI primes, pairwise coprime
static COPRIME_MODULI: &[u64] = &[
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71,
    73, 79, 83, 89, 97, 101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151,
    157, 163, 167, 173, 179, 181, 191, 193, 197, 199, 211, 223, 227, 229, 233,
    239, 241, 251, 257, 263, 269, 271, 277, 281, 283, 293, 307, 311, 313, 317,
    331, 337, 347, 349, 353, 359, 367, 373, 379, 383, 389, 397, 401, 409, 419,
    421, 431, 433, 439, 443, 449, 457, 461, 463, 467, 479, 487, 491, 499, 503,
    509, 521, 523, 541, 547, 557, 563, 569, 571, 577, 587, 593, 599, 601, 607,
    613, 617, 619, 631, 641, 643, 647, 653, 659, 661, 673, 677, 683, 691, 701,
    709, 719, 727, 733, 739, 743, 751, 757, 761, 769, 773, 787, 797, 809, 811,
    821, 823, 827, 829, 839, 853, 857, 859, 863, 877, 881, 883, 887, 907, 911,
    919, 929, 937, 941, 947, 953, 967, 971, 977, 983, 991, 997, 1009, 1013,
    1019, 1021, 1031, 1033, 1039, 1049, 1051, 1061, 1063, 1069, 1087, 1091,
    1093, 1097, 1103, 1109, 1117, 1123, 1129, 1151, 1153, 1163, 1171, 1181,
];

/// Text embedding contract used by ingestion and query paths
///
/// Implementations must be deterministic for a fixed `model_id` and must
/// return vectors of exactly `dimension()` floats. `embed_batch` preserves
/// input order and length.
pub trait Embedder: Send + Sync {
    /// Model name and version, stored alongside the index
    fn model_id(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Whether the empty string is a valid input for this model
    fn accepts_empty(&self) -> bool {
        true
    }

    fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<EmbeddingVector>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Harmonic Token Projection embedder
///
/// Tokens are lowercased words; each token is encoded as a base-2^16 integer,
/// reduced modulo each prime and projected onto the unit circle. The text
/// vector is the L2-normalised mean of its token vectors. Empty text maps to
/// the zero vector.
pub struct HtpEmbedder {
    moduli: Vec<u64>,
}

impl HtpEmbedder {
    pub fn new() -> Self {
        Self {
            moduli: COPRIME_MODULI[..NUM_MODULI].to_vec(),
        }
    }

    fn embed_token(&self, token: &str) -> Vec<f64> {
        let n = token_to_integer(token);
        let mut embedding = Vec::with_capacity(EMBEDDING_DIM);

        for &m in &self.moduli {
            let r = n % m;
            let theta = 2.0 * PI * (r as f64) / (m as f64);
            embedding.push(theta.sin());
            embedding.push(theta.cos());
        }

        embedding
    }
}

impl Default for HtpEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for HtpEmbedder {
    fn model_id(&self) -> &str {
        HTP_MODEL_ID
    }

    fn dimension(&self) -> usize {
        EMBEDDING_DIM
    }

    fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        // NUL never appears in real text; it marks binary garbage
        if text.contains('\0') {
            return Err(SearchError::embedding("text contains NUL bytes"));
        }

        let tokens = tokenize(text);
        if tokens.is_empty() {
            return Ok(vec![0.0; EMBEDDING_DIM]);
        }

        let mut sum = vec![0.0f64; EMBEDDING_DIM];
        for token in &tokens {
            for (acc, val) in sum.iter_mut().zip(self.embed_token(token)) {
                *acc += val;
            }
        }

        let count = tokens.len() as f64;
        for val in &mut sum {
            *val /= count;
        }

        let norm: f64 = sum.iter().map(|x| x * x).sum::<f64>().sqrt();
        let embedding = if norm > 0.0 {
            sum.iter().map(|x| (*x / norm) as f32).collect()
        } else {
            sum.iter().map(|x| *x as f32).collect()
        };

        Ok(embedding)
    }
}

/// N = Σ u_j * B^(L-j) with B = 2^16, wrapping on overflow
fn token_to_integer(token: &str) -> u64 {
    token
        .chars()
        .take(MAX_TOKEN_LENGTH)
        .fold(0u64, |n, c| n.wrapping_mul(65536).wrapping_add(c as u64))
}

/// Lowercased words split on whitespace and ASCII punctuation
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| c.is_whitespace() || c.is_ascii_punctuation())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}
