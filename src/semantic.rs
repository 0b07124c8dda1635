//! Local deterministic embeddings for stored chunks.
//!
//! Tokens and adjacent-token pairs are hashed into a fixed number of
//! buckets and the resulting vector is L2-normalized, so cosine similarity
//! reduces to a dot product.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL_ID: &str = "paperchunk-hash-v1";
pub const DEFAULT_EMBEDDING_DIM: usize = 384;
pub const DEFAULT_BACKEND: &str = "local-hash";
const MIN_EMBEDDING_DIM: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModel {
    pub model_id: String,
    pub dimensions: usize,
    pub backend: String,
}

impl EmbeddingModel {
    /// Unknown ids keep the local backend and default dimensions; blank ids
    /// resolve to the default model.
    pub fn resolve(model_id: &str) -> Self {
        let trimmed = model_id.trim();
        Self {
            model_id: if trimmed.is_empty() {
                DEFAULT_MODEL_ID.to_string()
            } else {
                trimmed.to_string()
            },
            dimensions: DEFAULT_EMBEDDING_DIM,
            backend: DEFAULT_BACKEND.to_string(),
        }
    }

    pub fn embed(&self, text: &str) -> Vec<f32> {
        embed_text_local(text, self.dimensions)
    }
}

pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Hash of the whitespace-normalized text, used to skip re-embedding
/// unchanged chunks.
pub fn embedding_text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_whitespace(text).as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn embed_text_local(text: &str, dimensions: usize) -> Vec<f32> {
    let dims = dimensions.max(MIN_EMBEDDING_DIM);
    let mut vector = vec![0_f32; dims];

    for feature in token_features(text) {
        let hash = stable_hash(&feature);
        let index = (hash % dims as u64) as usize;
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        let weight = 1.0 + ((hash >> 48) & 0xFF) as f32 / 255.0;
        vector[index] += sign * weight;
    }

    l2_normalize(&mut vector);
    vector
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f64 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }

    let dot = left
        .iter()
        .zip(right)
        .map(|(l, r)| f64::from(*l) * f64::from(*r))
        .sum::<f64>();
    let left_norm = norm(left);
    let right_norm = norm(right);
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}

pub fn encode_embedding_blob(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|value| value.to_le_bytes()).collect()
}

pub fn decode_embedding_blob(blob: &[u8], expected_dim: usize) -> Option<Vec<f32>> {
    if expected_dim == 0 || blob.len() != expected_dim.saturating_mul(4) {
        return None;
    }

    Some(
        blob.chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect(),
    )
}

/// First eight bytes of SHA-256, so bucket choice never depends on the
/// toolchain's hasher.
fn stable_hash(value: &str) -> u64 {
    let digest = Sha256::digest(value.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

fn token_features(text: &str) -> Vec<String> {
    let words = text
        .split_whitespace()
        .map(|word| {
            word.chars()
                .filter(|character| character.is_alphanumeric())
                .flat_map(char::to_lowercase)
                .collect::<String>()
        })
        .filter(|word| !word.is_empty())
        .collect::<Vec<String>>();

    let mut features = Vec::with_capacity(words.len() * 2);
    for (index, word) in words.iter().enumerate() {
        features.push(format!("w:{word}"));
        if let Some(next) = words.get(index + 1) {
            features.push(format!("b:{word}_{next}"));
        }
    }
    features
}

fn norm(values: &[f32]) -> f64 {
    values
        .iter()
        .map(|value| f64::from(*value) * f64::from(*value))
        .sum::<f64>()
        .sqrt()
}

fn l2_normalize(values: &mut [f32]) {
    let norm = norm(values) as f32;
    if norm > 0.0 {
        for value in values.iter_mut() {
            *value /= norm;
        }
    }
}
