// Copyright 2025 Modalith (https://github.com/modalith)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Embedder adaptors.
//!
//! The query core only depends on the traits; the shipped implementation is
//! a deterministic hashed bag-of-tokens projection, stable across replicas,
//! with real model backends plugging in behind the same seam. Query
//! embeddings are cached per exact input string in a bounded process-local
//! cache.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use tracing::{info, warn};

/// Fixed output dimensions per embedding family.
pub const TEXT_DIMENSION: usize = 768;
pub const IMAGE_DIMENSION: usize = 512;
pub const AUDIO_DIMENSION: usize = 512;

pub trait TextEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode(&self, text: &str) -> Vec<f32>;
}

pub trait ImageEmbedder: Send + Sync {
    fn dimension(&self) -> usize;
    fn encode_bytes(&self, image: &[u8]) -> Vec<f32>;
}

/// Deterministic text embedder: each token hashes to a basis coordinate,
/// the token multiset is accumulated and L2-normalized. Overlapping token
/// sets land close in cosine space, which is what the tests and dev
/// deployments need.
pub struct HashTextEmbedder {
    family: String,
    dimension: usize,
}

impl HashTextEmbedder {
    pub fn new(family: impl Into<String>, dimension: usize) -> Self {
        Self {
            family: family.into(),
            dimension,
        }
    }
}

fn token_coordinate(family: &str, token: &str, dimension: usize) -> usize {
    let mut hasher = blake3::Hasher::new();
    hasher.update(family.as_bytes());
    hasher.update(b"\x00");
    hasher.update(token.as_bytes());
    let digest = hasher.finalize();
    let bytes = digest.as_bytes();
    let raw = u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);
    (raw % dimension as u64) as usize
}

fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

impl TextEmbedder for HashTextEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            vector[token_coordinate(&self.family, &token, self.dimension)] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// Deterministic image embedder over raw bytes: fixed-size chunks hash to
/// coordinates the same way tokens do.
pub struct HashImageEmbedder {
    dimension: usize,
}

impl HashImageEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl ImageEmbedder for HashImageEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn encode_bytes(&self, image: &[u8]) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for chunk in image.chunks(64) {
            let digest = blake3::hash(chunk);
            let bytes = digest.as_bytes();
            let raw = u64::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]);
            vector[(raw % self.dimension as u64) as usize] += 1.0;
        }
        l2_normalize(&mut vector);
        vector
    }
}

/// Text embedder wrapper caching by exact input string.
pub struct CachedTextEmbedder {
    inner: Arc<dyn TextEmbedder>,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl CachedTextEmbedder {
    pub fn new(inner: Arc<dyn TextEmbedder>) -> Self {
        Self {
            inner,
            cache: Cache::builder()
                .max_capacity(256)
                .time_to_live(Duration::from_secs(300))
                .build(),
        }
    }

    pub fn encode(&self, text: &str) -> Arc<Vec<f32>> {
        if let Some(hit) = self.cache.get(text) {
            return hit;
        }
        let vector = Arc::new(self.inner.encode(text));
        self.cache.insert(text.to_string(), vector.clone());
        vector
    }

    pub fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}

/// The process-lifetime embedder singletons, one per family.
pub struct EmbedderSet {
    pub text: CachedTextEmbedder,
    pub image_text: CachedTextEmbedder,
    pub audio_text: CachedTextEmbedder,
    pub image: Arc<dyn ImageEmbedder>,
}

impl EmbedderSet {
    /// The deterministic stub set used unless real model backends are wired.
    pub fn deterministic() -> Self {
        Self {
            text: CachedTextEmbedder::new(Arc::new(HashTextEmbedder::new(
                "text",
                TEXT_DIMENSION,
            ))),
            image_text: CachedTextEmbedder::new(Arc::new(HashTextEmbedder::new(
                "image_text",
                IMAGE_DIMENSION,
            ))),
            audio_text: CachedTextEmbedder::new(Arc::new(HashTextEmbedder::new(
                "audio_text",
                AUDIO_DIMENSION,
            ))),
            image: Arc::new(HashImageEmbedder::new(IMAGE_DIMENSION)),
        }
    }

    /// Exercise each enabled family once so first queries do not pay the
    /// model spin-up. Failures are logged and swallowed.
    pub fn warm(&self, steps: &std::collections::BTreeSet<String>, warmup_text: &str) {
        let mut timings: Vec<(&'static str, f64)> = Vec::new();
        let mut timed = |label: &'static str, started: Instant| {
            timings.push((label, started.elapsed().as_secs_f64() * 1000.0));
        };
        if steps.contains("text") {
            let started = Instant::now();
            self.text.encode(warmup_text);
            timed("text_embed_ms", started);
        }
        if steps.contains("image_text") {
            let started = Instant::now();
            self.image_text.encode(warmup_text);
            timed("image_text_embed_ms", started);
        }
        if steps.contains("audio_text") {
            let started = Instant::now();
            self.audio_text.encode(warmup_text);
            timed("audio_text_embed_ms", started);
        }
        if steps.contains("image") {
            let started = Instant::now();
            self.image.encode_bytes(&[0u8; 16]);
            timed("image_embed_ms", started);
        }
        if timings.is_empty() {
            warn!("query model warmup ran with no enabled steps");
        } else {
            info!(?timings, "query model warmup completed");
        }
    }
}

/// Cosine distance between two same-dimension vectors.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 1.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_deterministic() {
        let embedder = HashTextEmbedder::new("text", TEXT_DIMENSION);
        assert_eq!(embedder.encode("hello world"), embedder.encode("hello world"));
    }

    #[test]
    fn overlapping_text_is_close_in_cosine_space() {
        let embedder = HashTextEmbedder::new("text", TEXT_DIMENSION);
        let query = embedder.encode("hello");
        let doc = embedder.encode("hello world");
        let unrelated = embedder.encode("entirely different terms");
        let close = cosine_distance(&query, &doc);
        let far = cosine_distance(&query, &unrelated);
        assert!(close < far);
        // One-of-two token overlap lands at 1/sqrt(2) similarity.
        assert!(1.0 - close >= 0.5);
    }

    #[test]
    fn families_produce_distinct_spaces() {
        let text = HashTextEmbedder::new("text", IMAGE_DIMENSION);
        let image_text = HashTextEmbedder::new("image_text", IMAGE_DIMENSION);
        assert_ne!(text.encode("hello"), image_text.encode("hello"));
    }

    #[test]
    fn vectors_are_normalized() {
        let embedder = HashTextEmbedder::new("text", TEXT_DIMENSION);
        let vector = embedder.encode("a few tokens here");
        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashTextEmbedder::new("text", 16);
        assert!(embedder.encode("").iter().all(|&v| v == 0.0));
    }

    #[test]
    fn cache_returns_same_allocation() {
        let cached = CachedTextEmbedder::new(Arc::new(HashTextEmbedder::new("text", 32)));
        let first = cached.encode("hello");
        let second = cached.encode("hello");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn cosine_distance_handles_degenerate_inputs() {
        assert_eq!(cosine_distance(&[], &[]), 1.0);
        assert_eq!(cosine_distance(&[1.0], &[1.0, 2.0]), 1.0);
        assert_eq!(cosine_distance(&[0.0, 0.0], &[1.0, 0.0]), 1.0);
    }
}
