//! Deterministic bag-of-words embedding for pattern retrieval.
//!
//! The vector index is a cosine-similarity cache, not a vector database
//! (`testgen_core::state::vector_index`), so the embedding only needs to be
//! stable and cheap, not learned. Each lowercased word hashes into one of
//! `DIMENSIONS` buckets; the resulting vector is L2-normalized so cosine
//! similarity behaves as a sane bag-of-words distance.

const DIMENSIONS: usize = 64;

pub fn embed(text: &str) -> Vec<f32> {
    let mut vec = vec![0.0f32; DIMENSIONS];
    for word in text.split_whitespace() {
        let word = word.to_lowercase();
        let bucket = (blake3::hash(word.as_bytes()).as_bytes()[0] as usize) % DIMENSIONS;
        vec[bucket] += 1.0;
    }
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in &mut vec {
            *v /= norm;
        }
    }
    vec
}
