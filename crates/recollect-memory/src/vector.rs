use recollect_core::{RecollectError, RecollectResult};

/// Width of one encoded vector component in bytes.
pub const BYTES_PER_COMPONENT: usize = 4;

/// Encode a vector as concatenated little-endian `f32`s.
///
/// The output is always `4 * vector.len()` bytes and decodes back to the
/// same bit patterns, NaN payloads included.
pub fn encode(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * BYTES_PER_COMPONENT);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode bytes produced by [`encode`].
pub fn decode(bytes: &[u8]) -> RecollectResult<Vec<f32>> {
    if bytes.len() % BYTES_PER_COMPONENT != 0 {
        return Err(RecollectError::Validation(format!(
            "encoded vector length {} is not a multiple of {BYTES_PER_COMPONENT}",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(BYTES_PER_COMPONENT)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Cosine similarity between two vectors of equal length.
///
/// Returns `0.0` when either vector has zero magnitude. Callers must make sure
/// both vectors come from the same model; lengths are only checked in debug
/// builds.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "cosine similarity of mismatched vectors");
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}
