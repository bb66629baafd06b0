//! CouchDB-style revision tokens: `<generation>-<digest>`.

use sha2::{Digest, Sha256};

/// Revision following `previous` for a document whose new body is `body`.
///
/// The generation is incremented; the digest covers the body so that two
/// writers producing different bodies from the same parent never collide.
pub fn next_revision(previous: Option<&str>, body: &[u8]) -> String {
    let generation = previous
        .and_then(|rev| rev.split_once('-'))
        .and_then(|(generation, _)| generation.parse::<u64>().ok())
        .unwrap_or(0);
    let digest = hex::encode(Sha256::digest(body));
    format!("{}-{}", generation + 1, &digest[..32])
}
