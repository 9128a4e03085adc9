//! Module `digest` computes the order-independent manifest digest.

use sha2::{Digest, Sha256};

use crate::resource::{Resource, cmp_forward};

/// Manifest_digest reports a SHA256 over the rendered resource set,
/// formatted as `sha256:<hex>`.
///
/// The digest is independent of input ordering: resources are sorted by the
/// 5-key total order, canonically serialized (JSON with deterministic map-key
/// order), and concatenated with a newline delimiter before hashing.
pub fn manifest_digest(resources: &[Resource]) -> String {
    let mut sorted: Vec<&Resource> = resources.iter().collect();
    sorted.sort_by(|a, b| cmp_forward(a, b));

    let mut hash = Sha256::new();
    for (i, r) in sorted.iter().enumerate() {
        if i > 0 {
            hash.update(b"\n");
        }
        // Map keys are BTreeMap-backed, so serialization is already
        // canonical.
        let doc = serde_json::to_vec(r).expect("resources are valid JSON trees");
        hash.update(&doc);
    }
    format!("sha256:{}", hex::encode(hash.finalize()))
}
