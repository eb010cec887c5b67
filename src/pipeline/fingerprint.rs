use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// SHA-256 (hex) of the canonical JSON encoding of `value`.
///
/// Layers are stored in a fixed order, so an unchanged raw snapshot always
/// produces the same fingerprint.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_value_same_fingerprint() {
        let a = fingerprint(&vec![1.5_f64, 2.0]).unwrap();
        let b = fingerprint(&vec![1.5_f64, 2.0]).unwrap();
        let c = fingerprint(&vec![2.0_f64, 1.5]).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }
}
