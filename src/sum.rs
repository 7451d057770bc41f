//! File checksums for `nuggit sum`.

use anyhow::{Context, Result};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksums {
    pub crc32c: String,
    pub sha1: String,
    pub sha256: String,
}

impl Checksums {
    pub fn of(bytes: &[u8]) -> Self {
        Self {
            crc32c: format!("{:08x}", crc32c::crc32c(bytes)),
            sha1: hex::encode(Sha1::digest(bytes)),
            sha256: hex::encode(Sha256::digest(bytes)),
        }
    }

    /// Whether any checksum equals `expected`, ignoring case.
    pub fn matches(&self, expected: &str) -> bool {
        let expected = expected.trim();
        [&self.crc32c, &self.sha1, &self.sha256]
            .iter()
            .any(|s| s.eq_ignore_ascii_case(expected))
    }
}

pub fn sum_file(path: &Path) -> Result<Checksums> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read file: {}", path.display()))?;
    Ok(Checksums::of(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_values() {
        let sums = Checksums::of(b"");
        assert_eq!(sums.crc32c, "00000000");
        assert_eq!(sums.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(
            sums.sha256,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );

        let sums = Checksums::of(b"123456789");
        assert_eq!(sums.crc32c, "e3069283");
    }

    #[test]
    fn test_matches() {
        let sums = Checksums::of(b"123456789");
        assert!(sums.matches("E3069283"));
        assert!(sums.matches(&sums.sha256.clone()));
        assert!(!sums.matches("deadbeef"));
    }
}
