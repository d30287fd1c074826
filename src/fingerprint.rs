//! Content fingerprints: xxh3-64 over document text or file bytes.
//! Cache freshness is defined as fingerprint equality, nothing else.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

/// Stable fingerprint of a resource's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Fingerprint in-memory document text (editor overlay path).
    pub fn of_text(text: &str) -> Self {
        Fingerprint(xxh3_64(text.as_bytes()))
    }

    /// Fingerprint a file on disk without loading it whole.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = fs::File::open(path)
            .with_context(|| format!("Failed to open {} for fingerprinting", path.display()))?;
        let mut hasher = Xxh3::new();
        let mut buf = [0u8; 8192];

        loop {
            let n = file
                .read(&mut buf)
                .with_context(|| format!("Failed to read {} while fingerprinting", path.display()))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(Fingerprint(hasher.digest()))
    }

    /// Parse the 16-hex form produced by `Display` (persisted cache rows).
    pub fn parse(s: &str) -> Option<Self> {
        u64::from_str_radix(s, 16).ok().map(Fingerprint)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn text_fingerprint_is_deterministic() {
        assert_eq!(Fingerprint::of_text("X=1"), Fingerprint::of_text("X=1"));
        assert_ne!(Fingerprint::of_text("X=1"), Fingerprint::of_text("X=2"));
    }

    #[test]
    fn file_and_text_fingerprints_agree() -> Result<()> {
        let mut f = NamedTempFile::new()?;
        f.write_all(b"def main():\n    pass\n")?;
        f.flush()?;
        assert_eq!(
            Fingerprint::of_file(f.path())?,
            Fingerprint::of_text("def main():\n    pass\n")
        );
        Ok(())
    }

    #[test]
    fn display_roundtrips_through_parse() {
        let fp = Fingerprint::of_text("anything");
        let rendered = fp.to_string();
        assert_eq!(rendered.len(), 16);
        assert_eq!(Fingerprint::parse(&rendered), Some(fp));
    }
}
