//! Cheap change detection for corpus sources.
//!
//! Files are identified by size and modification time, everything else by a
//! SHA-256 of its defining content. Web pages are tracked by their URL only;
//! their remote content is not re-fetched to detect changes.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Fingerprint {
    File { size: u64, modified_nanos: u64 },
    Content { sha256: String },
    /// Source listed but unreadable at scan time
    Missing,
}

impl Fingerprint {
    pub fn of_file(path: &Path) -> Self {
        let Ok(meta) = std::fs::metadata(path) else {
            return Fingerprint::Missing;
        };
        let modified_nanos = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        Fingerprint::File {
            size: meta.len(),
            modified_nanos,
        }
    }

    pub fn of_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Fingerprint::Content {
            sha256: hex::encode(hasher.finalize()),
        }
    }
}

/// Fingerprints of every discoverable source, keyed by `kind:identity`
pub type CorpusFingerprint = BTreeMap<String, Fingerprint>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FingerprintDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
}

impl FingerprintDiff {
    pub fn between(recorded: &CorpusFingerprint, current: &CorpusFingerprint) -> Self {
        let mut diff = Self::default();
        for (key, fingerprint) in current {
            match recorded.get(key) {
                None => diff.added.push(key.clone()),
                Some(old) if old != fingerprint => diff.changed.push(key.clone()),
                Some(_) => {}
            }
        }
        diff.removed = recorded
            .keys()
            .filter(|key| !current.contains_key(*key))
            .cloned()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn test_file_fingerprint_tracks_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();

        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000))
            .unwrap();
        let before = Fingerprint::of_file(&path);

        file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_100))
            .unwrap();
        let after = Fingerprint::of_file(&path);

        assert_ne!(before, after);
        assert_eq!(after, Fingerprint::of_file(&path));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Fingerprint::of_file(&dir.path().join("nope")), Fingerprint::Missing);
    }

    #[test]
    fn test_diff_reports_added_removed_changed() {
        let recorded: CorpusFingerprint = [
            ("pdf:a.pdf".to_string(), Fingerprint::of_content("a")),
            ("pdf:b.pdf".to_string(), Fingerprint::of_content("b")),
        ]
        .into_iter()
        .collect();
        let current: CorpusFingerprint = [
            ("pdf:a.pdf".to_string(), Fingerprint::of_content("a2")),
            ("url:https://x".to_string(), Fingerprint::of_content("x")),
        ]
        .into_iter()
        .collect();

        let diff = FingerprintDiff::between(&recorded, &current);
        assert_eq!(diff.changed, vec!["pdf:a.pdf"]);
        assert_eq!(diff.added, vec!["url:https://x"]);
        assert_eq!(diff.removed, vec!["pdf:b.pdf"]);
        assert_eq!(diff.total(), 3);
        assert!(FingerprintDiff::between(&current, &current).is_empty());
    }
}
