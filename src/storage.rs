// Copyright 2026 Muvon Un Limited
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "korektor";

/// Per-user data directory: `$XDG_DATA_HOME/korektor` or
/// `~/.local/share/korektor` on Unix and macOS, `%APPDATA%/korektor` on
/// Windows. Created on first use.
pub fn get_system_storage_dir() -> Result<PathBuf> {
    let xdg_data_home = std::env::var_os("XDG_DATA_HOME")
        .filter(|_| cfg!(not(any(target_os = "macos", target_os = "windows"))))
        .map(PathBuf::from);

    let data_root = match xdg_data_home {
        Some(dir) => dir,
        None if cfg!(target_os = "windows") => {
            dirs::data_dir().context("Unable to determine data directory")?
        }
        None => dirs::home_dir()
            .context("Unable to determine home directory")?
            .join(".local")
            .join("share"),
    };

    let base_dir = data_root.join(APP_DIR);
    fs::create_dir_all(&base_dir)
        .with_context(|| format!("Failed to create {}", base_dir.display()))?;

    Ok(base_dir)
}

/// Stable identifier for a corpus, derived from the absolute path of its
/// document directory. Two checkouts of the same corpus in different places
/// get separate caches.
pub fn get_corpus_identifier(corpus_path: &Path) -> Result<String> {
    let absolute_path = corpus_path.canonicalize().or_else(|_| {
        if corpus_path.is_absolute() {
            Ok(corpus_path.to_path_buf())
        } else {
            std::env::current_dir().map(|cwd| cwd.join(corpus_path))
        }
    })?;

    let digest = Sha256::digest(absolute_path.to_string_lossy().as_bytes());
    Ok(hex::encode(digest)[..16].to_string())
}

/// `<storage>/knowledge/<corpus id>`
pub fn get_corpus_cache_path(corpus_path: &Path) -> Result<PathBuf> {
    let system_dir = get_system_storage_dir()?;
    let corpus_id = get_corpus_identifier(corpus_path)?;

    Ok(system_dir.join("knowledge").join(corpus_id))
}

/// Directory for rotated JSON log files
pub fn get_logs_dir() -> Result<PathBuf> {
    Ok(get_system_storage_dir()?.join("logs"))
}

/// `config.toml` inside the storage directory
pub fn get_system_config_path() -> Result<PathBuf> {
    let system_dir = get_system_storage_dir()?;
    Ok(system_dir.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corpus_identifier_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let first = get_corpus_identifier(dir.path()).unwrap();
        let second = get_corpus_identifier(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
    }

    #[test]
    fn test_different_corpora_get_different_identifiers() {
        let a = tempfile::tempdir().unwrap();
        let b = tempfile::tempdir().unwrap();
        assert_ne!(
            get_corpus_identifier(a.path()).unwrap(),
            get_corpus_identifier(b.path()).unwrap()
        );
    }
}
