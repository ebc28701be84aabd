//! Test collection persistence, keyed by owner.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};

use super::ActiveTest;
use crate::config::Config;

pub trait TestStore: Send + Sync {
    /// Saved tests of `owner`; an unknown owner has none.
    fn load(&self, owner: &str) -> Result<Vec<ActiveTest>>;
    fn save(&self, owner: &str, tests: &[ActiveTest]) -> Result<()>;
}

/// One JSON file per owner under a directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    storage_path: PathBuf,
}

impl JsonFileStore {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.test_store_path())
    }

    fn file_path(&self, owner: &str) -> PathBuf {
        // Owner ids come from the command line; keep them to one path component.
        let name: String = owner
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.storage_path.join(format!("{}.json", name))
    }
}

impl TestStore for JsonFileStore {
    fn load(&self, owner: &str) -> Result<Vec<ActiveTest>> {
        let p = self.file_path(owner);
        if !p.exists() {
            return Ok(Vec::new());
        }
        let text = fs::read_to_string(&p).with_context(|| format!("reading {}", p.display()))?;
        let tests = serde_json::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        Ok(tests)
    }

    fn save(&self, owner: &str, tests: &[ActiveTest]) -> Result<()> {
        fs::create_dir_all(&self.storage_path)?;
        let p = self.file_path(owner);
        let tmp = p.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(tests)?)?;
        fs::rename(&tmp, &p).with_context(|| format!("writing {}", p.display()))?;
        Ok(())
    }
}

/// Volatile store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<HashMap<String, Vec<ActiveTest>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TestStore for MemoryStore {
    fn load(&self, owner: &str) -> Result<Vec<ActiveTest>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner.get(owner).cloned().unwrap_or_default())
    }

    fn save(&self, owner: &str, tests: &[ActiveTest]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.insert(owner.to_string(), tests.to_vec());
        Ok(())
    }
}

impl<T: TestStore + ?Sized> TestStore for std::sync::Arc<T> {
    fn load(&self, owner: &str) -> Result<Vec<ActiveTest>> {
        (**self).load(owner)
    }

    fn save(&self, owner: &str, tests: &[ActiveTest]) -> Result<()> {
        (**self).save(owner, tests)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::TestStatus;

    fn sample(name: &str) -> ActiveTest {
        ActiveTest::new(name.into(), Some(name.into()), format!("def {}():\n    pass\n", name))
    }

    #[test]
    fn file_store_round_trips_per_owner() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("tests"));
        assert!(store.load("alice").unwrap().is_empty());

        let mut t = sample("test_a");
        t.status = TestStatus::Passed;
        store.save("alice", &[t.clone()]).unwrap();
        store.save("bob", &[sample("test_b")]).unwrap();

        let loaded = store.load("alice").unwrap();
        assert_eq!(loaded, vec![t]);
        assert_eq!(store.load("bob").unwrap()[0].display_name, "test_b");
    }

    #[test]
    fn owner_ids_cannot_escape_the_store_directory() {
        let store = JsonFileStore::new("/store");
        assert_eq!(store.file_path("../etc/x"), PathBuf::from("/store/___etc_x.json"));
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("carol.json"), "{not json").unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.load("carol").is_err());
    }

    #[test]
    fn memory_store_keeps_owners_apart() {
        let store = MemoryStore::new();
        store.save("a", &[sample("test_a")]).unwrap();
        assert_eq!(store.load("a").unwrap().len(), 1);
        assert!(store.load("b").unwrap().is_empty());
    }
}
