//! Resource manager for expensive, reusable inputs
//!
//! Loading a code directory means opening a large workbook and indexing it;
//! external extractors may hold process handles or connections. The
//! [`ResourceManager`] memoizes both explicitly, keyed by their identity, so
//! a long-lived caller (a server, a batch driver) can reuse them across runs
//! and drop them when the underlying file changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::codes::CodeResolver;
use crate::error::{MockupError, Result};
use crate::parser::ai::AiExtractor;

type ResolverKey = (PathBuf, i32);

/// A loaded code directory and the paths it was requested through
struct CachedResolver {
    resolver: Arc<CodeResolver>,
    /// Absolute, non-canonical request paths; they stay comparable after the file is gone
    aliases: Vec<PathBuf>,
}

impl CachedResolver {
    fn new(resolver: Arc<CodeResolver>, alias: PathBuf) -> Self {
        Self {
            resolver,
            aliases: vec![alias],
        }
    }

    fn add_alias(&mut self, alias: PathBuf) {
        if !self.aliases.contains(&alias) {
            self.aliases.push(alias);
        }
    }
}

/// Owner of memoized code directories and extractors
pub struct ResourceManager {
    /// Loaded code directories per (path, measurement year)
    resolvers: RwLock<HashMap<ResolverKey, CachedResolver>>,

    /// Extractors by name
    extractors: RwLock<HashMap<String, Arc<dyn AiExtractor>>>,

    /// Cache size limit for code directories
    max_cache_entries: usize,
}

impl Default for ResourceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceManager {
    /// Create an empty resource manager
    #[must_use]
    pub fn new() -> Self {
        Self {
            resolvers: RwLock::new(HashMap::new()),
            extractors: RwLock::new(HashMap::new()),
            max_cache_entries: 8,
        }
    }

    /// Set how many code directories are kept
    #[must_use]
    pub const fn with_max_cache_entries(mut self, max: usize) -> Self {
        self.max_cache_entries = max;
        self
    }

    fn absolute(path: &Path) -> PathBuf {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn key(path: &Path, year: i32) -> ResolverKey {
        let path = path.canonicalize().unwrap_or_else(|_| Self::absolute(path));
        (path, year)
    }

    /// Get the code directory at `path` for `year`, loading it on first use
    pub fn acquire(&self, path: &Path, year: i32) -> Result<Arc<CodeResolver>> {
        let key = Self::key(path, year);
        let alias = Self::absolute(path);

        {
            let cache = self.resolvers.read().map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire read lock on resolver cache".to_string())
            })?;

            if let Some(cached) = cache.get(&key).filter(|c| c.aliases.contains(&alias)) {
                log::debug!("Reusing code directory {} for MY {year}", path.display());
                return Ok(Arc::clone(&cached.resolver));
            }
        }

        {
            let mut cache = self.resolvers.write().map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire write lock on resolver cache".to_string())
            })?;

            if let Some(cached) = cache.get_mut(&key) {
                log::debug!("Reusing code directory {} for MY {year}", path.display());
                cached.add_alias(alias);
                return Ok(Arc::clone(&cached.resolver));
            }
        }

        // Load outside the lock; a concurrent loader of the same key just wins the insert
        let resolver = Arc::new(CodeResolver::load(path, year)?);

        let mut cache = self.resolvers.write().map_err(|_| {
            MockupError::InvalidOperation("Failed to acquire write lock on resolver cache".to_string())
        })?;

        if cache.len() >= self.max_cache_entries && !cache.contains_key(&key) {
            Self::evict(&mut cache);
        }

        let entry = cache
            .entry(key)
            .or_insert_with(|| CachedResolver::new(resolver, alias.clone()));
        entry.add_alias(alias);
        Ok(Arc::clone(&entry.resolver))
    }

    /// Register an already built resolver under a path
    pub fn insert(&self, path: &Path, resolver: CodeResolver) -> Result<Arc<CodeResolver>> {
        let key = Self::key(path, resolver.year());
        let resolver = Arc::new(resolver);
        self.resolvers
            .write()
            .map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire write lock on resolver cache".to_string())
            })?
            .insert(key, CachedResolver::new(Arc::clone(&resolver), Self::absolute(path)));
        Ok(resolver)
    }

    /// Drop every cached directory loaded from `path`, for all years
    ///
    /// Works after the file has been moved or deleted, as long as `path` is
    /// one the directory was requested through.
    pub fn invalidate(&self, path: &Path) -> Result<usize> {
        let target = Self::key(path, 0).0;
        let alias = Self::absolute(path);
        let mut cache = self.resolvers.write().map_err(|_| {
            MockupError::InvalidOperation("Failed to acquire write lock on resolver cache".to_string())
        })?;

        let before = cache.len();
        cache.retain(|(cached, _), entry| *cached != target && !entry.aliases.contains(&alias));
        let removed = before - cache.len();
        drop(cache);

        if removed > 0 {
            log::info!("Invalidated {removed} cached code directory entries for {}", path.display());
        }
        Ok(removed)
    }

    /// Drop every cached resource
    pub fn clear(&self) -> Result<()> {
        self.resolvers
            .write()
            .map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire write lock on resolver cache".to_string())
            })?
            .clear();
        self.extractors
            .write()
            .map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire write lock on extractor cache".to_string())
            })?
            .clear();
        Ok(())
    }

    /// Number of cached code directories
    #[must_use]
    pub fn cached_resolvers(&self) -> usize {
        self.resolvers.read().map_or(0, |cache| cache.len())
    }

    /// Get a named extractor, creating it with `factory` on first use
    pub fn acquire_extractor<F>(&self, name: &str, factory: F) -> Result<Arc<dyn AiExtractor>>
    where
        F: FnOnce() -> Result<Arc<dyn AiExtractor>>,
    {
        {
            let cache = self.extractors.read().map_err(|_| {
                MockupError::InvalidOperation("Failed to acquire read lock on extractor cache".to_string())
            })?;
            if let Some(extractor) = cache.get(name) {
                return Ok(Arc::clone(extractor));
            }
        }

        let extractor = factory()?;
        let mut cache = self.extractors.write().map_err(|_| {
            MockupError::InvalidOperation("Failed to acquire write lock on extractor cache".to_string())
        })?;
        let entry = cache.entry(name.to_string()).or_insert(extractor);
        Ok(Arc::clone(entry))
    }

    /// Evict an arbitrary cached directory to stay under the size limit
    fn evict(cache: &mut HashMap<ResolverKey, CachedResolver>) {
        if let Some(key) = cache.keys().next().cloned() {
            log::debug!("Evicting cached code directory {}", key.0.display());
            cache.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ai::{AiExtraction, AiRequest};

    const DIRECTORY: &str = "Value Set Name,Code,Code System\nPSA Lab Test,84153,CPT\n";

    struct FixedExtractor;

    impl AiExtractor for FixedExtractor {
        fn extract(&self, _request: &AiRequest) -> Result<AiExtraction> {
            Ok(AiExtraction::default())
        }
    }

    #[test]
    fn test_resolver_is_loaded_once_per_year() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vsd.csv");
        std::fs::write(&path, DIRECTORY).unwrap();

        let manager = ResourceManager::new();
        let first = manager.acquire(&path, 2026).unwrap();
        let second = manager.acquire(&path, 2026).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other_year = manager.acquire(&path, 2025).unwrap();
        assert!(!Arc::ptr_eq(&first, &other_year));
        assert_eq!(manager.cached_resolvers(), 2);

        assert_eq!(manager.invalidate(&path).unwrap(), 2);
        let reloaded = manager.acquire(&path, 2026).unwrap();
        assert!(!Arc::ptr_eq(&first, &reloaded));
    }

    #[test]
    fn test_invalidate_after_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let path = dir.path().join("vsd.csv");
        std::fs::write(&path, DIRECTORY).unwrap();

        let manager = ResourceManager::new();
        let indirect = dir.path().join("sub").join("..").join("vsd.csv");
        manager.acquire(&indirect, 2026).unwrap();
        manager.acquire(&path, 2026).unwrap();
        assert_eq!(manager.cached_resolvers(), 1);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(manager.invalidate(&indirect).unwrap(), 1);
        assert_eq!(manager.cached_resolvers(), 0);
    }

    #[test]
    fn test_missing_directory_is_fatal() {
        let manager = ResourceManager::new();
        let err = manager.acquire(Path::new("/no/such/vsd.xlsx"), 2026).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(manager.cached_resolvers(), 0);
    }

    #[test]
    fn test_extractor_factory_runs_once() {
        let manager = ResourceManager::new();
        let mut calls = 0;
        for _ in 0..3 {
            manager
                .acquire_extractor("fixed", || {
                    calls += 1;
                    Ok(Arc::new(FixedExtractor) as Arc<dyn AiExtractor>)
                })
                .unwrap();
        }
        assert_eq!(calls, 1);
        manager.clear().unwrap();
        assert_eq!(manager.cached_resolvers(), 0);
    }
}
