//! Compiled-template cache.
//!
//! Every render compiles the slot-substituted template of one element. Elements of the same
//! definition with the same light-DOM content produce the same source, so compiled templates
//! are kept per definition keyed by the SHA-256 of that source.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::TemplateError;
use crate::template::{CompileFn, Render};

pub const DEFAULT_CAPACITY: usize = 64;

pub struct TemplateCache {
    entries: RefCell<IndexMap<String, Rc<dyn Render>>>,
    capacity: usize,
    hits: Cell<usize>,
}

impl fmt::Debug for TemplateCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemplateCache")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("hits", &self.hits.get())
            .finish()
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl TemplateCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
            capacity,
            hits: Cell::new(0),
        }
    }

    pub fn compute_hash(source: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(source.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn get(&self, source: &str) -> Option<Rc<dyn Render>> {
        let hash = Self::compute_hash(source);
        let found = self.entries.borrow().get(&hash).cloned();
        if found.is_some() {
            self.hits.set(self.hits.get() + 1);
        }
        found
    }

    pub fn set(&self, source: &str, template: Rc<dyn Render>) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.borrow_mut();
        while entries.len() >= self.capacity {
            // Oldest first
            entries.shift_remove_index(0);
        }
        entries.insert(Self::compute_hash(source), template);
    }

    /// Cached template for `source`, compiling and storing it on a miss.
    pub fn get_or_compile(&self, source: &str, compile: &CompileFn) -> Result<Rc<dyn Render>, TemplateError> {
        if let Some(template) = self.get(source) {
            return Ok(template);
        }
        trace!(len = source.len(), "template cache miss");
        let template = compile(source)?;
        self.set(source, template.clone());
        Ok(template)
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{default_compiler, TemplateSettings};

    #[test]
    fn test_hash_is_stable_hex() {
        let hash = TemplateCache::compute_hash("<p></p>");
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, TemplateCache::compute_hash("<p></p>"));
        assert_ne!(hash, TemplateCache::compute_hash("<p> </p>"));
    }

    #[test]
    fn test_second_lookup_hits() {
        let cache = TemplateCache::default();
        let compile = default_compiler(TemplateSettings::default());
        cache.get_or_compile("<%= a %>", &compile).unwrap();
        cache.get_or_compile("<%= a %>", &compile).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let cache = TemplateCache::new(2);
        let compile = default_compiler(TemplateSettings::default());
        for source in ["a", "b", "c"] {
            cache.get_or_compile(source, &compile).unwrap();
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_compile_errors_are_not_cached() {
        let cache = TemplateCache::default();
        let compile = default_compiler(TemplateSettings::default());
        assert!(cache.get_or_compile("<% if ( %>", &compile).is_err());
        assert!(cache.is_empty());
    }
}
