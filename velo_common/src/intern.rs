//! The process-wide string pool
//!
//! Identifiers, literals, and member names are interned once and referenced
//! everywhere else by a 32-bit [`StringId`]. The pool is append-only: entries
//! are never removed, and the text behind an id is immutable after insertion.

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, OnceLock};

/// Index into the string pool. Equal ids always refer to byte-equal text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StringId(pub u32);

impl StringId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for StringId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

#[derive(Default)]
struct PoolInner {
    map: HashMap<Box<str>, StringId>,
    entries: Vec<Box<str>>,
}

/// Grow-only mapping from byte content to [`StringId`].
///
/// Inserts are serialized under a lock; lookups of already-interned ids go
/// through the same lock but return owned text so no guard escapes. Interned
/// text is read-only after insertion.
pub struct StringPool {
    inner: Mutex<PoolInner>,
}

impl StringPool {
    pub fn new() -> Self {
        Self { inner: Mutex::new(PoolInner::default()) }
    }

    /// Intern `text`, returning the id of the existing entry when the exact
    /// bytes were seen before.
    pub fn intern(&self, text: &str) -> StringId {
        let mut inner = self.inner.lock().expect("string pool lock poisoned");
        if let Some(&id) = inner.map.get(text) {
            return id;
        }
        let id = StringId(inner.entries.len() as u32);
        let boxed: Box<str> = text.into();
        inner.entries.push(boxed.clone());
        inner.map.insert(boxed, id);
        id
    }

    /// The text behind an id. Panics on an id that was never handed out by
    /// this pool; ids are only valid against the pool that produced them.
    pub fn resolve(&self, id: StringId) -> String {
        let inner = self.inner.lock().expect("string pool lock poisoned");
        inner.entries[id.index()].to_string()
    }

    /// Look up an id without interning.
    pub fn get(&self, text: &str) -> Option<StringId> {
        let inner = self.inner.lock().expect("string pool lock poisoned");
        inner.map.get(text).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("string pool lock poisoned").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StringPool {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_POOL: OnceLock<StringPool> = OnceLock::new();

/// The process-local pool shared by every compilation and VM in this process.
pub fn global_pool() -> &'static StringPool {
    GLOBAL_POOL.get_or_init(StringPool::new)
}

/// Intern into the global pool.
pub fn intern(text: &str) -> StringId {
    global_pool().intern(text)
}

/// Resolve against the global pool.
pub fn resolve(id: StringId) -> String {
    global_pool().resolve(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_intern_dedup() {
        let pool = StringPool::new();
        let a = pool.intern("count");
        let b = pool.intern("count");
        let c = pool.intern("Count");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(pool.resolve(a), "count");
        assert_eq!(pool.resolve(c), "Count");
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_get_does_not_insert() {
        let pool = StringPool::new();
        assert_eq!(pool.get("missing"), None);
        let id = pool.intern("present");
        assert_eq!(pool.get("present"), Some(id));
        assert_eq!(pool.len(), 1);
    }

    proptest! {
        // Two ids are equal iff the interned byte slices are byte-equal.
        #[test]
        fn prop_pool_uniqueness(inputs in proptest::collection::vec(".{0,16}", 1..40)) {
            let pool = StringPool::new();
            let ids: Vec<_> = inputs.iter().map(|s| pool.intern(s)).collect();
            for (i, a) in inputs.iter().enumerate() {
                for (j, b) in inputs.iter().enumerate() {
                    prop_assert_eq!(ids[i] == ids[j], a == b);
                }
            }
            for (i, s) in inputs.iter().enumerate() {
                prop_assert_eq!(&pool.resolve(ids[i]), s);
            }
        }
    }
}
