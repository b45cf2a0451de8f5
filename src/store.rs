//! The authoritative, version-addressed object store.

use std::collections::HashMap;
use std::collections::hash_map::{Iter, Values};

use crate::version::{SharedObject, VersionId};

/// A single entry in the store: an object plus its two liveness flags.
///
/// Invariant: `actually_live ⇒ potentially_live`. Enforced by construction —
/// [`ObjectEntry::set_actually_live`] also sets `potentially_live` when
/// setting to `true`, and there is no way to construct an entry with
/// `actually_live && !potentially_live`.
#[derive(Clone, Debug)]
pub struct ObjectEntry<T> {
    object: T,
    potentially_live: bool,
    actually_live: bool,
}

impl<T: SharedObject> ObjectEntry<T> {
    fn new(object: T) -> Self {
        Self {
            object,
            potentially_live: false,
            actually_live: false,
        }
    }

    pub fn object(&self) -> &T {
        &self.object
    }

    pub fn potentially_live(&self) -> bool {
        self.potentially_live
    }

    pub fn actually_live(&self) -> bool {
        self.actually_live
    }

    pub fn set_potentially_live(&mut self, value: bool) {
        self.potentially_live = value;
        if !value {
            self.actually_live = false;
        }
    }

    pub fn set_actually_live(&mut self, value: bool) {
        self.actually_live = value;
        if value {
            self.potentially_live = true;
        }
    }
}

/// Maps [`VersionId`]s to the shared objects they identify, tracking the
/// `potentially_live` / `actually_live` flags described in the data model.
///
/// The store is the authoritative state for a channel: it must be
/// persistable (see [`crate::persist::ChannelPersister`]) such that after a
/// crash and reload, the executor observes the same set of live versions and
/// flags as before the crash, including any half-applied command whose
/// outcome had not yet been recorded.
#[derive(Clone, Debug, Default)]
pub struct VersionedObjectStore<T> {
    entries: HashMap<VersionId, ObjectEntry<T>>,
}

impl<T: SharedObject> VersionedObjectStore<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Inserts a freshly-created object, not yet live in either sense. The
    /// caller is expected to flip flags via [`Self::entry_mut`] immediately
    /// after, matching the executor's "insert then mark potentially_live"
    /// sequencing.
    pub fn insert(&mut self, object: T) {
        let version = object.version();
        self.entries.insert(version, ObjectEntry::new(object));
    }

    pub fn get(&self, version: &VersionId) -> Option<&T> {
        self.entries.get(version).map(ObjectEntry::object)
    }

    pub fn entry(&self, version: &VersionId) -> Option<&ObjectEntry<T>> {
        self.entries.get(version)
    }

    pub fn entry_mut(
        &mut self,
        version: &VersionId,
    ) -> Option<&mut ObjectEntry<T>> {
        self.entries.get_mut(version)
    }

    pub fn contains(&self, version: &VersionId) -> bool {
        self.entries.contains_key(version)
    }

    /// Removes a version from the store. A version is destroyed from the
    /// store when the command consuming it is confirmed successful.
    pub fn remove(&mut self, version: &VersionId) -> Option<T> {
        self.entries.remove(version).map(|entry| entry.object)
    }

    pub fn is_potentially_live(&self, version: &VersionId) -> bool {
        self.entries
            .get(version)
            .is_some_and(ObjectEntry::potentially_live)
    }

    pub fn is_actually_live(&self, version: &VersionId) -> bool {
        self.entries
            .get(version)
            .is_some_and(ObjectEntry::actually_live)
    }

    pub fn iter(&self) -> Iter<'_, VersionId, ObjectEntry<T>> {
        self.entries.iter()
    }

    pub fn values(&self) -> Values<'_, VersionId, ObjectEntry<T>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with `potentially_live == true`. Test helper
    /// mirroring the source's `count_potentially_live`.
    pub fn count_potentially_live(&self) -> usize {
        self.entries.values().filter(|e| e.potentially_live).count()
    }

    /// Number of entries with `actually_live == true`. Test helper mirroring
    /// the source's `count_actually_live`.
    pub fn count_actually_live(&self) -> usize {
        self.entries.values().filter(|e| e.actually_live).count()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Dummy {
        version: VersionId,
        previous: Vec<VersionId>,
    }

    impl SharedObject for Dummy {
        fn version(&self) -> VersionId {
            self.version
        }
        fn previous_versions(&self) -> &[VersionId] {
            &self.previous
        }
        fn new_version(&self) -> Self {
            Self {
                version: VersionId::generate(),
                previous: vec![self.version],
            }
        }
    }

    #[test]
    fn actually_live_implies_potentially_live() {
        let v = VersionId::generate();
        let mut store = VersionedObjectStore::new();
        store.insert(Dummy {
            version: v,
            previous: vec![],
        });

        let entry = store.entry_mut(&v).unwrap();
        entry.set_actually_live(true);
        assert!(entry.potentially_live());
        assert!(entry.actually_live());

        entry.set_potentially_live(false);
        assert!(!entry.actually_live());
    }

    #[test]
    fn remove_destroys_the_version() {
        let v = VersionId::generate();
        let mut store: VersionedObjectStore<Dummy> = VersionedObjectStore::new();
        store.insert(Dummy {
            version: v,
            previous: vec![],
        });
        assert!(store.contains(&v));
        store.remove(&v);
        assert!(!store.contains(&v));
    }
}
