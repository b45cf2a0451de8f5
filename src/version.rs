//! Version identifiers and the base behavior shared by every versioned
//! object in the store.

use std::fmt;

use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[cfg(any(test, feature = "test-utils"))]
use proptest::prelude::*;

/// An opaque, globally unique identifier for a single version of a shared
/// object. Generated with >=128 bits of entropy; equality and hashing are
/// defined over its bytes.
#[derive(
    Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize,
)]
#[cfg_attr(any(test, feature = "test-utils"), derive(proptest_derive::Arbitrary))]
pub struct VersionId([u8; 16]);

impl VersionId {
    /// Generates a fresh, random [`VersionId`] using the OS CSPRNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl fmt::Debug for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VersionId(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Base behavior for every versioned entity stored in a
/// [`VersionedObjectStore`](crate::store::VersionedObjectStore).
///
/// `actually_live` implies `potentially_live`; the store itself enforces
/// this at the point where flags are flipped (see
/// [`store::ObjectEntry`](crate::store::ObjectEntry)) rather than relying on
/// implementors to maintain it.
pub trait SharedObject {
    /// This version's identifier. Immutable after creation.
    fn version(&self) -> VersionId;

    /// The versions this one logically extends: empty for a root creation,
    /// length 1 for an update.
    fn previous_versions(&self) -> &[VersionId];

    /// Copies this object's fields into a new version with a fresh
    /// [`VersionId`] and `previous_versions = [self.version()]`.
    ///
    /// Deliberately explicit rather than a generic `Clone::clone` per the
    /// "deep copy for new versions" design note: callers must always go
    /// through this constructor when deriving an update, never a bare
    /// struct copy, so that `previous_versions` bookkeeping can't be
    /// forgotten.
    fn new_version(&self) -> Self
    where
        Self: Sized;
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn generate_is_not_all_zero_with_overwhelming_probability() {
        let v = VersionId::generate();
        assert_ne!(v.as_bytes(), &[0u8; 16]);
    }

    #[test]
    fn generate_produces_distinct_ids() {
        let a = VersionId::generate();
        let b = VersionId::generate();
        assert_ne!(a, b);
    }
}
