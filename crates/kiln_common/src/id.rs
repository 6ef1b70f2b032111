//! Logical asset identifiers.

use std::fmt;

use crate::hash::AssetHash;

/// An ordered list of string initializers naming a logical asset.
///
/// The first initializer is conventionally the source filename; the rest are
/// sub-parameters. Identifiers only live for the duration of a lookup: the
/// caches key everything by [`AssetId::hash`].
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct AssetId {
    initializers: Vec<String>,
}

impl AssetId {
    /// Creates an identifier from its initializers.
    pub fn new<I, S>(initializers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            initializers: initializers.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns the initializers in order.
    pub fn initializers(&self) -> &[String] {
        &self.initializers
    }

    /// Returns the initializers as string slices, in order.
    pub fn as_strs(&self) -> Vec<&str> {
        self.initializers.iter().map(String::as_str).collect()
    }

    /// Returns `true` if there are no initializers.
    pub fn is_empty(&self) -> bool {
        self.initializers.is_empty()
    }

    /// Computes the lookup hash.
    ///
    /// The first initializer is hashed directly; each following initializer is
    /// hashed and folded in with [`AssetHash::combine_hash`].
    pub fn hash(&self) -> AssetHash {
        let mut iter = self.initializers.iter();
        let Some(first) = iter.next() else {
            return AssetHash::from_raw(0);
        };
        iter.fold(AssetHash::of_str(first), |acc, s| {
            acc.combine_hash(AssetHash::of_str(s))
        })
    }

    /// A human-readable rendering of every initializer, for diagnostics.
    pub fn descriptive_name(&self) -> String {
        self.initializers.join(", ")
    }

    /// The file a divergent (locally edited) copy of this asset would be saved to.
    ///
    /// This is the first initializer, or an empty string for an empty identifier.
    pub fn target_filename(&self) -> String {
        self.initializers.first().cloned().unwrap_or_default()
    }
}

impl fmt::Debug for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AssetId({})", self.descriptive_name())
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptive_name())
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self::new([s])
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self::new([s])
    }
}

impl<const N: usize> From<[&str; N]> for AssetId {
    fn from(inits: [&str; N]) -> Self {
        Self::new(inits)
    }
}

impl From<&[&str]> for AssetId {
    fn from(inits: &[&str]) -> Self {
        Self::new(inits.iter().copied())
    }
}
