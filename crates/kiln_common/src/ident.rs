//! Interned strings for the asset name registry.

use lasso::ThreadedRodeo;
use serde::{Deserialize, Serialize};

/// An interned string, represented as a `u32` index into an [`Interner`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub struct Symbol(u32);

impl Symbol {
    /// Returns the raw `u32` index of this symbol.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

// SAFETY: `Symbol` wraps a `u32` which is always a valid `usize` on 32-bit and
// 64-bit platforms. `try_from_usize` rejects values that don't fit in `u32`.
unsafe impl lasso::Key for Symbol {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(Symbol)
    }
}

/// Thread-safe string interner backed by [`lasso::ThreadedRodeo`].
///
/// Asset descriptive names repeat heavily (the same model file appears in
/// scaffold, material and renderer identifiers), so the registry stores each
/// distinct name once.
pub struct Interner {
    rodeo: ThreadedRodeo<Symbol>,
}

impl Interner {
    /// Creates a new empty interner.
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Interns a string, returning its [`Symbol`]. If the string was already
    /// interned, returns the existing symbol without allocating.
    pub fn get_or_intern(&self, s: &str) -> Symbol {
        self.rodeo.get_or_intern(s)
    }

    /// Resolves a [`Symbol`] back to its string value.
    ///
    /// # Panics
    ///
    /// Panics if the `Symbol` was not created by this interner.
    pub fn resolve(&self, symbol: Symbol) -> &str {
        self.rodeo.resolve(&symbol)
    }

    /// Returns the number of distinct interned strings.
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// Returns `true` if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

impl std::fmt::Debug for Interner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interner").field("len", &self.len()).finish()
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}
