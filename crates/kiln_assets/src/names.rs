//! Hash → human-readable name registry for diagnostics.

use std::collections::BTreeMap;

use kiln_common::{AssetHash, Interner, Symbol};
use parking_lot::Mutex;

#[derive(Debug)]
struct Names {
    interner: Interner,
    symbols: BTreeMap<AssetHash, Symbol>,
}

impl Names {
    fn new() -> Self {
        Self {
            interner: Interner::new(),
            symbols: BTreeMap::new(),
        }
    }
}

/// Names of the assets a table has constructed.
///
/// Strings are interned, so a name shared by several hashes is stored once.
/// [`NameRegistry::clear`] drops the interner along with the names.
#[derive(Debug)]
pub struct NameRegistry {
    names: Mutex<Names>,
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NameRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            names: Mutex::new(Names::new()),
        }
    }

    /// Records `name` for `hash`, replacing any earlier name.
    pub fn insert(&self, hash: AssetHash, name: &str) {
        let mut names = self.names.lock();
        let symbol = names.interner.get_or_intern(name);
        names.symbols.insert(hash, symbol);
    }

    /// Records `name` for `hash` unless a name is already recorded.
    /// Returns `true` if the name was inserted.
    pub fn insert_no_collision(&self, hash: AssetHash, name: &str) -> bool {
        let mut names = self.names.lock();
        if names.symbols.contains_key(&hash) {
            return false;
        }
        let symbol = names.interner.get_or_intern(name);
        names.symbols.insert(hash, symbol);
        true
    }

    /// The name recorded for `hash`.
    pub fn name(&self, hash: AssetHash) -> Option<String> {
        let names = self.names.lock();
        let symbol = *names.symbols.get(&hash)?;
        Some(names.interner.resolve(symbol).to_string())
    }

    /// Number of named hashes.
    pub fn len(&self) -> usize {
        self.names.lock().symbols.len()
    }

    /// Returns `true` if nothing is named.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct name strings held.
    pub fn interned(&self) -> usize {
        self.names.lock().interner.len()
    }

    /// Forgets every name and the strings behind them.
    pub fn clear(&self) {
        *self.names.lock() = Names::new();
    }
}
