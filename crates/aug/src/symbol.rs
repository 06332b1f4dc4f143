//! Symbols and symbol tables used by IR generation and the serializer.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

/// Where a symbol's storage lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum SymScope {
    /// Stack slot relative to the enclosing frame base.
    Local,
    /// Absolute stack index in the script's global region.
    Global,
    /// Stack slot below the frame base (arguments precede the base).
    Param,
}

/// What a symbol names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum SymKind {
    Var,
    Func,
}

/// One resolved name.
///
/// For a `Var`, `offset` is a stack offset (frame-relative for Local/Param,
/// absolute for Global). For a `Func`, `offset` is the bytecode address of
/// the function entry and `argc` the declared parameter count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Symbol {
    pub name: String,
    pub scope: SymScope,
    pub kind: SymKind,
    pub offset: i32,
    pub argc: i32,
}

/// Name-keyed symbol table. The outermost frame's final table becomes the
/// script's globals table, embedded in the compiled program.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct SymbolTable {
    symbols: AHashMap<String, Symbol>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.symbols.get(name)
    }

    /// Inserts a symbol. Returns false when the name is already bound,
    /// leaving the existing binding untouched.
    pub fn insert(&mut self, symbol: Symbol) -> bool {
        if self.symbols.contains_key(&symbol.name) {
            return false;
        }
        self.symbols.insert(symbol.name.clone(), symbol);
        true
    }

    /// Replaces a binding unconditionally. Used by the main IR pass to fix
    /// up function addresses pre-registered by the prepass.
    pub fn replace(&mut self, symbol: Symbol) {
        self.symbols.insert(symbol.name.clone(), symbol);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.values()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }
}
