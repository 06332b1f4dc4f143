//! Native extension functions callable from scripts.

use ahash::AHashMap;

use crate::object::Object;

/// A native function exposed to scripts. Arguments arrive as owned host
/// values in source order; the return value is pushed back onto the VM
/// stack.
pub type Extension = Box<dyn FnMut(&[Object]) -> Object>;

/// Name-keyed registry of extensions.
///
/// The engine holds one global set; each script additionally owns a set
/// populated by `import`-loaded libraries while that script executes. On
/// lookup the script-local set shadows the global one.
#[derive(Default)]
pub struct ExtensionSet {
    funcs: AHashMap<String, Extension>,
}

impl ExtensionSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a function, replacing any previous binding of the name.
    pub fn register(&mut self, name: impl Into<String>, func: Extension) {
        self.funcs.insert(name.into(), func);
    }

    /// Removes a binding. Returns false when the name was not registered.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.funcs.remove(name).is_some()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.funcs.contains_key(name)
    }

    pub(crate) fn get_mut(&mut self, name: &str) -> Option<&mut Extension> {
        self.funcs.get_mut(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}

impl std::fmt::Debug for ExtensionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ExtensionSet").field("funcs", &names).finish()
    }
}
