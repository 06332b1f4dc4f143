//! The native library loader seam.
//!
//! `import name;` resolves through a host-provided [`LibLoader`]: `open`
//! yields an opaque handle, `entry` looks up the registration entry point
//! (the fixed symbol [`LIB_ENTRY_NAME`]), and the entry registers one or
//! more extensions into the currently-executing script's set. The engine
//! defines neither search paths nor binary formats; platform dynamic
//! linking is host policy, and the default loader fails every open.

use crate::extension::ExtensionSet;

/// Symbol name a native library must export to register its extensions.
pub const LIB_ENTRY_NAME: &str = "aug_register_lib";

/// Opaque library handle, owned and interpreted by the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LibHandle(pub u64);

/// The registration entry point of a loaded library.
pub type RegisterLibFn = Box<dyn FnOnce(&mut ExtensionSet)>;

/// Host-provided resolver from library names to native callables.
pub trait LibLoader {
    /// Opens a library by name. `None` on failure.
    fn open(&mut self, name: &str) -> Option<LibHandle>;

    /// Resolves the registration entry point of an opened library.
    fn entry(&mut self, handle: LibHandle, entry_name: &str) -> Option<RegisterLibFn>;

    /// Releases an opened library.
    fn close(&mut self, handle: LibHandle);
}

/// Default loader: every open fails. Hosts that want `import name;` to
/// work install their own loader at startup.
#[derive(Debug, Default)]
pub struct NulLibLoader;

impl LibLoader for NulLibLoader {
    fn open(&mut self, _name: &str) -> Option<LibHandle> {
        None
    }

    fn entry(&mut self, _handle: LibHandle, _entry_name: &str) -> Option<RegisterLibFn> {
        None
    }

    fn close(&mut self, _handle: LibHandle) {}
}
