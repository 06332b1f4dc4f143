//! Extension invocation and native library loading.

use smallvec::SmallVec;

use super::Vm;
use crate::{
    error::EngineError,
    heap::HeapData,
    lib_loader::LIB_ENTRY_NAME,
    object::{Object, object_to_value, value_to_object},
    value::Value,
};

impl Vm<'_> {
    /// CALL_EXT: pops the function name and `arg_count` arguments, resolves
    /// the name against the script-local extensions first and the VM-global
    /// table second, runs the extension, and pushes its result.
    ///
    /// Arguments were pushed in reverse, so popping hands them to the
    /// extension in source order.
    pub(super) fn call_extension(&mut self, arg_count: i32) -> Result<(), EngineError> {
        let name_value = self.pop()?;
        let name = match &name_value {
            Value::Ref(id) => match self.heap.get(*id) {
                HeapData::Str(s) => Some(s.to_lossy_string()),
                _ => None,
            },
            _ => None,
        };
        let Some(name) = name else {
            name_value.drop_with_heap(self.heap);
            return Err(EngineError::runtime(
                "extension call expected a function name on the stack",
            ));
        };
        name_value.drop_with_heap(self.heap);

        let mut args: SmallVec<[Object; 8]> = SmallVec::new();
        for _ in 0..arg_count {
            let value = self.pop()?;
            args.push(value_to_object(&value, self.heap));
            value.drop_with_heap(self.heap);
        }

        let in_script = self.script_exts.as_deref().is_some_and(|set| set.contains(&name));
        let result = if in_script {
            let ext = self
                .script_exts
                .as_deref_mut()
                .and_then(|set| set.get_mut(&name))
                .expect("presence checked above");
            ext(&args)
        } else if let Some(ext) = self.global_exts.get_mut(&name) {
            ext(&args)
        } else {
            return Err(EngineError::runtime(format!("extension function {name} not registered")));
        };

        let value = object_to_value(&result, self.heap);
        self.push(value)
    }

    /// IMPORT_LIB: resolves the named library through the host loader and
    /// runs its registration entry against the executing script's extension
    /// set (or the global set during one-shot execution).
    pub(super) fn import_library(&mut self, name: &str) -> Result<(), EngineError> {
        let Some(handle) = self.lib_loader.open(name) else {
            return Err(EngineError::runtime(format!("failed to open library {name}")));
        };
        let Some(register) = self.lib_loader.entry(handle, LIB_ENTRY_NAME) else {
            self.lib_loader.close(handle);
            return Err(EngineError::runtime(format!(
                "library {name} does not export {LIB_ENTRY_NAME}"
            )));
        };

        let target = match self.script_exts.as_deref_mut() {
            Some(set) => set,
            None => &mut *self.global_exts,
        };
        register(target);
        self.loaded_libs.push(handle);
        Ok(())
    }
}
