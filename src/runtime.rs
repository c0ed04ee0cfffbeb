//! The class runtime: loader and linker, object model, interpreter and natives.

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    error::Result,
    invoke::JavaClass,
    runtime::{famous_classes::FamousClasses, native::NativeRegistry},
};

pub use class_loader::{ArchiveSource, ClassSource, DirectorySource, FnSource, MemorySource};
pub use heap::Heap;
pub use interpreter::{Frame, Thread, Value};
pub use native::{NativeEnv, NativeFunction};
pub use options::{OutputBuffer, RuntimeBuilder, RuntimeOptions, Sink};
pub use structs::*;

pub(crate) use class_loader::BootstrapClassLoader;
pub(crate) use structs::{ClinitStatus, ObjectBody, method_key};

pub mod class_loader;
mod famous_classes;
pub mod heap;
pub(crate) mod inheritance;
pub mod interpreter;
pub mod native;
mod options;
mod structs;

/// One independent runtime: its own loaded classes, heap and native bindings.
/// Runtimes share nothing, so several can live in one process.
pub struct Runtime {
    pub(crate) class_loader: BootstrapClassLoader,
    pub(crate) heap: Heap,
    pub(crate) natives: NativeRegistry,
    pub(crate) famous_classes: FamousClasses,
    pub(crate) options: RuntimeOptions,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// A runtime searching the built-in classes first, then `sources` in order.
    pub fn new(sources: Vec<Box<dyn ClassSource>>, options: RuntimeOptions) -> Result<Runtime> {
        let mut all_sources: Vec<Box<dyn ClassSource>> = Vec::with_capacity(sources.len() + 1);
        all_sources.push(Box::new(famous_classes::builtin_source()?));
        all_sources.extend(sources);

        let class_loader = BootstrapClassLoader::new(all_sources);
        let famous_classes = FamousClasses::load(&class_loader)?;
        debug!(
            sources = ?class_loader.sources().map(|s| s.name()).collect::<Vec<_>>(),
            "runtime ready"
        );
        Ok(Runtime {
            class_loader,
            heap: Heap::new(),
            natives: NativeRegistry::new(),
            famous_classes,
            options,
        })
    }

    /// Loads and links `class_name` (`a/b/C` or `a.b.C`). Static initialization waits
    /// until the class is first used.
    pub fn load(&self, class_name: &str) -> Result<JavaClass<'_>> {
        let class = self.load_class(&class_name.replace('.', "/"))?;
        Ok(JavaClass::new(self, class))
    }

    pub(crate) fn load_class(&self, class_name: &str) -> Result<Arc<Class>> {
        self.class_loader.resolve_class(class_name)
    }

    /// Binds the implementation of a `native` method.
    pub fn register_native(
        &self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        function: impl Fn(&mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> + Send + Sync + 'static,
    ) {
        self.natives.register(class_name, name, descriptor, function);
    }

    /// A new, uninterned `java/lang/String`.
    pub fn new_string(&self, value: &str) -> ObjectRef {
        self.heap.new_string(&self.famous_classes.string, value)
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// A fresh call stack on this runtime.
    pub fn thread(&self) -> Thread<'_> {
        Thread::new(self)
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("class_loader", &self.class_loader)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
