use std::{
    cell::Cell,
    collections::{HashMap, HashSet},
    sync::Arc,
    thread::{self, ThreadId},
};

use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::ReentrantMutex;
use tracing::{debug, trace};

use crate::{
    class::parser,
    consts::{CLINIT, ClassAccessFlag, INIT, OBJECT_CLASS},
    descriptor::FieldType,
    error::{ClassLoadReason, Error, Result},
    runtime::{
        Class, ClinitStatus, ConstantPoolInfo, VtableIndex,
        class_loader::{ClassSource, parse_class, resolve_constant_pool, resolve_cp_class},
        method_key,
    },
};

#[derive(Debug)]
pub(crate) struct BootstrapClassLoader {
    sources: Vec<Box<dyn ClassSource>>,
    class_registry: DashMap<String, Arc<OnceCell<Arc<Class>>>>,
    // classes being defined, and by which thread
    loading: DashMap<String, ThreadId>,
    // the class each thread is blocked on
    waiting: DashMap<ThreadId, String>,
}

struct LoadingMarker<'a> {
    loading: &'a DashMap<String, ThreadId>,
    class_name: &'a str,
}

impl<'a> LoadingMarker<'a> {
    fn new(loader: &'a BootstrapClassLoader, class_name: &'a str) -> Self {
        let current = thread::current().id();
        // a thread defining a class is no longer waiting for it
        loader.waiting.remove(&current);
        loader.loading.insert(class_name.to_string(), current);
        LoadingMarker {
            loading: &loader.loading,
            class_name,
        }
    }
}

impl Drop for LoadingMarker<'_> {
    fn drop(&mut self) {
        self.loading.remove(self.class_name);
    }
}

struct WaitingMarker<'a> {
    waiting: &'a DashMap<ThreadId, String>,
    thread: ThreadId,
}

impl<'a> WaitingMarker<'a> {
    fn new(waiting: &'a DashMap<ThreadId, String>, thread: ThreadId, class_name: &str) -> Self {
        waiting.insert(thread, class_name.to_string());
        WaitingMarker { waiting, thread }
    }
}

impl Drop for WaitingMarker<'_> {
    fn drop(&mut self) {
        self.waiting.remove(&self.thread);
    }
}

impl BootstrapClassLoader {
    pub(crate) fn new(sources: Vec<Box<dyn ClassSource>>) -> Self {
        Self {
            sources,
            class_registry: Default::default(),
            loading: Default::default(),
            waiting: Default::default(),
        }
    }

    pub(crate) fn sources(&self) -> impl Iterator<Item = &dyn ClassSource> {
        self.sources.iter().map(|s| s.as_ref())
    }

    /// A class that has already been loaded, if any.
    pub(crate) fn loaded_class(&self, class_name: &str) -> Option<Arc<Class>> {
        self.class_registry
            .get(class_name)
            .and_then(|cell| cell.get().map(Arc::clone))
    }

    /// Loads and links `class_name`, or returns the cached class.
    pub(crate) fn resolve_class(&self, class_name: &str) -> Result<Arc<Class>> {
        let class_cell = Arc::clone(
            self.class_registry
                .entry(class_name.to_string())
                .or_default()
                .value(),
        );
        if let Some(class) = class_cell.get() {
            return Ok(Arc::clone(class));
        }

        // registered before the check: of two threads closing a cycle, at
        // least one sees the other
        let current = thread::current().id();
        let waiting = WaitingMarker::new(&self.waiting, current, class_name);
        if self.leads_back_to(current, class_name) {
            return Err(Error::class_load(
                class_name,
                ClassLoadReason::CyclicInheritance,
            ));
        }

        let result = class_cell
            .get_or_try_init(|| {
                let _marker = LoadingMarker::new(self, class_name);
                if class_name.starts_with('[') {
                    self.define_array(class_name)
                } else {
                    self.define_class(class_name)
                }
            })
            .map(Arc::clone);
        drop(waiting);
        if result.is_err() {
            self.class_registry
                .remove_if(class_name, |_, cell| cell.get().is_none());
        }
        result
    }

    /// Follows the chain of class owners and the classes they wait for,
    /// starting at `class_name`. True when it reaches `current`.
    fn leads_back_to(&self, current: ThreadId, class_name: &str) -> bool {
        let mut visited = HashSet::new();
        let mut class_name = class_name.to_string();
        loop {
            let Some(owner) = self.loading.get(&class_name).map(|owner| *owner.value()) else {
                return false;
            };
            if owner == current {
                return true;
            }
            if !visited.insert(owner) {
                return false;
            }
            match self.waiting.get(&owner).map(|next| next.value().clone()) {
                Some(next) => class_name = next,
                None => return false,
            }
        }
    }

    fn find_class_bytes(&self, name: &str) -> Result<(Vec<u8>, &str)> {
        for source in &self.sources {
            if let Some(bytes) = source.find_class(name)? {
                return Ok((bytes, source.name()));
            }
        }
        Err(Error::class_load(name, ClassLoadReason::NotFound))
    }

    fn define_class(&self, name: &str) -> Result<Arc<Class>> {
        let (bytes, source) = self.find_class_bytes(name)?;
        let class_file = parser::class_file(&bytes)?;
        let constant_pool = resolve_constant_pool(&class_file.constant_pool)?;

        let class_name = Arc::clone(&resolve_cp_class(&constant_pool, class_file.this_class)?.name);
        if class_name.as_ref() != name {
            return Err(Error::class_load(
                name,
                ClassLoadReason::WrongName(class_name.to_string()),
            ));
        }

        let super_class = self.load_super_class(name, &constant_pool, class_file.super_class)?;
        let interfaces = self.load_interfaces(name, &constant_pool, &class_file.interfaces)?;
        if class_file.access_flags.contains(ClassAccessFlag::INTERFACE)
            && super_class.as_ref().is_some_and(|s| s.name() != OBJECT_CLASS)
        {
            return Err(Error::class_load(
                name,
                ClassLoadReason::IncompatibleClassChange(
                    "interfaces must extend java/lang/Object".into(),
                ),
            ));
        }

        let mut class = parse_class(&class_file, constant_pool, class_name, super_class, interfaces)?;
        Self::build_vtable(&mut class);

        let class = Arc::new(class);
        debug!(class = name, source, "defined class");
        Self::trace_vtable(&class);
        Ok(class)
    }

    fn load_super_class(
        &self,
        name: &str,
        constant_pool: &[ConstantPoolInfo],
        class_index: u16,
    ) -> Result<Option<Arc<Class>>> {
        // java.lang.Object
        if class_index == 0 {
            if name == OBJECT_CLASS {
                return Ok(None);
            }
            return Err(Error::class_load(
                name,
                ClassLoadReason::IncompatibleClassChange(
                    "only java/lang/Object may omit its superclass".into(),
                ),
            ));
        }
        let super_class = resolve_cp_class(constant_pool, class_index)?;
        let loaded = self
            .resolve_class(&super_class.name)
            .map_err(|e| missing(e, &super_class.name, || {
                Error::class_load(name, ClassLoadReason::MissingSuperclass(super_class.name.to_string()))
            }))?;

        if loaded.is_interface() {
            return Err(Error::class_load(
                name,
                ClassLoadReason::IncompatibleClassChange(format!(
                    "superclass {} is an interface",
                    loaded.class_name
                )),
            ));
        }
        if loaded.access_flags.contains(ClassAccessFlag::FINAL) {
            return Err(Error::class_load(
                name,
                ClassLoadReason::IncompatibleClassChange(format!(
                    "cannot inherit from final class {}",
                    loaded.class_name
                )),
            ));
        }
        let _ = super_class.class.set(Arc::downgrade(&loaded));
        Ok(Some(loaded))
    }

    fn load_interfaces(
        &self,
        name: &str,
        constant_pool: &[ConstantPoolInfo],
        interfaces: &[u16],
    ) -> Result<Vec<Arc<Class>>> {
        let mut loaded_interfaces = Vec::with_capacity(interfaces.len());
        for &index in interfaces {
            let interface = resolve_cp_class(constant_pool, index)?;
            let loaded = self
                .resolve_class(&interface.name)
                .map_err(|e| missing(e, &interface.name, || {
                    Error::class_load(name, ClassLoadReason::MissingInterface(interface.name.to_string()))
                }))?;
            if !loaded.is_interface() {
                return Err(Error::class_load(
                    name,
                    ClassLoadReason::IncompatibleClassChange(format!(
                        "{} is not an interface",
                        loaded.class_name
                    )),
                ));
            }
            let _ = interface.class.set(Arc::downgrade(&loaded));
            loaded_interfaces.push(loaded);
        }
        Ok(loaded_interfaces)
    }

    /// Synthesizes an array class such as `[I` or `[[Ljava/lang/String;`.
    fn define_array(&self, name: &str) -> Result<Arc<Class>> {
        let Some(FieldType::Array(component)) = FieldType::parse(name) else {
            return Err(Error::class_load(name, ClassLoadReason::NotFound));
        };
        let array_element_class = match component.as_ref() {
            FieldType::Object(element) => Some(self.resolve_class(element)?),
            FieldType::Array(_) => Some(self.resolve_class(&component.to_descriptor())?),
            _ => None,
        };
        let object = self.resolve_class(OBJECT_CLASS)?;

        let mut class = Class {
            constant_pool: Vec::new(),
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::ABSTRACT,
            class_name: name.into(),
            super_class: Some(object),
            interfaces: Vec::new(),
            static_fields_info: Vec::new(),
            instance_fields_info: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            static_fields: Vec::new(),
            array_component: Some(*component),
            array_element_class,
            // array has no clinit
            clinit_call: ReentrantMutex::new(Cell::new(ClinitStatus::Init)),
            vtable: HashMap::new(),
        };
        Self::build_vtable(&mut class);

        debug!(class = name, "defined array class");
        Ok(Arc::new(class))
    }

    fn build_vtable(class: &mut Class) {
        let mut vtable = HashMap::new();

        if let Some(super_class) = &class.super_class {
            for (key, index) in &super_class.vtable {
                let (owner, i) = match index {
                    VtableIndex::InThisClass(i) => (super_class, *i),
                    VtableIndex::OtherClass { class, index }
                    | VtableIndex::OtherInterface { class, index } => (class, *index),
                };
                let method = &owner.methods[i];
                // constructors, initializers and private methods are not inherited
                if method.is_private() || method.name.as_ref() == INIT || method.name.as_ref() == CLINIT {
                    continue;
                }
                let entry = match index {
                    VtableIndex::InThisClass(index) => VtableIndex::OtherClass {
                        class: Arc::clone(super_class),
                        index: *index,
                    },
                    other => other.clone(),
                };
                vtable.insert(Arc::clone(key), entry);
            }
        }

        for (i, method) in class.methods.iter().enumerate() {
            vtable.insert(
                method_key(&method.name, &method.descriptor_str).into(),
                VtableIndex::InThisClass(i),
            );
        }

        // default or abstract methods not already provided
        for interface in &class.interfaces {
            for (key, index) in &interface.vtable {
                let (owner, i) = match index {
                    VtableIndex::InThisClass(i) => (interface, *i),
                    VtableIndex::OtherClass { class, index }
                    | VtableIndex::OtherInterface { class, index } => (class, *index),
                };
                let method = &owner.methods[i];
                if method.is_static() || method.is_private() || method.name.as_ref() == CLINIT {
                    continue;
                }
                vtable
                    .entry(Arc::clone(key))
                    .or_insert_with(|| VtableIndex::OtherInterface {
                        class: Arc::clone(owner),
                        index: i,
                    });
            }
        }

        class.vtable = vtable;
    }

    fn trace_vtable(class: &Class) {
        if !tracing::enabled!(tracing::Level::TRACE) {
            return;
        }
        for (key, index) in &class.vtable {
            match index {
                VtableIndex::InThisClass(i) => {
                    trace!(class = %class.class_name, method = %key, index = i, "vtable entry");
                }
                VtableIndex::OtherClass { class: owner, index: i }
                | VtableIndex::OtherInterface { class: owner, index: i } => {
                    trace!(
                        class = %class.class_name,
                        method = %key,
                        owner = %owner.class_name,
                        index = i,
                        "vtable entry"
                    );
                }
            }
        }
    }
}

/// Maps a NotFound failure of `dependency` to the error `replace` builds.
fn missing(err: Error, dependency: &str, replace: impl FnOnce() -> Error) -> Error {
    match &err {
        Error::ClassLoad {
            class_name,
            reason: ClassLoadReason::NotFound,
        } if class_name == dependency => replace(),
        _ => err,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::ClassBuilder,
        consts::{ClassAccessFlag as Flag, MethodAccessFlag, STRING_CLASS},
        instructions as inst,
        runtime::{FnSource, MemorySource, famous_classes::builtin_source},
    };

    fn loader(classes: &[(&str, Vec<u8>)]) -> BootstrapClassLoader {
        let mut memory = MemorySource::new("test");
        for (name, bytes) in classes {
            memory.insert(*name, bytes.clone());
        }
        BootstrapClassLoader::new(vec![Box::new(builtin_source().unwrap()), Box::new(memory)])
    }

    fn class(name: &str, super_name: &str) -> Vec<u8> {
        ClassBuilder::new(name, Some(super_name)).to_bytes().unwrap()
    }

    fn returning(name: &str, super_name: &str, value: i32) -> Vec<u8> {
        ClassBuilder::new(name, Some(super_name))
            .method(MethodAccessFlag::PUBLIC, "m", "()I", |c| {
                c.iconst(value).insn(inst::IRETURN);
            })
            .to_bytes()
            .unwrap()
    }

    fn reason(err: Error) -> ClassLoadReason {
        match err {
            Error::ClassLoad { reason, .. } => reason,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_loaded_classes_are_cached() {
        let loader = loader(&[("A", class("A", OBJECT_CLASS))]);
        let first = loader.resolve_class("A").unwrap();
        let second = loader.resolve_class("A").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &loader.loaded_class("A").unwrap()));
        assert_eq!(first.super_class().unwrap().name(), OBJECT_CLASS);
    }

    #[test]
    fn test_deepest_override_wins() {
        let loader = loader(&[
            ("A", returning("A", OBJECT_CLASS, 1)),
            ("B", returning("B", "A", 2)),
            ("C", class("C", "B")),
        ]);
        let c = loader.resolve_class("C").unwrap();
        let (owner, _) = c.resolve_method_key(&method_key("m", "()I")).unwrap();
        assert_eq!(owner.name(), "B");
        assert!(c.resolve_method_key(&method_key("<init>", "()V")).is_none());
    }

    #[test]
    fn test_cyclic_inheritance() {
        let loader = loader(&[("A", class("A", "B")), ("B", class("B", "A"))]);
        let err = loader.resolve_class("A").unwrap_err();
        assert_eq!(reason(err), ClassLoadReason::CyclicInheritance);
        assert!(loader.loaded_class("A").is_none());
        assert!(loader.loaded_class("B").is_none());
    }

    #[test]
    fn test_missing_superclass() {
        let loader = loader(&[("A", class("A", "Gone"))]);
        match loader.resolve_class("A").unwrap_err() {
            Error::ClassLoad { class_name, reason } => {
                assert_eq!(class_name, "A");
                assert_eq!(reason, ClassLoadReason::MissingSuperclass("Gone".into()));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_not_found_and_wrong_name() {
        let loader = loader(&[("X", class("Y", OBJECT_CLASS))]);
        assert_eq!(reason(loader.resolve_class("Nope").unwrap_err()), ClassLoadReason::NotFound);
        assert_eq!(
            reason(loader.resolve_class("X").unwrap_err()),
            ClassLoadReason::WrongName("Y".into())
        );
    }

    #[test]
    fn test_final_and_interface_supers_are_rejected() {
        let interface = ClassBuilder::new("I", Some(OBJECT_CLASS))
            .access_flags(Flag::PUBLIC | Flag::INTERFACE | Flag::ABSTRACT)
            .to_bytes()
            .unwrap();
        let loader = loader(&[
            ("S", class("S", STRING_CLASS)),
            ("I", interface),
            ("J", class("J", "I")),
        ]);
        assert!(matches!(
            reason(loader.resolve_class("S").unwrap_err()),
            ClassLoadReason::IncompatibleClassChange(_)
        ));
        assert!(matches!(
            reason(loader.resolve_class("J").unwrap_err()),
            ClassLoadReason::IncompatibleClassChange(_)
        ));
    }

    #[test]
    fn test_array_classes() {
        let loader = loader(&[]);
        let array = loader.resolve_class("[[Ljava/lang/String;").unwrap();
        assert!(array.is_array());
        assert_eq!(array.super_class().unwrap().name(), OBJECT_CLASS);
        assert_eq!(
            array.array_element_class.as_ref().unwrap().name(),
            "[Ljava/lang/String;"
        );
        let ints = loader.resolve_class("[I").unwrap();
        assert!(ints.array_element_class.is_none());
        assert_eq!(ints.clinit_status(), ClinitStatus::Init);
    }

    #[test]
    fn test_cycle_split_across_threads() {
        use std::sync::{
            Barrier,
            atomic::{AtomicUsize, Ordering},
        };

        let barrier = Arc::new(Barrier::new(2));
        let calls = Arc::new(AtomicUsize::new(0));
        let (a, b) = (class("A", "B"), class("B", "A"));
        // each thread's first lookup meets the other's, so both are mid-definition
        let source = FnSource::new("cycle", move |name| {
            let bytes = match name {
                "A" => a.clone(),
                "B" => b.clone(),
                _ => return Ok(None),
            };
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                barrier.wait();
            }
            Ok(Some(bytes))
        });
        let loader = BootstrapClassLoader::new(vec![
            Box::new(builtin_source().unwrap()),
            Box::new(source),
        ]);

        let errors: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = ["A", "B"]
                .into_iter()
                .map(|name| {
                    let loader = &loader;
                    scope.spawn(move || loader.resolve_class(name).unwrap_err())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for err in errors {
            assert_eq!(reason(err), ClassLoadReason::CyclicInheritance);
        }
        assert!(loader.loaded_class("A").is_none());
        assert!(loader.loaded_class("B").is_none());
    }

    #[test]
    fn test_concurrent_loads_share_one_class() {
        let loader = loader(&[("A", class("A", OBJECT_CLASS))]);
        let classes: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| loader.resolve_class("A").unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(classes.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    }
}
