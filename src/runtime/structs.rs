use std::{cell::Cell, collections::HashMap, fmt, sync::Arc};

use parking_lot::{ReentrantMutex, RwLock};

pub use attributes::*;
pub use constant_pool::*;
pub use object::*;

use crate::{
    consts::{ClassAccessFlag, DETAIL_MESSAGE, FieldAccessFlag, MethodAccessFlag},
    descriptor::{FieldType, MethodDescriptor},
    error::{Error, Result, ThrownException},
    runtime::Value,
};

mod attributes;
mod constant_pool;
mod object;

/// A loaded and linked class.
pub struct Class {
    pub(crate) constant_pool: Vec<ConstantPoolInfo>,
    pub(crate) access_flags: ClassAccessFlag,
    pub(crate) class_name: Arc<str>,
    pub(crate) super_class: Option<Arc<Class>>,
    pub(crate) interfaces: Vec<Arc<Class>>,
    pub(crate) static_fields_info: Vec<FieldInfo>,
    // inherited fields first
    pub(crate) instance_fields_info: Vec<FieldInfo>,
    pub(crate) methods: Vec<MethodInfo>,
    pub(crate) attributes: Vec<AttributeInfo>,
    pub(crate) static_fields: Vec<RwLock<Value>>,
    // only for array classes
    pub(crate) array_component: Option<FieldType>,
    // only for arrays of reference type
    pub(crate) array_element_class: Option<Arc<Class>>,
    pub(crate) clinit_call: ReentrantMutex<Cell<ClinitStatus>>,
    // name + descriptor, covering own, inherited and default methods
    pub(crate) vtable: HashMap<Arc<str>, VtableIndex>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum ClinitStatus {
    NotInit,
    InProgress,
    Init,
    Failed,
}

#[derive(Debug, Clone)]
pub enum VtableIndex {
    InThisClass(usize),
    OtherClass { class: Arc<Class>, index: usize },
    OtherInterface { class: Arc<Class>, index: usize },
}

pub(crate) fn method_key(name: &str, descriptor: &str) -> String {
    format!("{name}{descriptor}")
}

impl Class {
    pub fn name(&self) -> &str {
        &self.class_name
    }

    pub fn super_class(&self) -> Option<&Arc<Class>> {
        self.super_class.as_ref()
    }

    pub fn interfaces(&self) -> &[Arc<Class>] {
        &self.interfaces
    }

    pub fn access_flags(&self) -> ClassAccessFlag {
        self.access_flags
    }

    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::INTERFACE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(ClassAccessFlag::ABSTRACT)
    }

    pub fn is_array(&self) -> bool {
        self.array_component.is_some()
    }

    /// Declared methods in declaration order.
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// The instance field layout, inherited fields first.
    pub fn instance_fields(&self) -> &[FieldInfo] {
        &self.instance_fields_info
    }

    pub fn static_fields(&self) -> &[FieldInfo] {
        &self.static_fields_info
    }

    pub fn source_file(&self) -> Option<&str> {
        self.attributes.iter().find_map(|attribute| match attribute {
            AttributeInfo::SourceFile(name) => Some(name.as_ref()),
            _ => None,
        })
    }

    pub(crate) fn get_constant(&self, index: u16) -> Result<&ConstantPoolInfo> {
        match (index as usize)
            .checked_sub(1)
            .and_then(|i| self.constant_pool.get(i))
        {
            Some(ConstantPoolInfo::Empty) | None => Err(Error::vm(format!(
                "{}: no usable constant at #{index}",
                self.class_name
            ))),
            Some(constant) => Ok(constant),
        }
    }

    pub(crate) fn method(&self, index: usize) -> &MethodInfo {
        &self.methods[index]
    }

    pub(crate) fn declared_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods
            .iter()
            .position(|m| m.name.as_ref() == name && m.descriptor_str.as_ref() == descriptor)
    }

    /// Finds the method that `name` + `descriptor` selects for this class, walking
    /// inherited and default methods through the vtable.
    pub(crate) fn resolve_method(
        self: &Arc<Self>,
        name: &str,
        descriptor: &str,
    ) -> Option<(Arc<Class>, usize)> {
        self.resolve_method_key(&method_key(name, descriptor))
    }

    pub(crate) fn resolve_method_key(self: &Arc<Self>, key: &str) -> Option<(Arc<Class>, usize)> {
        match self.vtable.get(key)? {
            VtableIndex::InThisClass(index) => Some((Arc::clone(self), *index)),
            VtableIndex::OtherClass { class, index }
            | VtableIndex::OtherInterface { class, index } => Some((Arc::clone(class), *index)),
        }
    }

    /// The most derived instance field called `name`.
    pub fn instance_field(&self, name: &str) -> Option<&FieldInfo> {
        self.instance_fields_info
            .iter()
            .rev()
            .find(|f| f.name.as_ref() == name)
    }

    /// Finds a static field in this class, its superinterfaces or its superclasses.
    pub(crate) fn static_field(self: &Arc<Self>, name: &str) -> Option<(Arc<Class>, usize)> {
        if let Some(field) = self.static_fields_info.iter().find(|f| f.name.as_ref() == name) {
            return Some((Arc::clone(self), field.index));
        }
        for interface in &self.interfaces {
            if let Some(found) = interface.static_field(name) {
                return Some(found);
            }
        }
        self.super_class.as_ref()?.static_field(name)
    }

    pub(crate) fn instance_slots(&self) -> usize {
        self.instance_fields_info.len()
    }

    pub fn get_static_field(&self, index: usize) -> Result<Value> {
        match self.static_fields.get(index) {
            Some(slot) => Ok(slot.read().clone()),
            None => Err(self.no_such_static(index)),
        }
    }

    pub fn set_static_field(&self, index: usize, value: Value) -> Result<()> {
        match self.static_fields.get(index) {
            Some(slot) => {
                *slot.write() = value;
                Ok(())
            }
            None => Err(self.no_such_static(index)),
        }
    }

    fn no_such_static(&self, index: usize) -> Error {
        Error::NoSuchField {
            class_name: self.class_name.to_string(),
            field: format!("static #{index}"),
        }
    }

    pub(crate) fn clinit_status(&self) -> ClinitStatus {
        self.clinit_call.lock().get()
    }

    pub(crate) fn package_name(&self) -> &str {
        let Some((package, _)) = self.class_name.rsplit_once('/') else {
            return "";
        };
        package
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.class_name)
            .field("access_flags", &self.access_flags)
            .field("super_class", &self.super_class.as_ref().map(|c| &c.class_name))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub(crate) access_flags: FieldAccessFlag,
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: FieldType,
    pub(crate) attributes: Vec<AttributeInfo>,
    // slot in the object layout or in the static block
    pub(crate) index: usize,
}

impl FieldInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &FieldType {
        &self.descriptor
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(FieldAccessFlag::STATIC)
    }

    pub(crate) fn constant_value(&self) -> Option<&Const> {
        self.attributes.iter().find_map(|attribute| match attribute {
            AttributeInfo::ConstantValue(value) => Some(value),
            _ => None,
        })
    }
}

#[derive(Debug)]
pub struct MethodInfo {
    pub(crate) access_flags: MethodAccessFlag,
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: MethodDescriptor,
    pub(crate) descriptor_str: Arc<str>,
    pub(crate) code: Option<Arc<CodeAttribute>>,
    pub(crate) attributes: Vec<AttributeInfo>,
}

impl MethodInfo {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &MethodDescriptor {
        &self.descriptor
    }

    pub fn descriptor_str(&self) -> &str {
        &self.descriptor_str
    }

    pub fn access_flags(&self) -> MethodAccessFlag {
        self.access_flags
    }

    pub fn is_static(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::STATIC)
    }

    pub fn is_native(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::NATIVE)
    }

    pub fn is_abstract(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::ABSTRACT)
    }

    pub(crate) fn is_private(&self) -> bool {
        self.access_flags.contains(MethodAccessFlag::PRIVATE)
    }

    /// Local slots taken by the arguments, `this` included.
    pub(crate) fn argument_slots(&self) -> usize {
        self.descriptor.parameter_slots() + usize::from(!self.is_static())
    }
}

/// Unwinding state inside the interpreter: a catchable Java throwable, or a fatal
/// error that no handler may intercept.
#[derive(Debug)]
pub enum Exception {
    Java(ObjectRef),
    Fatal(Error),
}

impl From<Error> for Exception {
    fn from(err: Error) -> Self {
        Exception::Fatal(err)
    }
}

impl From<Exception> for Error {
    fn from(exception: Exception) -> Self {
        match exception {
            Exception::Java(object) => {
                let message = object
                    .class()
                    .ok()
                    .and_then(|class| class.instance_field(DETAIL_MESSAGE).map(|f| f.index))
                    .and_then(|index| object.get_field(index).ok())
                    .and_then(|value| match value {
                        Value::Reference(Some(message)) => message.as_str().map(str::to_string),
                        _ => None,
                    });
                Error::Thrown(ThrownException {
                    class_name: object.class_name().to_string(),
                    message,
                    object,
                })
            }
            Exception::Fatal(err) => err,
        }
    }
}

pub type NativeResult<T> = ::std::result::Result<T, Exception>;
