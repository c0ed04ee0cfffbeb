use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;

use crate::{
    descriptor::{FieldType, MethodDescriptor},
    error::Result,
    runtime::Class,
};

/// A constant pool entry with its symbolic references resolved inside the class
/// file. Links to other classes are filled in lazily by the interpreter.
#[derive(Debug)]
pub enum ConstantPoolInfo {
    Empty,
    Utf8(Arc<str>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(CpClassInfo),
    String(Arc<str>),
    Fieldref(Fieldref),
    Methodref(Methodref),
    InterfaceMethodref(Methodref),
    NameAndType(CpNameAndTypeInfo<Arc<str>>),
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType(MethodDescriptor),
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type: CpNameAndTypeInfo<FieldType>,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type: CpNameAndTypeInfo<MethodDescriptor>,
    },
    Module(Arc<str>),
    Package(Arc<str>),
}

impl ConstantPoolInfo {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ConstantPoolInfo::Empty => "empty",
            ConstantPoolInfo::Utf8(_) => "Utf8",
            ConstantPoolInfo::Integer(_) => "Integer",
            ConstantPoolInfo::Float(_) => "Float",
            ConstantPoolInfo::Long(_) => "Long",
            ConstantPoolInfo::Double(_) => "Double",
            ConstantPoolInfo::Class(_) => "Class",
            ConstantPoolInfo::String(_) => "String",
            ConstantPoolInfo::Fieldref(_) => "Fieldref",
            ConstantPoolInfo::Methodref(_) => "Methodref",
            ConstantPoolInfo::InterfaceMethodref(_) => "InterfaceMethodref",
            ConstantPoolInfo::NameAndType(_) => "NameAndType",
            ConstantPoolInfo::MethodHandle { .. } => "MethodHandle",
            ConstantPoolInfo::MethodType(_) => "MethodType",
            ConstantPoolInfo::Dynamic { .. } => "Dynamic",
            ConstantPoolInfo::InvokeDynamic { .. } => "InvokeDynamic",
            ConstantPoolInfo::Module(_) => "Module",
            ConstantPoolInfo::Package(_) => "Package",
        }
    }
}

#[derive(Debug)]
pub struct CpClassInfo {
    pub(crate) name: Arc<str>,
    pub(crate) class: OnceCell<Weak<Class>>,
}

impl CpClassInfo {
    pub(crate) fn new(name: Arc<str>) -> Self {
        CpClassInfo {
            name,
            class: OnceCell::new(),
        }
    }

    pub(crate) fn get_or_load_class(
        &self,
        resolver: impl FnOnce(&str) -> Result<Arc<Class>>,
    ) -> Result<Arc<Class>> {
        if let Some(class) = self.class.get().and_then(Weak::upgrade) {
            return Ok(class);
        }
        let class = resolver(&self.name)?;
        let _ = self.class.set(Arc::downgrade(&class));
        Ok(class)
    }
}

impl Clone for CpClassInfo {
    fn clone(&self) -> Self {
        CpClassInfo::new(Arc::clone(&self.name))
    }
}

#[derive(Debug, Clone)]
pub struct CpNameAndTypeInfo<T> {
    pub(crate) name: Arc<str>,
    pub(crate) descriptor: T,
}

#[derive(Debug)]
pub struct Fieldref {
    pub(crate) class: CpClassInfo,
    pub(crate) name_and_type: CpNameAndTypeInfo<FieldType>,
    pub(crate) resolve: OnceCell<FieldResolve>,
}

#[derive(Debug, Clone)]
pub enum FieldResolve {
    Instance(usize),
    Static { class: Weak<Class>, index: usize },
}

#[derive(Debug)]
pub struct Methodref {
    pub(crate) class: CpClassInfo,
    pub(crate) name_and_type: CpNameAndTypeInfo<MethodDescriptor>,
    pub(crate) descriptor_str: Arc<str>,
    // name + descriptor, as used by vtable lookups
    pub(crate) key: Arc<str>,
    pub(crate) resolve: OnceCell<MethodResolve>,
}

#[derive(Debug, Clone)]
pub struct MethodResolve {
    pub(crate) class: Weak<Class>,
    pub(crate) index: usize,
}
