use std::{
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;

use crate::{
    descriptor::FieldType,
    error::{Error, Result},
    runtime::{Class, Value},
};

pub struct Object {
    class: Weak<Class>,
    class_name: Arc<str>,
    body: ObjectBody,
}

pub(crate) enum ObjectBody {
    Fields(RwLock<Box<[Value]>>),
    Array {
        component: FieldType,
        elements: RwLock<Vec<Value>>,
    },
    String(Arc<str>),
}

/// A shared reference to a heap object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<Object>);

impl ObjectRef {
    pub(crate) fn new(class: &Arc<Class>, body: ObjectBody) -> Self {
        ObjectRef(Arc::new(Object {
            class: Arc::downgrade(class),
            class_name: Arc::clone(&class.class_name),
            body,
        }))
    }

    pub fn class_name(&self) -> &str {
        &self.0.class_name
    }

    pub(crate) fn class(&self) -> Result<Arc<Class>> {
        self.0
            .class
            .upgrade()
            .ok_or_else(|| Error::vm(format!("class {} is no longer loaded", self.0.class_name)))
    }

    /// The payload of a `java/lang/String` object.
    pub fn as_str(&self) -> Option<&str> {
        match &self.0.body {
            ObjectBody::String(value) => Some(value),
            _ => None,
        }
    }

    pub(crate) fn string(&self) -> Option<Arc<str>> {
        match &self.0.body {
            ObjectBody::String(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    pub fn get_field(&self, index: usize) -> Result<Value> {
        match &self.0.body {
            ObjectBody::Fields(fields) => match fields.read().get(index) {
                Some(value) => Ok(value.clone()),
                None => Err(self.no_such_field(index)),
            },
            _ => Err(self.no_such_field(index)),
        }
    }

    pub fn put_field(&self, index: usize, value: Value) -> Result<()> {
        match &self.0.body {
            ObjectBody::Fields(fields) => match fields.write().get_mut(index) {
                Some(slot) => {
                    *slot = value;
                    Ok(())
                }
                None => Err(self.no_such_field(index)),
            },
            _ => Err(self.no_such_field(index)),
        }
    }

    fn no_such_field(&self, index: usize) -> Error {
        Error::NoSuchField {
            class_name: self.0.class_name.to_string(),
            field: format!("#{index}"),
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.0.body, ObjectBody::Array { .. })
    }

    pub fn array_length(&self) -> Option<usize> {
        match &self.0.body {
            ObjectBody::Array { elements, .. } => Some(elements.read().len()),
            _ => None,
        }
    }

    pub fn array_component(&self) -> Option<&FieldType> {
        match &self.0.body {
            ObjectBody::Array { component, .. } => Some(component),
            _ => None,
        }
    }

    /// A snapshot of the elements of an array.
    pub fn array_elements(&self) -> Option<Vec<Value>> {
        match &self.0.body {
            ObjectBody::Array { elements, .. } => Some(elements.read().clone()),
            _ => None,
        }
    }

    /// `Ok(None)` when `index` is out of bounds.
    pub(crate) fn array_get(&self, index: i32) -> Result<Option<Value>> {
        match &self.0.body {
            ObjectBody::Array { elements, .. } => Ok(usize::try_from(index)
                .ok()
                .and_then(|i| elements.read().get(i).cloned())),
            _ => Err(Error::vm(format!("{} is not an array", self.0.class_name))),
        }
    }

    /// Returns false when `index` is out of bounds.
    pub(crate) fn array_set(&self, index: i32, value: Value) -> Result<bool> {
        match &self.0.body {
            ObjectBody::Array { elements, .. } => {
                let mut elements = elements.write();
                match usize::try_from(index).ok().and_then(|i| elements.get_mut(i)) {
                    Some(slot) => {
                        *slot = value;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            _ => Err(Error::vm(format!("{} is not an array", self.0.class_name))),
        }
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Identity hash, stable for the lifetime of the object.
    pub(crate) fn identity_hash(&self) -> i32 {
        let address = Arc::as_ptr(&self.0) as usize;
        ((address >> 3) ^ (address >> 35)) as i32
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.body {
            ObjectBody::String(value) => write!(f, "{:?}", value),
            _ => write!(f, "{}@{:p}", self.0.class_name, Arc::as_ptr(&self.0)),
        }
    }
}
