use std::sync::Arc;

use parking_lot::RwLock;

use crate::{
    consts::STRING_CLASS,
    error::{Error, Result},
    runtime::{Class, ObjectBody, ObjectRef, Value},
};

pub use string_table::StringTable;

pub mod string_table;

/// Allocates objects. Memory is reclaimed by reference counting, so cycles between
/// objects are never freed.
#[derive(Debug, Default)]
pub struct Heap {
    string_table: StringTable,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            string_table: StringTable::new(),
        }
    }

    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    /// A new instance with every field at its default value.
    pub(crate) fn new_instance(&self, class: &Arc<Class>) -> ObjectRef {
        if class.class_name.as_ref() == STRING_CLASS {
            return ObjectRef::new(class, ObjectBody::String(Arc::from("")));
        }
        let fields = class
            .instance_fields_info
            .iter()
            .map(|f| Value::zero(&f.descriptor))
            .collect();
        ObjectRef::new(class, ObjectBody::Fields(RwLock::new(fields)))
    }

    /// A new array of `class`, which must be an array class, with `length` default
    /// elements. `None` when the elements cannot be allocated.
    pub(crate) fn new_array(&self, class: &Arc<Class>, length: usize) -> Result<Option<ObjectRef>> {
        let component = class
            .array_component
            .clone()
            .ok_or_else(|| Error::vm(format!("{} is not an array class", class.class_name)))?;
        let mut elements = Vec::new();
        if elements.try_reserve_exact(length).is_err() {
            return Ok(None);
        }
        elements.resize(length, Value::zero(&component));
        Ok(Some(ObjectRef::new(
            class,
            ObjectBody::Array {
                component,
                elements: RwLock::new(elements),
            },
        )))
    }

    /// An array of `class` holding `elements`.
    pub(crate) fn new_array_with(
        &self,
        class: &Arc<Class>,
        elements: Vec<Value>,
    ) -> Result<ObjectRef> {
        let component = class
            .array_component
            .clone()
            .ok_or_else(|| Error::vm(format!("{} is not an array class", class.class_name)))?;
        Ok(ObjectRef::new(
            class,
            ObjectBody::Array {
                component,
                elements: RwLock::new(elements),
            },
        ))
    }

    pub(in crate::runtime) fn new_string(&self, string_class: &Arc<Class>, value: &str) -> ObjectRef {
        ObjectRef::new(string_class, ObjectBody::String(Arc::from(value)))
    }

    pub(in crate::runtime) fn intern(&self, string_class: &Arc<Class>, value: &str) -> ObjectRef {
        self.string_table
            .intern(value, |value| ObjectRef::new(string_class, ObjectBody::String(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::ClassBuilder,
        consts::{FieldAccessFlag, OBJECT_CLASS},
        descriptor::FieldType,
        runtime::Runtime,
    };

    fn runtime() -> Runtime {
        let point = ClassBuilder::new("Point", Some(OBJECT_CLASS))
            .field(FieldAccessFlag::PRIVATE, "x", "I")
            .field(FieldAccessFlag::PRIVATE, "y", "D")
            .field(FieldAccessFlag::PRIVATE, "next", "LPoint;")
            .to_bytes()
            .unwrap();
        Runtime::builder().class("Point", point).build().unwrap()
    }

    #[test]
    fn test_new_instance_has_default_fields() {
        let runtime = runtime();
        let class = runtime.load_class("Point").unwrap();
        let point = runtime.heap().new_instance(&class);
        assert_eq!(point.class_name(), "Point");
        assert_eq!(point.get_field(0).unwrap(), Value::Int(0));
        assert_eq!(point.get_field(1).unwrap(), Value::Double(0.0));
        assert_eq!(point.get_field(2).unwrap(), Value::NULL);
        assert!(point.get_field(3).is_err());

        point.put_field(2, Value::Reference(Some(point.clone()))).unwrap();
        assert_eq!(point.get_field(2).unwrap(), Value::Reference(Some(point.clone())));
    }

    #[test]
    fn test_new_array() {
        let runtime = runtime();
        let class = runtime.load_class("[J").unwrap();
        let array = runtime.heap().new_array(&class, 3).unwrap().unwrap();
        assert_eq!(array.array_length(), Some(3));
        assert_eq!(array.array_component(), Some(&FieldType::Long));
        assert_eq!(array.array_elements().unwrap(), vec![Value::Long(0); 3]);
        assert_eq!(array.array_get(3).unwrap(), None);
        assert!(array.array_set(-1, Value::Long(1)).is_ok_and(|stored| !stored));

        assert!(runtime.heap().new_array(&class, usize::MAX).unwrap().is_none());

        let not_array = runtime.load_class("Point").unwrap();
        assert!(runtime.heap().new_array(&not_array, 1).is_err());
    }

    #[test]
    fn test_interned_strings_are_shared() {
        let runtime = runtime();
        let string = runtime.load_class(STRING_CLASS).unwrap();
        let heap = runtime.heap();
        let before = heap.string_table().len();
        let a = heap.intern(&string, "hello");
        let b = heap.intern(&string, "hello");
        assert!(a.ptr_eq(&b));
        assert_eq!(heap.string_table().len(), before + 1);

        let fresh = heap.new_string(&string, "hello");
        assert!(!fresh.ptr_eq(&a));
        assert_eq!(fresh.as_str(), Some("hello"));
        assert_ne!(fresh, a);
    }
}
