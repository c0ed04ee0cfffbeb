//! Calling into loaded classes from Rust.
//!
//! ```no_run
//! # fn main() -> javaclass::Result<()> {
//! use javaclass::{JavaValue, Runtime};
//!
//! let runtime = Runtime::builder().class_path("classes").build()?;
//! let result = runtime
//!     .load("HelloWorld")?
//!     .get_invoker()
//!     .get_static()
//!     .get_methods()
//!     .call("main", &[JavaValue::Array(vec!["Hello World!".into()])])?;
//! assert_eq!(result, JavaValue::Void);
//! # Ok(())
//! # }
//! ```

use std::{collections::HashSet, fmt, sync::Arc};

use crate::{
    consts::{INIT, OBJECT_CLASS, STRING_CLASS},
    descriptor::FieldType,
    error::{Error, Result},
    runtime::{
        Class, MethodInfo, ObjectRef, Runtime, Value,
        class_loader::initialize_class,
        inheritance::is_assignable_to,
        interpreter::{java_name, narrow, to_slots},
    },
};

/// An argument to, or a result of, a Java method.
#[derive(Debug, Clone, PartialEq)]
pub enum JavaValue {
    /// The result of a `void` method.
    Void,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    String(String),
    Array(Vec<JavaValue>),
    Object(ObjectRef),
}

impl JavaValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            JavaValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            JavaValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            JavaValue::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            JavaValue::Object(v) => Some(v),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            JavaValue::Void => "void",
            JavaValue::Boolean(_) => "boolean",
            JavaValue::Byte(_) => "byte",
            JavaValue::Char(_) => "char",
            JavaValue::Short(_) => "short",
            JavaValue::Int(_) => "int",
            JavaValue::Long(_) => "long",
            JavaValue::Float(_) => "float",
            JavaValue::Double(_) => "double",
            JavaValue::Null => "null",
            JavaValue::String(_) => "String",
            JavaValue::Array(_) => "array",
            JavaValue::Object(_) => "object",
        }
    }

    /// Whether this value can be passed where `field_type` is declared, allowing
    /// widening primitive conversions.
    fn accepted_by(&self, runtime: &Runtime, field_type: &FieldType) -> bool {
        use FieldType as T;
        match (self, field_type) {
            (JavaValue::Boolean(_), T::Boolean) => true,
            (JavaValue::Byte(_), T::Byte | T::Short | T::Int | T::Long | T::Float | T::Double) => true,
            (JavaValue::Char(_), T::Char | T::Int | T::Long | T::Float | T::Double) => true,
            (JavaValue::Short(_), T::Short | T::Int | T::Long | T::Float | T::Double) => true,
            (JavaValue::Int(_), T::Int | T::Long | T::Float | T::Double) => true,
            (JavaValue::Long(_), T::Long | T::Float | T::Double) => true,
            (JavaValue::Float(_), T::Float | T::Double) => true,
            (JavaValue::Double(_), T::Double) => true,
            (JavaValue::Null, T::Object(_) | T::Array(_)) => true,
            (JavaValue::String(_), T::Object(name)) => name == STRING_CLASS || name == OBJECT_CLASS,
            // built as Object[], so every element must be a reference
            (JavaValue::Array(items), T::Object(name)) => {
                name == OBJECT_CLASS && items.iter().all(|item| item.accepted_by(runtime, field_type))
            }
            (JavaValue::Array(items), T::Array(component)) => items
                .iter()
                .all(|item| item.accepted_by(runtime, component)),
            (JavaValue::Object(object), T::Object(_) | T::Array(_)) => {
                let target = runtime.load_class(&field_type.class_name());
                match (object.class(), target) {
                    (Ok(source), Ok(target)) => is_assignable_to(&source, &target),
                    _ => false,
                }
            }
            _ => false,
        }
    }

    /// Converts to the interpreter representation of a `field_type` value.
    fn to_value(&self, runtime: &Runtime, field_type: &FieldType) -> Result<Value> {
        use FieldType as T;
        let value = match (self, field_type) {
            (JavaValue::Boolean(v), _) => Value::Int(*v as i32),
            (JavaValue::Byte(v), T::Long) => Value::Long(*v as i64),
            (JavaValue::Char(v), T::Long) => Value::Long(*v as i64),
            (JavaValue::Short(v), T::Long) => Value::Long(*v as i64),
            (JavaValue::Int(v), T::Long) => Value::Long(*v as i64),
            (JavaValue::Long(v), T::Long) => Value::Long(*v),
            (JavaValue::Byte(v), T::Float) => Value::Float(*v as f32),
            (JavaValue::Char(v), T::Float) => Value::Float(*v as f32),
            (JavaValue::Short(v), T::Float) => Value::Float(*v as f32),
            (JavaValue::Int(v), T::Float) => Value::Float(*v as f32),
            (JavaValue::Long(v), T::Float) => Value::Float(*v as f32),
            (JavaValue::Float(v), T::Float) => Value::Float(*v),
            (JavaValue::Byte(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Char(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Short(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Int(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Long(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Float(v), T::Double) => Value::Double(*v as f64),
            (JavaValue::Double(v), T::Double) => Value::Double(*v),
            (JavaValue::Byte(v), _) => Value::Int(*v as i32),
            (JavaValue::Char(v), _) => Value::Int(*v as i32),
            (JavaValue::Short(v), _) => Value::Int(*v as i32),
            (JavaValue::Int(v), _) => Value::Int(*v),
            (JavaValue::Null, _) => Value::NULL,
            (JavaValue::String(v), _) => Value::Reference(Some(runtime.new_string(v))),
            (JavaValue::Array(items), T::Array(component)) => {
                let class = runtime.load_class(&field_type.to_descriptor())?;
                let elements = items
                    .iter()
                    .map(|item| item.to_value(runtime, component))
                    .collect::<Result<Vec<_>>>()?;
                Value::Reference(Some(runtime.heap.new_array_with(&class, elements)?))
            }
            (JavaValue::Array(items), _) => {
                let object = FieldType::Object(OBJECT_CLASS.to_string());
                let array_type = FieldType::Array(Box::new(object));
                return JavaValue::Array(items.clone()).to_value(runtime, &array_type);
            }
            (JavaValue::Object(object), _) => Value::Reference(Some(object.clone())),
            (value, _) => {
                return Err(Error::IllegalArgument(format!(
                    "cannot pass {} as {field_type}",
                    value.type_name()
                )));
            }
        };
        Ok(value)
    }

    /// Converts an interpreter value declared as `field_type` back.
    fn from_value(value: Value, field_type: &FieldType) -> Result<JavaValue> {
        use FieldType as T;
        let converted = match (field_type, value) {
            (T::Boolean, Value::Int(v)) => JavaValue::Boolean(v != 0),
            (T::Byte, Value::Int(v)) => JavaValue::Byte(v as i8),
            (T::Char, Value::Int(v)) => JavaValue::Char(v as u16),
            (T::Short, Value::Int(v)) => JavaValue::Short(v as i16),
            (T::Int, Value::Int(v)) => JavaValue::Int(v),
            (T::Long, Value::Long(v)) => JavaValue::Long(v),
            (T::Float, Value::Float(v)) => JavaValue::Float(v),
            (T::Double, Value::Double(v)) => JavaValue::Double(v),
            (T::Object(_) | T::Array(_), Value::Reference(object)) => JavaValue::from_object(object)?,
            (_, value) => {
                return Err(Error::vm(format!(
                    "{} value where {field_type} was declared",
                    value.kind()
                )));
            }
        };
        Ok(converted)
    }

    fn from_object(object: Option<ObjectRef>) -> Result<JavaValue> {
        let Some(object) = object else {
            return Ok(JavaValue::Null);
        };
        if let Some(string) = object.as_str() {
            return Ok(JavaValue::String(string.to_string()));
        }
        match (object.array_component(), object.array_elements()) {
            (Some(component), Some(elements)) => elements
                .into_iter()
                .map(|element| JavaValue::from_value(element, component))
                .collect::<Result<Vec<_>>>()
                .map(JavaValue::Array),
            _ => Ok(JavaValue::Object(object)),
        }
    }
}

macro_rules! java_value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for JavaValue {
                fn from(value: $ty) -> Self {
                    JavaValue::$variant(value.into())
                }
            }
        )*
    };
}

java_value_from! {
    bool => Boolean,
    i8 => Byte,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    String => String,
    &str => String,
    ObjectRef => Object,
}

impl<T: Into<JavaValue>> From<Vec<T>> for JavaValue {
    fn from(values: Vec<T>) -> Self {
        JavaValue::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<JavaValue>> From<Option<T>> for JavaValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(JavaValue::Null, Into::into)
    }
}

/// A loaded class.
#[derive(Clone)]
pub struct JavaClass<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
}

impl<'r> JavaClass<'r> {
    pub(crate) fn new(runtime: &'r Runtime, class: Arc<Class>) -> Self {
        JavaClass { runtime, class }
    }

    pub fn name(&self) -> &str {
        &self.class.class_name
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Whether both handles describe the same loaded class.
    pub fn ptr_eq(&self, other: &JavaClass<'_>) -> bool {
        Arc::ptr_eq(&self.class, &other.class)
    }

    pub fn get_invoker(&self) -> Invoker<'r> {
        Invoker {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
        }
    }
}

impl fmt::Debug for JavaClass<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("JavaClass").field(&self.class.class_name).finish()
    }
}

pub struct Invoker<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
}

impl<'r> Invoker<'r> {
    /// Static methods and fields of the class.
    pub fn get_static(&self) -> StaticContext<'r> {
        StaticContext {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
        }
    }

    /// Instance methods and fields, dispatched on `object`, which must be an instance
    /// of the class or one of its subclasses.
    pub fn get_instance(&self, object: ObjectRef) -> Result<InstanceContext<'r>> {
        if !is_assignable_to(&object.class()?, &self.class) {
            return Err(Error::IllegalArgument(format!(
                "{} is not an instance of {}",
                java_name(object.class_name()),
                java_name(&self.class.class_name)
            )));
        }
        Ok(InstanceContext {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
            object,
        })
    }

    /// Allocates an instance and runs the first constructor accepting `args`.
    pub fn construct(&self, args: &[JavaValue]) -> Result<ObjectRef> {
        let class = &self.class;
        if class.is_abstract() || class.is_interface() || class.is_array() {
            return Err(Error::IllegalArgument(format!(
                "{} cannot be instantiated",
                java_name(&class.class_name)
            )));
        }
        let candidates = class
            .methods
            .iter()
            .enumerate()
            .filter(|(_, method)| method.name.as_ref() == INIT)
            .map(|(index, _)| (Arc::clone(class), index))
            .collect::<Vec<_>>();
        let (_, index) = select(self.runtime, class, INIT, &candidates, args)?;

        let mut thread = self.runtime.thread();
        initialize_class(&mut thread, class)?;
        let object = self.runtime.heap.new_instance(class);
        let mut slots = vec![Value::Reference(Some(object.clone()))];
        slots.extend(convert_args(self.runtime, class.method(index), args)?);
        thread.invoke(Arc::clone(class), index, to_slots(slots))?;
        Ok(object)
    }
}

pub struct StaticContext<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
}

impl<'r> StaticContext<'r> {
    pub fn get_methods(&self) -> MethodLookup<'r> {
        MethodLookup {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
            receiver: None,
        }
    }

    pub fn get_fields(&self) -> FieldLookup<'r> {
        FieldLookup {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
            receiver: None,
        }
    }
}

pub struct InstanceContext<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
    object: ObjectRef,
}

impl<'r> InstanceContext<'r> {
    pub fn object(&self) -> &ObjectRef {
        &self.object
    }

    pub fn get_methods(&self) -> MethodLookup<'r> {
        MethodLookup {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
            receiver: Some(self.object.clone()),
        }
    }

    pub fn get_fields(&self) -> FieldLookup<'r> {
        FieldLookup {
            runtime: self.runtime,
            class: Arc::clone(&self.class),
            receiver: Some(self.object.clone()),
        }
    }
}

/// Methods callable by name, static ones or instance ones depending on the context.
pub struct MethodLookup<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
    receiver: Option<ObjectRef>,
}

impl MethodLookup<'_> {
    /// Calls the first method called `name` whose parameters accept `args`.
    pub fn call(&self, name: &str, args: &[JavaValue]) -> Result<JavaValue> {
        let candidates = self.candidates(name);
        let (class, index) = select(self.runtime, &self.class, name, &candidates, args)?;
        self.invoke(class, index, args)
    }

    /// Calls the method `name` with exactly `descriptor`, e.g. `(I)V`.
    pub fn call_with_descriptor(
        &self,
        name: &str,
        descriptor: &str,
        args: &[JavaValue],
    ) -> Result<JavaValue> {
        let (class, index) = self
            .candidates(name)
            .into_iter()
            .find(|(class, index)| class.method(*index).descriptor_str.as_ref() == descriptor)
            .ok_or_else(|| Error::NoSuchMethod {
                class_name: self.class.class_name.to_string(),
                method: format!("{name}{descriptor}"),
            })?;
        let method = class.method(index);
        if method.descriptor.parameters.len() != args.len()
            || !accepts(self.runtime, method, args)
        {
            return Err(Error::IllegalArgument(format!(
                "{name}{descriptor} does not accept ({})",
                type_names(args)
            )));
        }
        self.invoke(class, index, args)
    }

    /// Descriptors of the methods called `name`, in the order `call` tries them.
    pub fn signatures(&self, name: &str) -> Vec<String> {
        self.candidates(name)
            .into_iter()
            .map(|(class, index)| class.method(index).descriptor_str.to_string())
            .collect()
    }

    /// Methods called `name` of the right kind, most derived declaration first.
    fn candidates(&self, name: &str) -> Vec<(Arc<Class>, usize)> {
        let want_static = self.receiver.is_none();
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut pending = vec![Arc::clone(&self.class)];
        let mut visited = HashSet::new();
        while let Some(class) = pending.pop() {
            if !visited.insert(Arc::clone(&class.class_name)) {
                continue;
            }
            for (index, method) in class.methods.iter().enumerate() {
                if method.name.as_ref() != name || method.is_static() != want_static {
                    continue;
                }
                if seen.insert(Arc::clone(&method.descriptor_str)) {
                    found.push((Arc::clone(&class), index));
                }
            }
            // superclass first, then interfaces in declaration order
            pending.extend(class.interfaces.iter().rev().cloned());
            pending.extend(class.super_class.iter().cloned());
        }
        found
    }

    fn invoke(&self, class: Arc<Class>, index: usize, args: &[JavaValue]) -> Result<JavaValue> {
        let method = class.method(index);
        let converted = convert_args(self.runtime, method, args)?;
        let mut thread = self.runtime.thread();

        let result = match &self.receiver {
            None => {
                initialize_class(&mut thread, &class)?;
                thread.invoke(Arc::clone(&class), index, to_slots(converted))?
            }
            Some(receiver) => {
                let (owner, index) = if method.is_private() {
                    (Arc::clone(&class), index)
                } else {
                    let receiver_class = receiver.class()?;
                    receiver_class
                        .resolve_method(&method.name, &method.descriptor_str)
                        .ok_or_else(|| Error::NoSuchMethod {
                            class_name: receiver_class.class_name.to_string(),
                            method: format!("{}{}", method.name, method.descriptor_str),
                        })?
                };
                let mut slots = vec![Value::Reference(Some(receiver.clone()))];
                slots.extend(converted);
                thread.invoke(owner, index, to_slots(slots))?
            }
        };

        match (&method.descriptor.return_type, result) {
            (None, _) => Ok(JavaValue::Void),
            (Some(return_type), Some(value)) => JavaValue::from_value(value, return_type),
            (Some(return_type), None) => Err(Error::vm(format!(
                "{}.{} returned nothing, expected {return_type}",
                class.class_name, method.name
            ))),
        }
    }
}

/// Named fields, static ones or instance ones depending on the context.
pub struct FieldLookup<'r> {
    runtime: &'r Runtime,
    class: Arc<Class>,
    receiver: Option<ObjectRef>,
}

impl FieldLookup<'_> {
    pub fn get(&self, name: &str) -> Result<JavaValue> {
        match &self.receiver {
            None => {
                let (owner, index, field_type) = self.static_field(name)?;
                JavaValue::from_value(owner.get_static_field(index)?, &field_type)
            }
            Some(receiver) => {
                let (index, field_type) = self.instance_field(receiver, name)?;
                JavaValue::from_value(receiver.get_field(index)?, &field_type)
            }
        }
    }

    pub fn set(&self, name: &str, value: impl Into<JavaValue>) -> Result<()> {
        let value = value.into();
        match &self.receiver {
            None => {
                let (owner, index, field_type) = self.static_field(name)?;
                let converted = self.convert(name, &value, &field_type)?;
                owner.set_static_field(index, converted)
            }
            Some(receiver) => {
                let (index, field_type) = self.instance_field(receiver, name)?;
                let converted = self.convert(name, &value, &field_type)?;
                receiver.put_field(index, converted)
            }
        }
    }

    fn convert(&self, name: &str, value: &JavaValue, field_type: &FieldType) -> Result<Value> {
        if !value.accepted_by(self.runtime, field_type) {
            return Err(Error::IllegalArgument(format!(
                "field {name} of type {field_type} does not accept {}",
                value.type_name()
            )));
        }
        Ok(narrow(field_type, value.to_value(self.runtime, field_type)?))
    }

    /// The initialized declaring class, slot and type of static field `name`.
    fn static_field(&self, name: &str) -> Result<(Arc<Class>, usize, FieldType)> {
        let no_such_field = || Error::NoSuchField {
            class_name: self.class.class_name.to_string(),
            field: name.to_string(),
        };
        let (owner, index) = self.class.static_field(name).ok_or_else(no_such_field)?;
        let field_type = owner
            .static_fields_info
            .iter()
            .find(|field| field.index == index)
            .map(|field| field.descriptor.clone())
            .ok_or_else(no_such_field)?;
        initialize_class(&mut self.runtime.thread(), &owner)?;
        Ok((owner, index, field_type))
    }

    fn instance_field(&self, receiver: &ObjectRef, name: &str) -> Result<(usize, FieldType)> {
        let class = receiver.class()?;
        class
            .instance_field(name)
            .map(|field| (field.index, field.descriptor.clone()))
            .ok_or_else(|| Error::NoSuchField {
                class_name: class.class_name.to_string(),
                field: name.to_string(),
            })
    }
}

fn accepts(runtime: &Runtime, method: &MethodInfo, args: &[JavaValue]) -> bool {
    method
        .descriptor
        .parameters
        .iter()
        .zip(args)
        .all(|(parameter, arg)| arg.accepted_by(runtime, parameter))
}

fn type_names(args: &[JavaValue]) -> String {
    args.iter()
        .map(JavaValue::type_name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// The first candidate with matching arity whose parameters accept `args`.
fn select(
    runtime: &Runtime,
    class: &Class,
    name: &str,
    candidates: &[(Arc<Class>, usize)],
    args: &[JavaValue],
) -> Result<(Arc<Class>, usize)> {
    if candidates.is_empty() {
        return Err(Error::NoSuchMethod {
            class_name: class.class_name.to_string(),
            method: name.to_string(),
        });
    }
    candidates
        .iter()
        .find(|(owner, index)| {
            let method = owner.method(*index);
            method.descriptor.parameters.len() == args.len() && accepts(runtime, method, args)
        })
        .cloned()
        .ok_or_else(|| {
            Error::IllegalArgument(format!(
                "no {}.{name} accepts ({})",
                java_name(&class.class_name),
                type_names(args)
            ))
        })
}

fn convert_args(runtime: &Runtime, method: &MethodInfo, args: &[JavaValue]) -> Result<Vec<Value>> {
    method
        .descriptor
        .parameters
        .iter()
        .zip(args)
        .map(|(parameter, arg)| arg.to_value(runtime, parameter).map(|v| narrow(parameter, v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widening_is_accepted_but_narrowing_is_not() {
        let runtime = Runtime::builder().build().unwrap();
        assert!(JavaValue::Int(1).accepted_by(&runtime, &FieldType::Long));
        assert!(JavaValue::Char(65).accepted_by(&runtime, &FieldType::Int));
        assert!(!JavaValue::Long(1).accepted_by(&runtime, &FieldType::Int));
        assert!(!JavaValue::Int(1).accepted_by(&runtime, &FieldType::Boolean));
        assert!(JavaValue::Null.accepted_by(&runtime, &FieldType::Object(STRING_CLASS.into())));
        assert!(!JavaValue::Null.accepted_by(&runtime, &FieldType::Int));
    }

    #[test]
    fn test_string_arrays_are_accepted_by_string_array_parameters() {
        let runtime = Runtime::builder().build().unwrap();
        let args = JavaValue::from(vec!["a", "b"]);
        let string_array = FieldType::Array(Box::new(FieldType::Object(STRING_CLASS.into())));
        assert!(args.accepted_by(&runtime, &string_array));
        assert!(!args.accepted_by(&runtime, &FieldType::Array(Box::new(FieldType::Int))));
    }

    #[test]
    fn test_arrays_passed_as_object_hold_only_references() {
        let runtime = Runtime::builder().build().unwrap();
        let object = FieldType::Object(OBJECT_CLASS.into());
        let string = FieldType::Object(STRING_CLASS.into());
        let ints = JavaValue::Array(vec![JavaValue::Int(1)]);
        let nested_longs = JavaValue::Array(vec![JavaValue::Array(vec![JavaValue::Long(2)])]);
        let references = JavaValue::Array(vec![JavaValue::from("a"), JavaValue::Null]);
        assert!(!ints.accepted_by(&runtime, &object));
        assert!(!nested_longs.accepted_by(&runtime, &object));
        assert!(references.accepted_by(&runtime, &object));
        assert!(!references.accepted_by(&runtime, &string));
        assert!(JavaValue::Array(vec![JavaValue::Array(vec![])]).accepted_by(&runtime, &object));
    }

    #[test]
    fn test_converts_results_by_declared_type() {
        assert_eq!(
            JavaValue::from_value(Value::Int(1), &FieldType::Boolean).unwrap(),
            JavaValue::Boolean(true)
        );
        assert_eq!(
            JavaValue::from_value(Value::Int(0xffff), &FieldType::Char).unwrap(),
            JavaValue::Char(0xffff)
        );
        assert_eq!(
            JavaValue::from_value(Value::NULL, &FieldType::Object(STRING_CLASS.into())).unwrap(),
            JavaValue::Null
        );
        assert!(JavaValue::from_value(Value::Long(1), &FieldType::Int).is_err());
    }

    #[test]
    fn test_strings_cross_the_boundary() {
        let runtime = Runtime::builder().build().unwrap();
        let string_type = FieldType::Object(STRING_CLASS.into());
        let value = JavaValue::from("héllo").to_value(&runtime, &string_type).unwrap();
        assert_eq!(
            JavaValue::from_value(value, &string_type).unwrap(),
            JavaValue::String("héllo".into())
        );
    }
}
