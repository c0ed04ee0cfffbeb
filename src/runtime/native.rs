//! Native method bindings and the environment natives run in.

mod object;
mod string;
mod system;
mod throwable;

pub(crate) use system::PRINT_DESCRIPTORS;

use std::{fmt, sync::Arc};

use dashmap::DashMap;

use crate::{
    consts::STRING_CLASS,
    error::{Error, Result},
    runtime::{
        Class, Exception, MethodInfo, NativeResult, ObjectRef, Runtime, Thread, Value,
        class_loader::initialize_class, interpreter::to_slots,
    },
};

pub type NativeFunction =
    Arc<dyn Fn(&mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> + Send + Sync>;

// key: class_name, method_name, method_descriptor
type Key = (String, String, String);

pub(crate) struct NativeRegistry {
    functions: DashMap<Key, NativeFunction>,
}

impl NativeRegistry {
    /// A registry holding the natives of the built-in classes.
    pub(crate) fn new() -> Self {
        let registry = NativeRegistry {
            functions: DashMap::new(),
        };
        object::register_natives(&registry);
        string::register_natives(&registry);
        system::register_natives(&registry);
        throwable::register_natives(&registry);
        registry
    }

    pub(crate) fn register(
        &self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        function: impl Fn(&mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> + Send + Sync + 'static,
    ) {
        self.functions.insert(
            (class_name.to_string(), name.to_string(), descriptor.to_string()),
            Arc::new(function),
        );
    }

    pub(crate) fn get(&self, class_name: &str, name: &str, descriptor: &str) -> Option<NativeFunction> {
        self.functions
            .get(&(class_name.to_string(), name.to_string(), descriptor.to_string()))
            .map(|function| Arc::clone(function.value()))
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("functions", &self.functions.len())
            .finish()
    }
}

/// What a native method sees: its arguments (`this` first for instance methods, one
/// entry per argument) and the thread it runs on.
pub struct NativeEnv<'a, 'r> {
    pub args: Vec<Value>,
    pub class: Arc<Class>,
    method_index: usize,
    thread: &'a mut Thread<'r>,
}

macro_rules! arg_accessors {
    ($($name:ident => $variant:ident($ty:ty), $expected:literal;)*) => {
        $(
            pub fn $name(&self, index: usize) -> Result<$ty> {
                match self.args.get(index) {
                    Some(Value::$variant(v)) => Ok(v.clone()),
                    other => Err(self.bad_argument(index, $expected, other)),
                }
            }
        )*
    };
}

impl<'a, 'r> NativeEnv<'a, 'r> {
    pub(crate) fn new(
        thread: &'a mut Thread<'r>,
        class: Arc<Class>,
        method_index: usize,
        args: Vec<Value>,
    ) -> Self {
        NativeEnv {
            args,
            class,
            method_index,
            thread,
        }
    }

    pub fn method(&self) -> &MethodInfo {
        self.class.method(self.method_index)
    }

    pub fn runtime(&self) -> &'r Runtime {
        self.thread.runtime()
    }

    arg_accessors! {
        int => Int(i32), "int";
        long => Long(i64), "long";
        float => Float(f32), "float";
        double => Double(f64), "double";
        reference => Reference(Option<ObjectRef>), "reference";
    }

    /// The receiver of an instance native.
    pub fn this(&self) -> Result<ObjectRef> {
        self.reference(0)?
            .ok_or_else(|| Error::vm(format!("{} called without a receiver", self.describe())))
    }

    fn bad_argument(&self, index: usize, expected: &str, found: Option<&Value>) -> Error {
        Error::vm(format!(
            "{}: argument {index} should be {expected}, found {}",
            self.describe(),
            found.map_or("nothing", Value::kind)
        ))
    }

    fn describe(&self) -> String {
        let method = self.method();
        format!("{}.{}{}", self.class.class_name, method.name, method.descriptor_str)
    }

    pub fn new_string(&self, value: &str) -> ObjectRef {
        self.thread.new_string(value)
    }

    pub fn intern(&self, value: &str) -> ObjectRef {
        self.thread.intern(value)
    }

    /// A throwable of the built-in class `class_name`, ready to be returned as the error.
    pub fn throw(&mut self, class_name: &str, message: Option<&str>) -> Exception {
        self.thread.new_exception(class_name, message)
    }

    pub fn resolve_class(&self, class_name: &str) -> Result<Arc<Class>> {
        self.thread.resolve_class(class_name)
    }

    /// Calls `name` + `descriptor` on `receiver`, dispatching on its class.
    pub fn invoke_virtual(
        &mut self,
        receiver: ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        self.thread.invoke_virtual(receiver, name, descriptor, args)
    }

    /// Runs the static initialization of `class` if it has not run yet.
    pub fn initialize_class(&mut self, class: &Arc<Class>) -> NativeResult<()> {
        initialize_class(self.thread, class)
    }

    /// Calls a static method, initializing its class first.
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        let class = self.resolve_class(class_name)?;
        self.initialize_class(&class)?;
        let index = class
            .declared_method(name, descriptor)
            .filter(|index| class.method(*index).is_static())
            .ok_or_else(|| Error::NoSuchMethod {
                class_name: class_name.to_string(),
                method: format!("{name}{descriptor}"),
            })?;
        self.thread.invoke(class, index, to_slots(args))
    }

    /// What `String.valueOf(object)` gives: `"null"`, the string itself, or the
    /// result of `toString()`.
    pub fn to_java_string(&mut self, object: Option<ObjectRef>) -> NativeResult<String> {
        let Some(object) = object else {
            return Ok("null".to_string());
        };
        if let Some(value) = object.as_str() {
            return Ok(value.to_string());
        }
        let result = self.invoke_virtual(object, "toString", "()Ljava/lang/String;", Vec::new())?;
        Ok(match result {
            Some(Value::Reference(Some(string))) => string.as_str().unwrap_or("null").to_string(),
            _ => "null".to_string(),
        })
    }

    /// The content of a `java/lang/String` argument, `None` for null.
    pub fn string(&self, index: usize) -> Result<Option<Arc<str>>> {
        match self.reference(index)? {
            None => Ok(None),
            Some(object) => object.string().map(Some).ok_or_else(|| {
                self.bad_argument(index, STRING_CLASS, self.args.get(index))
            }),
        }
    }
}

/// `Double.toString` formatting.
pub(crate) fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        decimal(value.to_string())
    } else {
        scientific(format!("{value:e}"))
    }
}

/// `Float.toString` formatting.
pub(crate) fn format_float(value: f32) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude == 0.0 || (1e-3..1e7).contains(&magnitude) {
        decimal(value.to_string())
    } else {
        scientific(format!("{value:e}"))
    }
}

fn decimal(mut digits: String) -> String {
    if !digits.contains('.') {
        digits.push_str(".0");
    }
    digits
}

fn scientific(formatted: String) -> String {
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => format!("{}E{exponent}", decimal(mantissa.to_string())),
        None => formatted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_formats_doubles_like_java() {
        assert_eq!(format_double(1.0), "1.0");
        assert_eq!(format_double(-0.0), "-0.0");
        assert_eq!(format_double(0.1), "0.1");
        assert_eq!(format_double(123456.5), "123456.5");
        assert_eq!(format_double(1e7), "1.0E7");
        assert_eq!(format_double(1.5e-5), "1.5E-5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_formats_floats_like_java() {
        assert_eq!(format_float(2.5), "2.5");
        assert_eq!(format_float(3.0), "3.0");
        assert_eq!(format_float(1e10), "1.0E10");
        assert_eq!(format_float(f32::INFINITY), "Infinity");
    }
}
