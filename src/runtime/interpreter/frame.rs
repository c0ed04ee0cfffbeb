use std::sync::Arc;

use crate::{
    descriptor::FieldType,
    error::{Error, Result},
    runtime::{Class, CodeAttribute, MethodInfo, ObjectRef},
};

/// One local variable or operand stack slot. Long and double values are followed by
/// a `Top` slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Reference(Option<ObjectRef>),
    ReturnAddress(usize),
    Top,
}

impl Value {
    pub const NULL: Value = Value::Reference(None);

    /// The default value of a field or array element of type `field_type`.
    pub fn zero(field_type: &FieldType) -> Value {
        match field_type {
            FieldType::Boolean
            | FieldType::Byte
            | FieldType::Char
            | FieldType::Short
            | FieldType::Int => Value::Int(0),
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::NULL,
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Reference(_) => "reference",
            Value::ReturnAddress(_) => "returnAddress",
            Value::Top => "top",
        }
    }
}

/// Expands values into slot form, appending `Top` after every wide value.
pub(crate) fn to_slots(values: impl IntoIterator<Item = Value>) -> Vec<Value> {
    let mut slots = Vec::new();
    for value in values {
        let wide = value.is_wide();
        slots.push(value);
        if wide {
            slots.push(Value::Top);
        }
    }
    slots
}

/// Drops the `Top` filler slots again.
pub(crate) fn from_slots(slots: Vec<Value>) -> Vec<Value> {
    slots
        .into_iter()
        .filter(|v| !matches!(v, Value::Top))
        .collect()
}

pub struct Frame {
    pub(crate) class: Arc<Class>,
    pub(crate) method_index: usize,
    pub(crate) code: Arc<CodeAttribute>,
    // start of the current instruction
    pub(crate) pc: usize,
    // where to continue once a pending invocation returns
    pub(crate) resume_pc: usize,
    pub(crate) locals: Vec<Value>,
    pub(crate) stack: Vec<Value>,
    max_stack: usize,
    pub(crate) previous_frame: Option<Box<Frame>>,
}

macro_rules! typed_pop {
    ($($name:ident => $variant:ident($ty:ty), $expected:literal, $wide:literal;)*) => {
        $(
            pub(crate) fn $name(&mut self) -> Result<$ty> {
                if $wide {
                    self.pop_top()?;
                }
                match self.pop_slot()? {
                    Value::$variant(v) => Ok(v),
                    other => Err(self.mismatch($expected, &other)),
                }
            }
        )*
    };
}

impl Frame {
    /// Creates a frame for `class.methods[method_index]`. `args` are in slot form,
    /// `this` first for instance methods.
    pub fn new(class: Arc<Class>, method_index: usize, args: Vec<Value>) -> Result<Frame> {
        let method = class
            .methods
            .get(method_index)
            .ok_or_else(|| Error::vm(format!("{} has no method #{method_index}", class.class_name)))?;
        let code = method.code.as_ref().map(Arc::clone).ok_or_else(|| {
            Error::vm(format!(
                "{}.{}{} has no code",
                class.class_name, method.name, method.descriptor_str
            ))
        })?;
        if args.len() > code.max_locals {
            return Err(Error::vm(format!(
                "{}.{}{}: {} argument slots exceed max locals {}",
                class.class_name,
                method.name,
                method.descriptor_str,
                args.len(),
                code.max_locals
            )));
        }
        let mut locals = args;
        locals.resize(code.max_locals, Value::Top);
        let max_stack = code.max_stack;

        Ok(Frame {
            class,
            method_index,
            code,
            pc: 0,
            resume_pc: 0,
            locals,
            stack: Vec::with_capacity(max_stack),
            max_stack,
            previous_frame: None,
        })
    }

    pub fn method(&self) -> &MethodInfo {
        self.class.method(self.method_index)
    }

    /// Operand stack depth in slots.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn pc(&self) -> usize {
        self.pc
    }

    pub fn push_slot(&mut self, value: Value) -> Result<()> {
        if self.stack.len() >= self.max_stack {
            return Err(Error::vm(format!(
                "operand stack overflow in {}.{} (max {})",
                self.class.class_name,
                self.method().name,
                self.max_stack
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    /// Pushes a value, taking two slots if it is wide.
    pub fn push(&mut self, value: Value) -> Result<()> {
        let wide = value.is_wide();
        self.push_slot(value)?;
        if wide {
            self.push_slot(Value::Top)?;
        }
        Ok(())
    }

    pub fn pop_slot(&mut self) -> Result<Value> {
        self.stack.pop().ok_or_else(|| {
            Error::vm(format!(
                "operand stack underflow in {}.{}",
                self.class.class_name,
                self.method().name
            ))
        })
    }

    /// Pops one value, two slots if the top slot is the filler of a wide value.
    pub fn pop(&mut self) -> Result<Value> {
        match self.pop_slot()? {
            Value::Top => {
                let value = self.pop_slot()?;
                if value.is_wide() {
                    Ok(value)
                } else {
                    Err(self.mismatch("long or double", &value))
                }
            }
            value => Ok(value),
        }
    }

    /// Pops `count` slots, returning them bottom first.
    pub(crate) fn pop_slots(&mut self, count: usize) -> Result<Vec<Value>> {
        if count > self.stack.len() {
            return Err(Error::vm(format!(
                "operand stack underflow in {}.{}: need {count} slots, have {}",
                self.class.class_name,
                self.method().name,
                self.stack.len()
            )));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn pop_top(&mut self) -> Result<()> {
        match self.pop_slot()? {
            Value::Top => Ok(()),
            other => Err(self.mismatch("long or double", &other)),
        }
    }

    typed_pop! {
        pop_int => Int(i32), "int", false;
        pop_float => Float(f32), "float", false;
        pop_long => Long(i64), "long", true;
        pop_double => Double(f64), "double", true;
        pop_reference => Reference(Option<ObjectRef>), "reference", false;
    }

    /// Continues after a finished invocation, pushing its result if it has one.
    pub(crate) fn resume(&mut self, value: Option<Value>) -> Result<()> {
        if let Some(value) = value {
            self.push(value)?;
        }
        self.pc = self.resume_pc;
        Ok(())
    }

    pub fn local(&self, index: usize) -> Result<Value> {
        self.locals
            .get(index)
            .cloned()
            .ok_or_else(|| self.local_out_of_range(index))
    }

    /// Stores a value, writing `Top` into the following slot if it is wide.
    pub fn store(&mut self, index: usize, value: Value) -> Result<()> {
        let last = if value.is_wide() { index + 1 } else { index };
        if last >= self.locals.len() {
            return Err(self.local_out_of_range(last));
        }
        if value.is_wide() {
            self.locals[index + 1] = Value::Top;
        }
        self.locals[index] = value;
        Ok(())
    }

    fn local_out_of_range(&self, index: usize) -> Error {
        Error::vm(format!(
            "local variable {index} out of range in {}.{} (max {})",
            self.class.class_name,
            self.method().name,
            self.locals.len()
        ))
    }

    fn mismatch(&self, expected: &str, found: &Value) -> Error {
        Error::vm(format!(
            "type mismatch in {}.{} at pc {}: expected {expected}, found {}",
            self.class.class_name,
            self.method().name,
            self.pc,
            found.kind()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{class::ClassBuilder, consts::MethodAccessFlag, instructions as inst, runtime::Runtime};

    // a frame for `static long f(int, long)` with max_stack 2
    fn frame() -> Frame {
        let bytes = ClassBuilder::new("F", Some("java/lang/Object"))
            .method(MethodAccessFlag::STATIC, "f", "(IJ)J", |c| {
                c.lload(1).insn(inst::LRETURN);
            })
            .to_bytes()
            .unwrap();
        let runtime = Runtime::builder().class("F", bytes).build().unwrap();
        let class = runtime.load_class("F").unwrap();
        let index = class.declared_method("f", "(IJ)J").unwrap();
        Frame::new(class, index, to_slots([Value::Int(7), Value::Long(9)])).unwrap()
    }

    #[test]
    fn test_arguments_fill_locals() {
        let frame = frame();
        assert_eq!(frame.local(0).unwrap(), Value::Int(7));
        assert_eq!(frame.local(1).unwrap(), Value::Long(9));
        assert_eq!(frame.local(2).unwrap(), Value::Top);
        assert!(frame.local(3).is_err());
    }

    #[test]
    fn test_wide_values_take_two_slots() {
        let mut frame = frame();
        frame.push(Value::Long(-1)).unwrap();
        assert_eq!(frame.depth(), 2);
        assert!(frame.push(Value::Int(1)).is_err());
        assert_eq!(frame.pop_long().unwrap(), -1);
        assert_eq!(frame.depth(), 0);
        assert!(frame.pop().is_err());
    }

    #[test]
    fn test_typed_pop_rejects_mismatch() {
        let mut frame = frame();
        frame.push(Value::Float(1.5)).unwrap();
        assert!(frame.pop_int().is_err());
    }

    #[test]
    fn test_store_out_of_range() {
        let mut frame = frame();
        assert!(frame.store(2, Value::Double(1.0)).is_err());
        frame.store(0, Value::Int(3)).unwrap();
        assert_eq!(frame.local(0).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_pop_slots_is_bottom_first() {
        let mut frame = frame();
        frame.push(Value::Int(1)).unwrap();
        frame.push(Value::Int(2)).unwrap();
        assert_eq!(frame.pop_slots(2).unwrap(), vec![Value::Int(1), Value::Int(2)]);
        assert!(frame.pop_slots(1).is_err());
    }

    #[test]
    fn test_slot_conversion() {
        let slots = to_slots([Value::Double(2.0), Value::NULL]);
        assert_eq!(slots, vec![Value::Double(2.0), Value::Top, Value::NULL]);
        assert_eq!(from_slots(slots), vec![Value::Double(2.0), Value::NULL]);
    }
}
