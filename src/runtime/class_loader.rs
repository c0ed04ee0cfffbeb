use std::{cell::Cell, collections::HashMap, sync::Arc};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::debug;

use crate::{
    class,
    consts::{CLINIT, FieldAccessFlag, MethodAccessFlag},
    descriptor::{FieldType, MethodDescriptor},
    error::{Error, Result},
    runtime::{
        AttributeInfo, Class, ClinitStatus, CodeAttribute, Const, ConstantPoolInfo,
        CpClassInfo, ExceptionTableItem, FieldInfo, MethodInfo, NativeResult, Thread, Value,
    },
};

mod bootstrap;
pub mod resolver;
pub mod source;

pub(crate) use bootstrap::BootstrapClassLoader;
pub use resolver::resolve_constant_pool;
pub use source::*;

/// Builds the runtime class from a parsed class file whose super class and
/// interfaces are already loaded. The vtable is left empty.
pub(crate) fn parse_class(
    class_file: &class::ClassFile,
    constant_pool: Vec<ConstantPoolInfo>,
    class_name: Arc<str>,
    super_class: Option<Arc<Class>>,
    interfaces: Vec<Arc<Class>>,
) -> Result<Class> {
    let mut static_fields_info = Vec::new();
    let mut instance_fields_info: Vec<FieldInfo> = super_class
        .as_ref()
        .map(|s| s.instance_fields_info.clone())
        .unwrap_or_default();

    for field in &class_file.fields {
        let mut field = parse_field(&constant_pool, field)?;
        if field.access_flags.contains(FieldAccessFlag::STATIC) {
            field.index = static_fields_info.len();
            static_fields_info.push(field);
        } else {
            field.index = instance_fields_info.len();
            instance_fields_info.push(field);
        }
    }

    let static_fields = static_fields_info
        .iter()
        .map(|f| RwLock::new(Value::zero(&f.descriptor)))
        .collect();

    let methods = class_file
        .methods
        .iter()
        .map(|m| parse_method(&constant_pool, m))
        .collect::<Result<Vec<_>>>()?;

    let attributes = class_file
        .attributes
        .iter()
        .map(|a| convert_attribute(&constant_pool, a))
        .collect::<Result<Vec<_>>>()?;

    Ok(Class {
        constant_pool,
        access_flags: class_file.access_flags,
        class_name,
        super_class,
        interfaces,
        static_fields_info,
        instance_fields_info,
        methods,
        attributes,
        static_fields,
        array_component: None,
        array_element_class: None,
        clinit_call: ReentrantMutex::new(Cell::new(ClinitStatus::NotInit)),
        vtable: HashMap::new(),
    })
}

pub(crate) fn resolve_cp_utf8(cp: &[ConstantPoolInfo], index: u16) -> Result<Arc<str>> {
    match constant(cp, index)? {
        ConstantPoolInfo::Utf8(s) => Ok(Arc::clone(s)),
        other => Err(Error::unresolved(
            index,
            format!("expected Utf8, found {}", other.kind()),
        )),
    }
}

pub(crate) fn resolve_cp_class(cp: &[ConstantPoolInfo], index: u16) -> Result<&CpClassInfo> {
    match constant(cp, index)? {
        ConstantPoolInfo::Class(info) => Ok(info),
        other => Err(Error::unresolved(
            index,
            format!("expected Class, found {}", other.kind()),
        )),
    }
}

fn constant(cp: &[ConstantPoolInfo], index: u16) -> Result<&ConstantPoolInfo> {
    match (index as usize).checked_sub(1).and_then(|i| cp.get(i)) {
        None | Some(ConstantPoolInfo::Empty) => Err(Error::unresolved(index, "no usable constant")),
        Some(c) => Ok(c),
    }
}

fn parse_field(cp: &[ConstantPoolInfo], field: &class::FieldInfo) -> Result<FieldInfo> {
    let name = resolve_cp_utf8(cp, field.name_index)?;
    let descriptor = resolve_cp_utf8(cp, field.descriptor_index)?;
    let descriptor = FieldType::parse(&descriptor).ok_or_else(|| {
        Error::unresolved(
            field.descriptor_index,
            format!("bad field descriptor {descriptor} for {name}"),
        )
    })?;
    let attributes = field
        .attributes
        .iter()
        .map(|a| convert_attribute(cp, a))
        .collect::<Result<Vec<_>>>()?;

    Ok(FieldInfo {
        access_flags: field.access_flags,
        name,
        descriptor,
        attributes,
        index: 0,
    })
}

fn parse_method(cp: &[ConstantPoolInfo], method: &class::MethodInfo) -> Result<MethodInfo> {
    let name = resolve_cp_utf8(cp, method.name_index)?;
    let descriptor_str = resolve_cp_utf8(cp, method.descriptor_index)?;
    let descriptor = MethodDescriptor::parse(&descriptor_str).ok_or_else(|| {
        Error::unresolved(
            method.descriptor_index,
            format!("bad method descriptor {descriptor_str} for {name}"),
        )
    })?;

    let mut code = None;
    let mut attributes = Vec::new();
    for attribute in &method.attributes {
        match attribute {
            class::AttributeInfo::Code { code: raw, .. } => {
                code = Some(Arc::new(convert_code(cp, raw, &name)?));
            }
            other => attributes.push(convert_attribute(cp, other)?),
        }
    }

    let bodyless = method
        .access_flags
        .intersects(MethodAccessFlag::NATIVE | MethodAccessFlag::ABSTRACT);
    match (&code, bodyless) {
        (None, false) => {
            return Err(Error::malformed(format!(
                "method {name}{descriptor_str} has no Code attribute"
            )));
        }
        (Some(_), true) => {
            return Err(Error::malformed(format!(
                "native or abstract method {name}{descriptor_str} has a Code attribute"
            )));
        }
        _ => {}
    }

    Ok(MethodInfo {
        access_flags: method.access_flags,
        name,
        descriptor,
        descriptor_str,
        code,
        attributes,
    })
}

fn convert_code(cp: &[ConstantPoolInfo], code: &class::CodeAttribute, method: &str) -> Result<CodeAttribute> {
    let len = code.code.len();
    let exception_table = code
        .exception_table
        .iter()
        .map(|entry| {
            let (start, end, handler) = (
                entry.start_pc as usize,
                entry.end_pc as usize,
                entry.handler_pc as usize,
            );
            if start >= end || end > len || handler >= len {
                return Err(Error::malformed(format!(
                    "bad exception table entry [{start}, {end}) -> {handler} in {method}"
                )));
            }
            let catch_type = match entry.catch_type {
                0 => None,
                index => Some(Arc::clone(&resolve_cp_class(cp, index)?.name)),
            };
            Ok(ExceptionTableItem {
                start_pc: start,
                end_pc: end,
                handler_pc: handler,
                catch_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CodeAttribute {
        max_stack: code.max_stack as usize,
        max_locals: code.max_locals as usize,
        code: code.code.clone(),
        exception_table,
    })
}

fn convert_attribute(cp: &[ConstantPoolInfo], attribute: &class::AttributeInfo) -> Result<AttributeInfo> {
    let (name_index, info) = match attribute {
        class::AttributeInfo::Raw { name_index, info } => (*name_index, info.as_slice()),
        class::AttributeInfo::Code { name_index, .. } => {
            return Ok(AttributeInfo::Unknown {
                name: resolve_cp_utf8(cp, *name_index)?,
                info: Arc::from([]),
            });
        }
    };
    let name = resolve_cp_utf8(cp, name_index)?;
    let attribute = match name.as_ref() {
        "ConstantValue" => {
            let index = attribute_index(&name, info)?;
            let value = match constant(cp, index)? {
                ConstantPoolInfo::Integer(v) => Const::Int(*v),
                ConstantPoolInfo::Long(v) => Const::Long(*v),
                ConstantPoolInfo::Float(v) => Const::Float(*v),
                ConstantPoolInfo::Double(v) => Const::Double(*v),
                ConstantPoolInfo::String(s) => Const::String(Arc::clone(s)),
                other => {
                    return Err(Error::unresolved(
                        index,
                        format!("{} cannot be a constant value", other.kind()),
                    ));
                }
            };
            AttributeInfo::ConstantValue(value)
        }
        "SourceFile" => AttributeInfo::SourceFile(resolve_cp_utf8(cp, attribute_index(&name, info)?)?),
        _ => AttributeInfo::Unknown {
            name,
            info: Arc::from(info),
        },
    };
    Ok(attribute)
}

fn attribute_index(name: &str, info: &[u8]) -> Result<u16> {
    match info {
        [hi, lo] => Ok(u16::from_be_bytes([*hi, *lo])),
        _ => Err(Error::malformed(format!(
            "{name} attribute must be 2 bytes, got {}",
            info.len()
        ))),
    }
}

/// Runs the static initialization of `class` unless it already ran or is running
/// on this thread: superclass first, then `ConstantValue` fields, then `<clinit>`.
pub(crate) fn initialize_class(thread: &mut Thread<'_>, class: &Arc<Class>) -> NativeResult<()> {
    let clinit_call = class.clinit_call.lock();
    match clinit_call.get() {
        ClinitStatus::Init | ClinitStatus::InProgress => return Ok(()),
        ClinitStatus::Failed => {
            return Err(Error::ClassInitialization(class.class_name.to_string()).into());
        }
        ClinitStatus::NotInit => {}
    }
    clinit_call.set(ClinitStatus::InProgress);

    let result = run_initializer(thread, class);
    match &result {
        Ok(()) => {
            clinit_call.set(ClinitStatus::Init);
            debug!(class = %class.class_name, "initialized class");
        }
        Err(_) => {
            clinit_call.set(ClinitStatus::Failed);
            debug!(class = %class.class_name, "class initialization failed");
        }
    }
    result
}

fn run_initializer(thread: &mut Thread<'_>, class: &Arc<Class>) -> NativeResult<()> {
    if let Some(super_class) = &class.super_class {
        initialize_class(thread, super_class)?;
    }

    for field in &class.static_fields_info {
        let Some(constant) = field.constant_value() else {
            continue;
        };
        let value = match constant {
            Const::Int(v) => Value::Int(*v),
            Const::Long(v) => Value::Long(*v),
            Const::Float(v) => Value::Float(*v),
            Const::Double(v) => Value::Double(*v),
            Const::String(s) => Value::Reference(Some(thread.intern(s))),
        };
        class.set_static_field(field.index, value)?;
    }

    if let Some(index) = class.declared_method(CLINIT, "()V") {
        thread.invoke(Arc::clone(class), index, Vec::new())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        class::{ClassBuilder, ConstantValue},
        consts::{ARITHMETIC_EXCEPTION, OBJECT_CLASS},
        instructions as inst,
        runtime::{Exception, Runtime},
    };

    const STATIC: FieldAccessFlag = FieldAccessFlag::STATIC;

    fn counting_class(name: &str, super_name: &str) -> Vec<u8> {
        ClassBuilder::new(name, Some(super_name))
            .field(STATIC, "count", "I")
            .constant_field(
                STATIC.union(FieldAccessFlag::FINAL),
                "GREETING",
                "Ljava/lang/String;",
                ConstantValue::String("hi".into()),
            )
            .method(MethodAccessFlag::STATIC, CLINIT, "()V", |c| {
                c.getstatic(name, "count", "I")
                    .iconst(1)
                    .insn(inst::IADD)
                    .putstatic(name, "count", "I")
                    .insn(inst::RETURN);
            })
            .to_bytes()
            .unwrap()
    }

    fn static_value(class: &Arc<Class>, name: &str) -> Value {
        let (owner, index) = class.static_field(name).unwrap();
        owner.get_static_field(index).unwrap()
    }

    #[test]
    fn test_clinit_runs_once() {
        let runtime = Runtime::builder()
            .class("Base", counting_class("Base", OBJECT_CLASS))
            .class("Derived", counting_class("Derived", "Base"))
            .build()
            .unwrap();
        let derived = runtime.load_class("Derived").unwrap();
        let base = runtime.load_class("Base").unwrap();
        assert_eq!(base.clinit_status(), ClinitStatus::NotInit);

        let mut thread = runtime.thread();
        initialize_class(&mut thread, &derived).unwrap();
        initialize_class(&mut thread, &derived).unwrap();
        initialize_class(&mut thread, &base).unwrap();

        assert_eq!(base.clinit_status(), ClinitStatus::Init);
        assert_eq!(static_value(&derived, "count"), Value::Int(1));
        assert_eq!(static_value(&base, "count"), Value::Int(1));
        match static_value(&derived, "GREETING") {
            Value::Reference(Some(greeting)) => {
                assert_eq!(greeting.as_str(), Some("hi"));
                assert!(greeting.ptr_eq(&thread.intern("hi")));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failed_clinit_poisons_the_class() {
        let bytes = ClassBuilder::new("Bad", Some(OBJECT_CLASS))
            .field(STATIC, "x", "I")
            .method(MethodAccessFlag::STATIC, CLINIT, "()V", |c| {
                c.iconst(1)
                    .iconst(0)
                    .insn(inst::IDIV)
                    .putstatic("Bad", "x", "I")
                    .insn(inst::RETURN);
            })
            .to_bytes()
            .unwrap();
        let runtime = Runtime::builder().class("Bad", bytes).build().unwrap();
        let class = runtime.load_class("Bad").unwrap();
        let mut thread = runtime.thread();

        match initialize_class(&mut thread, &class) {
            Err(Exception::Java(exception)) => assert_eq!(exception.class_name(), ARITHMETIC_EXCEPTION),
            _ => panic!("expected ArithmeticException"),
        }
        assert_eq!(class.clinit_status(), ClinitStatus::Failed);
        assert!(matches!(
            initialize_class(&mut thread, &class),
            Err(Exception::Fatal(Error::ClassInitialization(name))) if name == "Bad"
        ));
    }
}
