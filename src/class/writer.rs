use crate::{
    class::{
        AttributeInfo, ClassFile, CodeAttribute, ConstantPoolInfo, ExceptionTableEntry,
        FieldInfo, MethodInfo, encode_modified_utf8,
    },
    consts::{ClassAccessFlag, FieldAccessFlag, MAGIC, MethodAccessFlag},
    descriptor::{FieldType, MethodDescriptor},
    error::{Error, Result},
    instructions as inst,
};

const DEFAULT_MAJOR_VERSION: u16 = 52;

/// Serializes a class file. Parsing the output yields an equal [`ClassFile`].
pub fn write_class(class: &ClassFile) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    put_u16(&mut out, class.minor_version);
    put_u16(&mut out, class.major_version);

    put_u16(&mut out, class.constant_pool.len() as u16 + 1);
    for constant in &class.constant_pool {
        write_constant(&mut out, constant);
    }

    put_u16(&mut out, class.access_flags.bits());
    put_u16(&mut out, class.this_class);
    put_u16(&mut out, class.super_class);
    put_u16(&mut out, class.interfaces.len() as u16);
    for &interface in &class.interfaces {
        put_u16(&mut out, interface);
    }

    put_u16(&mut out, class.fields.len() as u16);
    for field in &class.fields {
        put_u16(&mut out, field.access_flags.bits());
        put_u16(&mut out, field.name_index);
        put_u16(&mut out, field.descriptor_index);
        write_attributes(&mut out, &field.attributes);
    }

    put_u16(&mut out, class.methods.len() as u16);
    for method in &class.methods {
        put_u16(&mut out, method.access_flags.bits());
        put_u16(&mut out, method.name_index);
        put_u16(&mut out, method.descriptor_index);
        write_attributes(&mut out, &method.attributes);
    }

    write_attributes(&mut out, &class.attributes);
    out
}

fn put_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn put_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_constant(out: &mut Vec<u8>, constant: &ConstantPoolInfo) {
    if let ConstantPoolInfo::Empty = constant {
        return;
    }
    out.push(constant.tag());
    match constant {
        ConstantPoolInfo::Empty => {}
        ConstantPoolInfo::Utf8(bytes) => {
            put_u16(out, bytes.len() as u16);
            out.extend_from_slice(bytes);
        }
        ConstantPoolInfo::Integer(value) => out.extend_from_slice(&value.to_be_bytes()),
        ConstantPoolInfo::Float(value) => out.extend_from_slice(&value.to_bits().to_be_bytes()),
        ConstantPoolInfo::Long(value) => out.extend_from_slice(&value.to_be_bytes()),
        ConstantPoolInfo::Double(value) => out.extend_from_slice(&value.to_bits().to_be_bytes()),
        ConstantPoolInfo::Class { name_index }
        | ConstantPoolInfo::Module { name_index }
        | ConstantPoolInfo::Package { name_index } => put_u16(out, *name_index),
        ConstantPoolInfo::String { string_index } => put_u16(out, *string_index),
        ConstantPoolInfo::Fieldref {
            class_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::Methodref {
            class_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        } => {
            put_u16(out, *class_index);
            put_u16(out, *name_and_type_index);
        }
        ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        } => {
            put_u16(out, *name_index);
            put_u16(out, *descriptor_index);
        }
        ConstantPoolInfo::MethodHandle {
            reference_kind,
            reference_index,
        } => {
            out.push(*reference_kind);
            put_u16(out, *reference_index);
        }
        ConstantPoolInfo::MethodType { descriptor_index } => put_u16(out, *descriptor_index),
        ConstantPoolInfo::Dynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        }
        | ConstantPoolInfo::InvokeDynamic {
            bootstrap_method_attr_index,
            name_and_type_index,
        } => {
            put_u16(out, *bootstrap_method_attr_index);
            put_u16(out, *name_and_type_index);
        }
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[AttributeInfo]) {
    put_u16(out, attributes.len() as u16);
    for attribute in attributes {
        write_attribute(out, attribute);
    }
}

fn write_attribute(out: &mut Vec<u8>, attribute: &AttributeInfo) {
    match attribute {
        AttributeInfo::Raw { name_index, info } => {
            put_u16(out, *name_index);
            put_u32(out, info.len() as u32);
            out.extend_from_slice(info);
        }
        AttributeInfo::Code { name_index, code } => {
            let mut body = Vec::new();
            put_u16(&mut body, code.max_stack);
            put_u16(&mut body, code.max_locals);
            put_u32(&mut body, code.code.len() as u32);
            body.extend_from_slice(&code.code);
            put_u16(&mut body, code.exception_table.len() as u16);
            for entry in &code.exception_table {
                put_u16(&mut body, entry.start_pc);
                put_u16(&mut body, entry.end_pc);
                put_u16(&mut body, entry.handler_pc);
                put_u16(&mut body, entry.catch_type);
            }
            write_attributes(&mut body, &code.attributes);

            put_u16(out, *name_index);
            put_u32(out, body.len() as u32);
            out.extend_from_slice(&body);
        }
    }
}

/// Appends constants, reusing an existing index for an equal entry.
#[derive(Debug, Default)]
pub struct ConstantPoolBuilder {
    entries: Vec<ConstantPoolInfo>,
}

impl ConstantPoolBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, entry: ConstantPoolInfo) -> u16 {
        if let Some(position) = self
            .entries
            .iter()
            .position(|existing| *existing == entry && entry != ConstantPoolInfo::Empty)
        {
            return position as u16 + 1;
        }
        let index = self.entries.len() as u16 + 1;
        let wide = entry.is_wide();
        self.entries.push(entry);
        if wide {
            self.entries.push(ConstantPoolInfo::Empty);
        }
        index
    }

    pub fn utf8(&mut self, s: &str) -> u16 {
        self.add(ConstantPoolInfo::Utf8(encode_modified_utf8(s)))
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        self.add(ConstantPoolInfo::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> u16 {
        self.add(ConstantPoolInfo::Float(value))
    }

    pub fn long(&mut self, value: i64) -> u16 {
        self.add(ConstantPoolInfo::Long(value))
    }

    pub fn double(&mut self, value: f64) -> u16 {
        self.add(ConstantPoolInfo::Double(value))
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name_index = self.utf8(name);
        self.add(ConstantPoolInfo::Class { name_index })
    }

    pub fn string(&mut self, value: &str) -> u16 {
        let string_index = self.utf8(value);
        self.add(ConstantPoolInfo::String { string_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.utf8(name);
        let descriptor_index = self.utf8(descriptor);
        self.add(ConstantPoolInfo::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.add(ConstantPoolInfo::Fieldref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.add(ConstantPoolInfo::Methodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class(class);
        let name_and_type_index = self.name_and_type(name, descriptor);
        self.add(ConstantPoolInfo::InterfaceMethodref {
            class_index,
            name_and_type_index,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_entries(self) -> Vec<ConstantPoolInfo> {
        self.entries
    }
}

/// Initial value of a static field, stored as a `ConstantValue` attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantValue {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
}

/// Assembles a class file in memory.
///
/// ```
/// use javaclass::{class::ClassBuilder, consts::MethodAccessFlag, instructions as inst};
///
/// let bytes = ClassBuilder::new("Adder", Some("java/lang/Object"))
///     .method(MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC, "add", "(II)I", |code| {
///         code.iload(0).iload(1).insn(inst::IADD).insn(inst::IRETURN);
///     })
///     .to_bytes()
///     .unwrap();
/// assert_eq!(&bytes[..4], &[0xca, 0xfe, 0xba, 0xbe]);
/// ```
#[derive(Debug)]
pub struct ClassBuilder {
    pool: ConstantPoolBuilder,
    minor_version: u16,
    major_version: u16,
    access_flags: ClassAccessFlag,
    this_class: u16,
    super_class: u16,
    interfaces: Vec<u16>,
    fields: Vec<FieldInfo>,
    methods: Vec<MethodInfo>,
    attributes: Vec<AttributeInfo>,
    error: Option<Error>,
}

impl ClassBuilder {
    pub fn new(name: &str, super_name: Option<&str>) -> Self {
        let mut pool = ConstantPoolBuilder::new();
        let this_class = pool.class(name);
        let super_class = super_name.map_or(0, |super_name| pool.class(super_name));
        ClassBuilder {
            pool,
            minor_version: 0,
            major_version: DEFAULT_MAJOR_VERSION,
            access_flags: ClassAccessFlag::PUBLIC | ClassAccessFlag::SUPER,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
            error: None,
        }
    }

    pub fn version(mut self, major: u16, minor: u16) -> Self {
        self.major_version = major;
        self.minor_version = minor;
        self
    }

    pub fn access_flags(mut self, access_flags: ClassAccessFlag) -> Self {
        self.access_flags = access_flags;
        self
    }

    pub fn interface(mut self, name: &str) -> Self {
        let index = self.pool.class(name);
        self.interfaces.push(index);
        self
    }

    pub fn field(mut self, access_flags: FieldAccessFlag, name: &str, descriptor: &str) -> Self {
        self.push_field(access_flags, name, descriptor, Vec::new());
        self
    }

    pub fn constant_field(
        mut self,
        access_flags: FieldAccessFlag,
        name: &str,
        descriptor: &str,
        value: ConstantValue,
    ) -> Self {
        let value_index = match &value {
            ConstantValue::Int(v) => self.pool.integer(*v),
            ConstantValue::Long(v) => self.pool.long(*v),
            ConstantValue::Float(v) => self.pool.float(*v),
            ConstantValue::Double(v) => self.pool.double(*v),
            ConstantValue::String(v) => self.pool.string(v),
        };
        let attribute = AttributeInfo::Raw {
            name_index: self.pool.utf8("ConstantValue"),
            info: value_index.to_be_bytes().to_vec(),
        };
        self.push_field(access_flags, name, descriptor, vec![attribute]);
        self
    }

    fn push_field(
        &mut self,
        access_flags: FieldAccessFlag,
        name: &str,
        descriptor: &str,
        attributes: Vec<AttributeInfo>,
    ) {
        if FieldType::parse(descriptor).is_none() {
            self.fail(format!("bad field descriptor {descriptor}"));
        }
        let name_index = self.pool.utf8(name);
        let descriptor_index = self.pool.utf8(descriptor);
        self.fields.push(FieldInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes,
        });
    }

    /// Adds a method whose body is emitted by `build`.
    pub fn method(
        mut self,
        access_flags: MethodAccessFlag,
        name: &str,
        descriptor: &str,
        build: impl FnOnce(&mut CodeBuilder<'_>),
    ) -> Self {
        let name_index = self.pool.utf8(name);
        let descriptor_index = self.pool.utf8(descriptor);
        let code_index = self.pool.utf8("Code");

        let mut code = CodeBuilder::new(
            &mut self.pool,
            access_flags.contains(MethodAccessFlag::STATIC),
            descriptor,
        );
        build(&mut code);
        match code.finish() {
            Ok(code) => self.methods.push(MethodInfo {
                access_flags,
                name_index,
                descriptor_index,
                attributes: vec![AttributeInfo::Code {
                    name_index: code_index,
                    code,
                }],
            }),
            Err(e) => self.fail(format!("method {name}{descriptor}: {e}")),
        }
        self
    }

    /// Adds a method without a body, flagged `native`.
    pub fn native_method(self, access_flags: MethodAccessFlag, name: &str, descriptor: &str) -> Self {
        self.bodyless_method(access_flags | MethodAccessFlag::NATIVE, name, descriptor)
    }

    pub fn abstract_method(self, access_flags: MethodAccessFlag, name: &str, descriptor: &str) -> Self {
        self.bodyless_method(access_flags | MethodAccessFlag::ABSTRACT, name, descriptor)
    }

    fn bodyless_method(mut self, access_flags: MethodAccessFlag, name: &str, descriptor: &str) -> Self {
        if MethodDescriptor::parse(descriptor).is_none() {
            self.fail(format!("bad method descriptor {descriptor}"));
        }
        let name_index = self.pool.utf8(name);
        let descriptor_index = self.pool.utf8(descriptor);
        self.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes: Vec::new(),
        });
        self
    }

    pub fn source_file(mut self, file_name: &str) -> Self {
        let name_index = self.pool.utf8("SourceFile");
        let file_index = self.pool.utf8(file_name);
        self.attributes.push(AttributeInfo::Raw {
            name_index,
            info: file_index.to_be_bytes().to_vec(),
        });
        self
    }

    fn fail(&mut self, message: String) {
        if self.error.is_none() {
            self.error = Some(Error::IllegalArgument(message));
        }
    }

    pub fn build(self) -> Result<ClassFile> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.pool.len() >= u16::MAX as usize {
            return Err(Error::IllegalArgument("constant pool is too large".into()));
        }
        Ok(ClassFile {
            minor_version: self.minor_version,
            major_version: self.major_version,
            constant_pool: self.pool.into_entries(),
            access_flags: self.access_flags,
            this_class: self.this_class,
            super_class: self.super_class,
            interfaces: self.interfaces,
            fields: self.fields,
            methods: self.methods,
            attributes: self.attributes,
        })
    }

    pub fn to_bytes(self) -> Result<Vec<u8>> {
        Ok(write_class(&self.build()?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Default)]
struct LabelState {
    offset: Option<usize>,
    depth: Option<i32>,
}

#[derive(Debug)]
struct Fixup {
    label: Label,
    insn_start: usize,
    at: usize,
    wide: bool,
}

#[derive(Debug)]
struct Handler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: u16,
}

/// Emits a method body. Operand stack depth is tracked per emitted instruction to
/// compute `max_stack`; `max_locals` grows with every local slot touched.
///
/// Exception handlers should be registered with [`CodeBuilder::try_catch`] before
/// their handler label is bound.
#[derive(Debug)]
pub struct CodeBuilder<'a> {
    pool: &'a mut ConstantPoolBuilder,
    code: Vec<u8>,
    labels: Vec<LabelState>,
    fixups: Vec<Fixup>,
    handlers: Vec<Handler>,
    depth: i32,
    max_depth: i32,
    reachable: bool,
    max_locals: u16,
    max_stack_override: Option<u16>,
    max_locals_override: Option<u16>,
    error: Option<Error>,
}

macro_rules! local_insns {
    ($($prefix:ident: $slots:literal),* $(,)?) => {
        paste::paste! {
            $(
                pub fn [<$prefix load>](&mut self, index: u16) -> &mut Self {
                    self.local_insn(inst::[<$prefix:upper LOAD>], inst::[<$prefix:upper LOAD_0>], index, $slots);
                    self.adjust(0, $slots);
                    self
                }

                pub fn [<$prefix store>](&mut self, index: u16) -> &mut Self {
                    self.adjust($slots, 0);
                    self.local_insn(inst::[<$prefix:upper STORE>], inst::[<$prefix:upper STORE_0>], index, $slots);
                    self
                }
            )*
        }
    };
}

impl<'a> CodeBuilder<'a> {
    fn new(pool: &'a mut ConstantPoolBuilder, is_static: bool, descriptor: &str) -> Self {
        let mut builder = CodeBuilder {
            pool,
            code: Vec::new(),
            labels: Vec::new(),
            fixups: Vec::new(),
            handlers: Vec::new(),
            depth: 0,
            max_depth: 0,
            reachable: true,
            max_locals: 0,
            max_stack_override: None,
            max_locals_override: None,
            error: None,
        };
        match MethodDescriptor::parse(descriptor) {
            Some(descriptor) => {
                builder.max_locals = (descriptor.parameter_slots() + usize::from(!is_static)) as u16
            }
            None => builder.fail(format!("bad method descriptor {descriptor}")),
        }
        builder
    }

    fn fail(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(Error::IllegalArgument(message.into()));
        }
    }

    fn adjust(&mut self, pop: i32, push: i32) {
        if !self.reachable {
            return;
        }
        if self.depth < pop {
            let at = self.code.len();
            self.fail(format!("operand stack underflow at {at}"));
            self.depth = 0;
        } else {
            self.depth -= pop;
        }
        self.depth += push;
        self.max_depth = self.max_depth.max(self.depth);
    }

    fn u16_operand(&mut self, value: u16) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn i32_operand(&mut self, value: i32) {
        self.code.extend_from_slice(&value.to_be_bytes());
    }

    fn touch_local(&mut self, index: u16, slots: u16) {
        self.max_locals = self.max_locals.max(index.saturating_add(slots));
    }

    fn local_insn(&mut self, op: u8, short_base: u8, index: u16, slots: u16) {
        self.touch_local(index, slots);
        if index <= 3 {
            self.code.push(short_base + index as u8);
        } else if index <= u8::MAX as u16 {
            self.code.push(op);
            self.code.push(index as u8);
        } else {
            self.code.push(inst::WIDE);
            self.code.push(op);
            self.u16_operand(index);
        }
    }

    local_insns!(i: 1, l: 2, f: 1, d: 2, a: 1);

    /// Emits an instruction without operands.
    pub fn insn(&mut self, op: u8) -> &mut Self {
        let Some((pop, push)) = simple_stack_effect(op) else {
            self.fail(format!("{} needs operands", inst::mnemonic(op)));
            return self;
        };
        self.adjust(pop, push);
        self.code.push(op);
        if matches!(op, inst::IRETURN..=inst::RETURN | inst::ATHROW) {
            self.reachable = false;
        }
        self
    }

    /// Pushes an int constant with the shortest encoding.
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        match value {
            -1..=5 => {
                self.adjust(0, 1);
                self.code.push((inst::ICONST_0 as i32 + value) as u8);
            }
            v if i8::try_from(v).is_ok() => {
                self.adjust(0, 1);
                self.code.push(inst::BIPUSH);
                self.code.push(v as i8 as u8);
            }
            v if i16::try_from(v).is_ok() => {
                self.adjust(0, 1);
                self.code.push(inst::SIPUSH);
                self.code.extend_from_slice(&(v as i16).to_be_bytes());
            }
            v => {
                let index = self.pool.integer(v);
                self.ldc_index(index);
            }
        }
        self
    }

    pub fn lconst(&mut self, value: i64) -> &mut Self {
        match value {
            0 | 1 => {
                self.adjust(0, 2);
                self.code.push(inst::LCONST_0 + value as u8);
            }
            v => {
                let index = self.pool.long(v);
                self.ldc2_index(index);
            }
        }
        self
    }

    pub fn fconst(&mut self, value: f32) -> &mut Self {
        if value.to_bits() == 0.0f32.to_bits() || value == 1.0 || value == 2.0 {
            self.adjust(0, 1);
            self.code.push(inst::FCONST_0 + value as u8);
        } else {
            let index = self.pool.float(value);
            self.ldc_index(index);
        }
        self
    }

    pub fn dconst(&mut self, value: f64) -> &mut Self {
        if value.to_bits() == 0.0f64.to_bits() || value == 1.0 {
            self.adjust(0, 2);
            self.code.push(inst::DCONST_0 + value as u8);
        } else {
            let index = self.pool.double(value);
            self.ldc2_index(index);
        }
        self
    }

    pub fn ldc_string(&mut self, value: &str) -> &mut Self {
        let index = self.pool.string(value);
        self.ldc_index(index);
        self
    }

    pub fn ldc_class(&mut self, name: &str) -> &mut Self {
        let index = self.pool.class(name);
        self.ldc_index(index);
        self
    }

    fn ldc_index(&mut self, index: u16) {
        self.adjust(0, 1);
        if index <= u8::MAX as u16 {
            self.code.push(inst::LDC);
            self.code.push(index as u8);
        } else {
            self.code.push(inst::LDC_W);
            self.u16_operand(index);
        }
    }

    fn ldc2_index(&mut self, index: u16) {
        self.adjust(0, 2);
        self.code.push(inst::LDC2_W);
        self.u16_operand(index);
    }

    pub fn iinc(&mut self, index: u16, delta: i16) -> &mut Self {
        self.touch_local(index, 1);
        match i8::try_from(delta) {
            Ok(delta) if index <= u8::MAX as u16 => {
                self.code.push(inst::IINC);
                self.code.push(index as u8);
                self.code.push(delta as u8);
            }
            _ => {
                self.code.push(inst::WIDE);
                self.code.push(inst::IINC);
                self.u16_operand(index);
                self.code.extend_from_slice(&delta.to_be_bytes());
            }
        }
        self
    }

    fn field_insn(&mut self, op: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let Some(field_type) = FieldType::parse(descriptor) else {
            self.fail(format!("bad field descriptor {descriptor}"));
            return self;
        };
        let slots = field_type.slots() as i32;
        match op {
            inst::GETSTATIC => self.adjust(0, slots),
            inst::PUTSTATIC => self.adjust(slots, 0),
            inst::GETFIELD => self.adjust(1, slots),
            _ => self.adjust(1 + slots, 0),
        }
        let index = self.pool.field_ref(class, name, descriptor);
        self.code.push(op);
        self.u16_operand(index);
        self
    }

    pub fn getstatic(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.field_insn(inst::GETSTATIC, class, name, descriptor)
    }

    pub fn putstatic(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.field_insn(inst::PUTSTATIC, class, name, descriptor)
    }

    pub fn getfield(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.field_insn(inst::GETFIELD, class, name, descriptor)
    }

    pub fn putfield(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.field_insn(inst::PUTFIELD, class, name, descriptor)
    }

    fn invoke(&mut self, op: u8, class: &str, name: &str, descriptor: &str) -> &mut Self {
        let Some(method) = MethodDescriptor::parse(descriptor) else {
            self.fail(format!("bad method descriptor {descriptor}"));
            return self;
        };
        let arguments = method.parameter_slots() + usize::from(op != inst::INVOKESTATIC);
        let returned = method.return_type.as_ref().map_or(0, FieldType::slots);
        self.adjust(arguments as i32, returned as i32);
        let index = if op == inst::INVOKEINTERFACE {
            self.pool.interface_method_ref(class, name, descriptor)
        } else {
            self.pool.method_ref(class, name, descriptor)
        };
        self.code.push(op);
        self.u16_operand(index);
        if op == inst::INVOKEINTERFACE {
            self.code.push(arguments as u8);
            self.code.push(0);
        }
        self
    }

    pub fn invokevirtual(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(inst::INVOKEVIRTUAL, class, name, descriptor)
    }

    pub fn invokespecial(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(inst::INVOKESPECIAL, class, name, descriptor)
    }

    pub fn invokestatic(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(inst::INVOKESTATIC, class, name, descriptor)
    }

    pub fn invokeinterface(&mut self, class: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(inst::INVOKEINTERFACE, class, name, descriptor)
    }

    fn class_insn(&mut self, op: u8, class: &str, pop: i32) -> &mut Self {
        self.adjust(pop, 1);
        let index = self.pool.class(class);
        self.code.push(op);
        self.u16_operand(index);
        self
    }

    /// `new`: allocates an uninitialized instance of `class`.
    pub fn new_instance(&mut self, class: &str) -> &mut Self {
        self.class_insn(inst::NEW, class, 0)
    }

    pub fn anewarray(&mut self, component: &str) -> &mut Self {
        self.class_insn(inst::ANEWARRAY, component, 1)
    }

    pub fn checkcast(&mut self, class: &str) -> &mut Self {
        self.class_insn(inst::CHECKCAST, class, 1)
    }

    pub fn instanceof(&mut self, class: &str) -> &mut Self {
        self.class_insn(inst::INSTANCEOF, class, 1)
    }

    /// `atype` is one of the `T_*` codes in [`crate::instructions`].
    pub fn newarray(&mut self, atype: u8) -> &mut Self {
        self.adjust(1, 1);
        self.code.push(inst::NEWARRAY);
        self.code.push(atype);
        self
    }

    pub fn multianewarray(&mut self, descriptor: &str, dimensions: u8) -> &mut Self {
        self.adjust(dimensions as i32, 1);
        let index = self.pool.class(descriptor);
        self.code.push(inst::MULTIANEWARRAY);
        self.u16_operand(index);
        self.code.push(dimensions);
        self
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(LabelState::default());
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the current position.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        let offset = self.code.len();
        let state = &mut self.labels[label.0];
        if state.offset.is_some() {
            self.fail(format!("label {} bound twice", label.0));
            return self;
        }
        state.offset = Some(offset);
        if self.reachable {
            state.depth.get_or_insert(self.depth);
        } else {
            self.depth = state.depth.unwrap_or(0);
            self.reachable = true;
        }
        self
    }

    fn target_depth(&mut self, label: Label, depth: i32) {
        if self.reachable {
            self.labels[label.0].depth.get_or_insert(depth);
        }
    }

    fn branch_fixup(&mut self, label: Label, insn_start: usize, wide: bool) {
        self.fixups.push(Fixup {
            label,
            insn_start,
            at: self.code.len(),
            wide,
        });
        if wide {
            self.i32_operand(0);
        } else {
            self.u16_operand(0);
        }
    }

    /// Emits a branch (`if*`, `goto`, `jsr`) to `label`.
    pub fn jump(&mut self, op: u8, label: Label) -> &mut Self {
        let pop = match op {
            inst::IFEQ..=inst::IFLE | inst::IFNULL | inst::IFNONNULL => 1,
            inst::IF_ICMPEQ..=inst::IF_ACMPNE => 2,
            inst::GOTO | inst::JSR => 0,
            _ => {
                self.fail(format!("{} is not a branch", inst::mnemonic(op)));
                return self;
            }
        };
        self.adjust(pop, 0);
        let target_depth = if op == inst::JSR { self.depth + 1 } else { self.depth };
        self.target_depth(label, target_depth);
        let insn_start = self.code.len();
        self.code.push(op);
        self.branch_fixup(label, insn_start, false);
        if op == inst::GOTO {
            self.reachable = false;
        }
        self
    }

    pub fn ret(&mut self, index: u16) -> &mut Self {
        self.touch_local(index, 1);
        if index <= u8::MAX as u16 {
            self.code.push(inst::RET);
            self.code.push(index as u8);
        } else {
            self.code.push(inst::WIDE);
            self.code.push(inst::RET);
            self.u16_operand(index);
        }
        self.reachable = false;
        self
    }

    pub fn tableswitch(&mut self, low: i32, default: Label, targets: &[Label]) -> &mut Self {
        self.adjust(1, 0);
        let insn_start = self.code.len();
        self.code.push(inst::TABLESWITCH);
        self.pad();
        self.target_depth(default, self.depth);
        self.branch_fixup(default, insn_start, true);
        let high = low.wrapping_add(targets.len() as i32 - 1);
        self.i32_operand(low);
        self.i32_operand(high);
        for &target in targets {
            self.target_depth(target, self.depth);
            self.branch_fixup(target, insn_start, true);
        }
        self.reachable = false;
        self
    }

    pub fn lookupswitch(&mut self, default: Label, pairs: &[(i32, Label)]) -> &mut Self {
        self.adjust(1, 0);
        let insn_start = self.code.len();
        self.code.push(inst::LOOKUPSWITCH);
        self.pad();
        self.target_depth(default, self.depth);
        self.branch_fixup(default, insn_start, true);
        let mut pairs = pairs.to_vec();
        pairs.sort_by_key(|(key, _)| *key);
        self.i32_operand(pairs.len() as i32);
        for (key, target) in pairs {
            self.i32_operand(key);
            self.target_depth(target, self.depth);
            self.branch_fixup(target, insn_start, true);
        }
        self.reachable = false;
        self
    }

    fn pad(&mut self) {
        while self.code.len() % 4 != 0 {
            self.code.push(0);
        }
    }

    /// Registers a handler for `[start, end)`. `catch_type` of `None` catches everything.
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> &mut Self {
        let catch_type = catch_type.map_or(0, |name| self.pool.class(name));
        self.labels[handler.0].depth.get_or_insert(1);
        self.handlers.push(Handler {
            start,
            end,
            handler,
            catch_type,
        });
        self
    }

    /// Appends bytes verbatim without stack accounting.
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.max_stack_override = Some(max_stack);
        self
    }

    pub fn max_locals(&mut self, max_locals: u16) -> &mut Self {
        self.max_locals_override = Some(max_locals);
        self
    }

    fn label_offset(&self, label: Label) -> Result<usize> {
        self.labels[label.0]
            .offset
            .ok_or_else(|| Error::IllegalArgument(format!("label {} is never bound", label.0)))
    }

    fn finish(mut self) -> Result<CodeAttribute> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if self.code.len() > u16::MAX as usize {
            return Err(Error::IllegalArgument("method body is too large".into()));
        }
        for fixup in &self.fixups {
            let offset = self.label_offset(fixup.label)? as i64 - fixup.insn_start as i64;
            if fixup.wide {
                self.code[fixup.at..fixup.at + 4].copy_from_slice(&(offset as i32).to_be_bytes());
            } else {
                let offset = i16::try_from(offset).map_err(|_| {
                    Error::IllegalArgument(format!("branch offset {offset} out of range"))
                })?;
                self.code[fixup.at..fixup.at + 2].copy_from_slice(&offset.to_be_bytes());
            }
        }
        let mut exception_table = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            exception_table.push(ExceptionTableEntry {
                start_pc: self.label_offset(handler.start)? as u16,
                end_pc: self.label_offset(handler.end)? as u16,
                handler_pc: self.label_offset(handler.handler)? as u16,
                catch_type: handler.catch_type,
            });
        }
        let max_stack = self.max_depth as u16;
        let max_locals = self.max_locals;
        Ok(CodeAttribute {
            max_stack: self.max_stack_override.unwrap_or(max_stack),
            max_locals: self.max_locals_override.unwrap_or(max_locals),
            code: self.code,
            exception_table,
            attributes: Vec::new(),
        })
    }
}

/// (popped, pushed) slots of an instruction that takes no operands.
fn simple_stack_effect(op: u8) -> Option<(i32, i32)> {
    use inst::*;
    let effect = match op {
        NOP => (0, 0),
        ACONST_NULL | ICONST_M1..=ICONST_5 | FCONST_0..=FCONST_2 => (0, 1),
        LCONST_0 | LCONST_1 | DCONST_0 | DCONST_1 => (0, 2),
        ILOAD_0..=ILOAD_3 | FLOAD_0..=FLOAD_3 | ALOAD_0..=ALOAD_3 => (0, 1),
        LLOAD_0..=LLOAD_3 | DLOAD_0..=DLOAD_3 => (0, 2),
        ISTORE_0..=ISTORE_3 | FSTORE_0..=FSTORE_3 | ASTORE_0..=ASTORE_3 => (1, 0),
        LSTORE_0..=LSTORE_3 | DSTORE_0..=DSTORE_3 => (2, 0),
        LALOAD | DALOAD => (2, 2),
        IALOAD..=SALOAD => (2, 1),
        LASTORE | DASTORE => (4, 0),
        IASTORE..=SASTORE => (3, 0),
        POP => (1, 0),
        POP2 => (2, 0),
        DUP => (1, 2),
        DUP_X1 => (2, 3),
        DUP_X2 => (3, 4),
        DUP2 => (2, 4),
        DUP2_X1 => (3, 5),
        DUP2_X2 => (4, 6),
        SWAP => (2, 2),
        IADD | ISUB | IMUL | IDIV | IREM | FADD | FSUB | FMUL | FDIV | FREM => (2, 1),
        LADD | LSUB | LMUL | LDIV | LREM | DADD | DSUB | DMUL | DDIV | DREM => (4, 2),
        INEG | FNEG => (1, 1),
        LNEG | DNEG => (2, 2),
        ISHL | ISHR | IUSHR | IAND | IOR | IXOR => (2, 1),
        LSHL | LSHR | LUSHR => (3, 2),
        LAND | LOR | LXOR => (4, 2),
        I2L | I2D | F2L | F2D => (1, 2),
        I2F | F2I | I2B | I2C | I2S => (1, 1),
        L2I | L2F | D2I | D2F => (2, 1),
        L2D | D2L => (2, 2),
        LCMP | DCMPL | DCMPG => (4, 1),
        FCMPL | FCMPG => (2, 1),
        IRETURN | FRETURN | ARETURN => (1, 0),
        LRETURN | DRETURN => (2, 0),
        RETURN => (0, 0),
        ARRAYLENGTH => (1, 1),
        ATHROW | MONITORENTER | MONITOREXIT => (1, 0),
        _ => return None,
    };
    Some(effect)
}
