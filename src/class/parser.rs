use crate::{
    class::{
        AttributeInfo, ClassFile, CodeAttribute, ConstantPoolInfo, ExceptionTableEntry,
        FieldInfo, MethodInfo, constant,
    },
    consts::{
        ClassAccessFlag, FieldAccessFlag, MAGIC, MAX_MAJOR_VERSION, MIN_MAJOR_VERSION,
        MethodAccessFlag,
    },
    error::{Error, Result},
};
use nom::{
    IResult, Parser,
    bytes::complete::{tag, take},
    combinator::eof,
    error_position,
    multi::count,
    number::complete::{be_f32, be_f64, be_i32, be_i64, be_u16, be_u32, u8},
};

const CODE_ATTRIBUTE: &[u8] = b"Code";

const KNOWN_ATTRIBUTES: &[&[u8]] = &[
    b"ConstantValue",
    b"Code",
    b"StackMapTable",
    b"Exceptions",
    b"InnerClasses",
    b"EnclosingMethod",
    b"Synthetic",
    b"Signature",
    b"SourceFile",
    b"SourceDebugExtension",
    b"LineNumberTable",
    b"LocalVariableTable",
    b"LocalVariableTypeTable",
    b"Deprecated",
    b"RuntimeVisibleAnnotations",
    b"RuntimeInvisibleAnnotations",
    b"RuntimeVisibleParameterAnnotations",
    b"RuntimeInvisibleParameterAnnotations",
    b"RuntimeVisibleTypeAnnotations",
    b"RuntimeInvisibleTypeAnnotations",
    b"AnnotationDefault",
    b"BootstrapMethods",
    b"MethodParameters",
    b"Module",
    b"ModulePackages",
    b"ModuleMainClass",
    b"NestHost",
    b"NestMembers",
    b"Record",
    b"PermittedSubclasses",
];

/// Parses a complete class file. Pure: the constant pool is not resolved and no other
/// class is consulted.
pub fn class_file(input: &[u8]) -> Result<ClassFile> {
    let (input, (minor, major)) = parse_header(input)?;
    if !(MIN_MAJOR_VERSION..=MAX_MAJOR_VERSION).contains(&major) {
        return Err(Error::malformed(format!(
            "unsupported class file version {major}.{minor}"
        )));
    }
    let (input, constant_pool) = parse_constant_pool(input)?;
    let (_, (access_flags, this_class, super_class, interfaces, fields, methods, attributes)) =
        parse_body(input)?;

    let mut class = ClassFile {
        major_version: major,
        minor_version: minor,
        access_flags: ClassAccessFlag::from_bits_retain(access_flags),
        this_class,
        super_class,
        constant_pool,
        interfaces,
        fields,
        methods,
        attributes,
    };
    check_indices(&class)?;
    decode_code_attributes(&mut class)?;
    Ok(class)
}

fn parse_header(input: &[u8]) -> IResult<&[u8], (u16, u16)> {
    let (input, _) = tag(&MAGIC as &[u8])(input)?;
    let (input, minor) = be_u16(input)?;
    let (input, major) = be_u16(input)?;
    Ok((input, (minor, major)))
}

type Body = (
    u16,
    u16,
    u16,
    Vec<u16>,
    Vec<FieldInfo>,
    Vec<MethodInfo>,
    Vec<AttributeInfo>,
);

fn parse_body(input: &[u8]) -> IResult<&[u8], Body> {
    let (input, access_flags) = be_u16(input)?;
    let (input, this_class) = be_u16(input)?;
    let (input, super_class) = be_u16(input)?;
    let (input, interfaces) = parse_interfaces(input)?;
    let (input, fields) = parse_fields(input)?;
    let (input, methods) = parse_methods(input)?;
    let (input, attributes) = parse_attributes(input)?;

    eof(input)?;

    Ok((
        input,
        (
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        ),
    ))
}

fn parse_constant_pool(input: &[u8]) -> IResult<&[u8], Vec<ConstantPoolInfo>> {
    let (input, constant_pool_count) = be_u16(input)?;
    // a zero count leaves no room for the reserved index 0
    if constant_pool_count == 0 {
        return Err(nom::Err::Failure(error_position!(
            input,
            nom::error::ErrorKind::Verify
        )));
    }
    let entries = constant_pool_count as usize - 1;

    let mut constant_pool = Vec::with_capacity(entries);

    let mut input = input;

    while constant_pool.len() < entries {
        let constant;
        (input, constant) = parse_constant(input)?;
        let need_empty = constant.is_wide();
        constant_pool.push(constant);
        if need_empty {
            constant_pool.push(ConstantPoolInfo::Empty);
        }
    }
    if constant_pool.len() > entries {
        return Err(nom::Err::Failure(error_position!(
            input,
            nom::error::ErrorKind::Verify
        )));
    }

    Ok((input, constant_pool))
}

fn parse_constant(mut input: &[u8]) -> IResult<&[u8], ConstantPoolInfo> {
    let tag;
    (input, tag) = u8(input)?;
    let cp_info = match tag {
        1 => {
            let length;
            (input, length) = be_u16(input)?;
            let bytes;
            (input, bytes) = take(length)(input)?;
            ConstantPoolInfo::Utf8(bytes.to_vec())
        }
        3 => {
            let int;
            (input, int) = be_i32(input)?;
            ConstantPoolInfo::Integer(int)
        }
        4 => {
            let float;
            (input, float) = be_f32(input)?;
            ConstantPoolInfo::Float(float)
        }
        5 => {
            let long;
            (input, long) = be_i64(input)?;
            ConstantPoolInfo::Long(long)
        }
        6 => {
            let double;
            (input, double) = be_f64(input)?;
            ConstantPoolInfo::Double(double)
        }
        7 => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Class { name_index }
        }
        8 => {
            let string_index;
            (input, string_index) = be_u16(input)?;
            ConstantPoolInfo::String { string_index }
        }
        9..=11 => {
            let (class_index, name_and_type_index);
            (input, class_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            match tag {
                9 => ConstantPoolInfo::Fieldref {
                    class_index,
                    name_and_type_index,
                },
                10 => ConstantPoolInfo::Methodref {
                    class_index,
                    name_and_type_index,
                },
                _ => ConstantPoolInfo::InterfaceMethodref {
                    class_index,
                    name_and_type_index,
                },
            }
        }
        12 => {
            let (name_index, descriptor_index);
            (input, name_index) = be_u16(input)?;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::NameAndType {
                name_index,
                descriptor_index,
            }
        }
        15 => {
            let (reference_kind, reference_index);
            (input, reference_kind) = u8(input)?;
            (input, reference_index) = be_u16(input)?;
            ConstantPoolInfo::MethodHandle {
                reference_kind,
                reference_index,
            }
        }
        16 => {
            let descriptor_index;
            (input, descriptor_index) = be_u16(input)?;
            ConstantPoolInfo::MethodType { descriptor_index }
        }
        17 | 18 => {
            let (bootstrap_method_attr_index, name_and_type_index);
            (input, bootstrap_method_attr_index) = be_u16(input)?;
            (input, name_and_type_index) = be_u16(input)?;
            if tag == 17 {
                ConstantPoolInfo::Dynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            } else {
                ConstantPoolInfo::InvokeDynamic {
                    bootstrap_method_attr_index,
                    name_and_type_index,
                }
            }
        }
        19 => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Module { name_index }
        }
        20 => {
            let name_index;
            (input, name_index) = be_u16(input)?;
            ConstantPoolInfo::Package { name_index }
        }
        _ => {
            return Err(nom::Err::Failure(error_position!(
                input,
                nom::error::ErrorKind::Tag
            )));
        }
    };
    Ok((input, cp_info))
}

fn parse_interfaces(input: &[u8]) -> IResult<&[u8], Vec<u16>> {
    let (input, interface_count) = be_u16(input)?;

    let (input, interfaces) = count(be_u16, interface_count as _).parse(input)?;

    Ok((input, interfaces))
}

fn parse_fields(input: &[u8]) -> IResult<&[u8], Vec<FieldInfo>> {
    let (input, field_count) = be_u16(input)?;
    let (input, fields) = count(parse_field, field_count as _).parse(input)?;
    Ok((input, fields))
}

fn parse_field(input: &[u8]) -> IResult<&[u8], FieldInfo> {
    let (input, access_flags) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;

    let (input, attributes) = parse_attributes(input)?;
    Ok((
        input,
        FieldInfo {
            access_flags: FieldAccessFlag::from_bits_retain(access_flags),
            name_index,
            descriptor_index,
            attributes,
        },
    ))
}

fn parse_attributes(input: &[u8]) -> IResult<&[u8], Vec<AttributeInfo>> {
    let (input, attributes_count) = be_u16(input)?;

    let (input, attributes) = count(parse_attribute, attributes_count as _).parse(input)?;

    Ok((input, attributes))
}

fn parse_attribute(input: &[u8]) -> IResult<&[u8], AttributeInfo> {
    let (input, name_index) = be_u16(input)?;
    let (input, attribute_length) = be_u32(input)?;
    let (input, info) = take(attribute_length)(input)?;

    Ok((
        input,
        AttributeInfo::Raw {
            name_index,
            info: info.to_vec(),
        },
    ))
}

fn parse_methods(input: &[u8]) -> IResult<&[u8], Vec<MethodInfo>> {
    let (input, methods_count) = be_u16(input)?;

    let (input, methods) = count(parse_method, methods_count as _).parse(input)?;

    Ok((input, methods))
}

fn parse_method(input: &[u8]) -> IResult<&[u8], MethodInfo> {
    let (input, access_flags) = be_u16(input)?;
    let (input, name_index) = be_u16(input)?;
    let (input, descriptor_index) = be_u16(input)?;
    let (input, attributes) = parse_attributes(input)?;

    Ok((
        input,
        MethodInfo {
            access_flags: MethodAccessFlag::from_bits_retain(access_flags),
            name_index,
            descriptor_index,
            attributes,
        },
    ))
}

fn parse_code_attribute(input: &[u8]) -> IResult<&[u8], CodeAttribute> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(parse_exception_table_entry, exception_table_length as _).parse(input)?;
    let (input, attributes) = parse_attributes(input)?;
    eof(input)?;

    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code: code.to_vec(),
            exception_table,
            attributes,
        },
    ))
}

fn parse_exception_table_entry(input: &[u8]) -> IResult<&[u8], ExceptionTableEntry> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionTableEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

fn check_index(pool: &[ConstantPoolInfo], index: u16, what: &str) -> Result<()> {
    match constant(pool, index) {
        None | Some(ConstantPoolInfo::Empty) => Err(Error::malformed(format!(
            "{what} refers to invalid constant pool index {index}"
        ))),
        Some(_) => Ok(()),
    }
}

fn attribute_name<'a>(pool: &'a [ConstantPoolInfo], attribute: &AttributeInfo) -> Result<&'a [u8]> {
    match constant(pool, attribute.name_index()) {
        Some(ConstantPoolInfo::Utf8(name)) => Ok(name),
        _ => Err(Error::malformed(format!(
            "attribute name index {} is not a Utf8 constant",
            attribute.name_index()
        ))),
    }
}

fn check_attributes(pool: &[ConstantPoolInfo], attributes: &[AttributeInfo]) -> Result<()> {
    for attribute in attributes {
        let name = attribute_name(pool, attribute)?;
        if !KNOWN_ATTRIBUTES.contains(&name) {
            tracing::warn!(
                attribute = %String::from_utf8_lossy(name),
                "keeping unknown attribute as raw bytes"
            );
        }
    }
    Ok(())
}

fn check_indices(class: &ClassFile) -> Result<()> {
    let pool = &class.constant_pool;
    check_index(pool, class.this_class, "this_class")?;
    if class.super_class != 0 {
        check_index(pool, class.super_class, "super_class")?;
    }
    for &interface in &class.interfaces {
        check_index(pool, interface, "interface")?;
    }
    for field in &class.fields {
        check_index(pool, field.name_index, "field name")?;
        check_index(pool, field.descriptor_index, "field descriptor")?;
        check_attributes(pool, &field.attributes)?;
    }
    for method in &class.methods {
        check_index(pool, method.name_index, "method name")?;
        check_index(pool, method.descriptor_index, "method descriptor")?;
        check_attributes(pool, &method.attributes)?;
    }
    check_attributes(pool, &class.attributes)
}

fn decode_code_attributes(class: &mut ClassFile) -> Result<()> {
    let pool = &class.constant_pool;
    for method in &mut class.methods {
        for attribute in &mut method.attributes {
            let AttributeInfo::Raw { name_index, info } = attribute else {
                continue;
            };
            let name_index = *name_index;
            if !matches!(constant(pool, name_index), Some(ConstantPoolInfo::Utf8(name)) if name == CODE_ATTRIBUTE)
            {
                continue;
            }
            let (_, code) = parse_code_attribute(info)?;
            check_attributes(pool, &code.attributes)?;
            *attribute = AttributeInfo::Code { name_index, code };
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{class::ClassBuilder, consts::MethodAccessFlag, instructions as inst};

    fn sample() -> Vec<u8> {
        ClassBuilder::new("Sample", Some("java/lang/Object"))
            .method(MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC, "two", "()I", |code| {
                code.iconst(2).insn(inst::IRETURN);
            })
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_parse_built_class() {
        let class = class_file(&sample()).unwrap();
        assert_eq!(class.name().as_deref(), Some("Sample"));
        assert_eq!(class.methods.len(), 1);
        let code = class.methods[0].code().unwrap();
        assert_eq!(code.code, vec![inst::ICONST_2, inst::IRETURN]);
        assert_eq!(code.max_stack, 1);
        assert_eq!(code.max_locals, 0);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample();
        bytes[0] = 0;
        assert!(matches!(class_file(&bytes), Err(Error::MalformedClassFile(_))));
    }

    #[test]
    fn test_unsupported_version() {
        let mut bytes = sample();
        bytes[6..8].copy_from_slice(&70u16.to_be_bytes());
        assert!(matches!(class_file(&bytes), Err(Error::MalformedClassFile(_))));
        bytes[6..8].copy_from_slice(&44u16.to_be_bytes());
        assert!(matches!(class_file(&bytes), Err(Error::MalformedClassFile(_))));
    }

    #[test]
    fn test_truncated_and_trailing() {
        let bytes = sample();
        for len in [0, 4, 9, bytes.len() / 2, bytes.len() - 1] {
            assert!(
                matches!(class_file(&bytes[..len]), Err(Error::MalformedClassFile(_))),
                "prefix of {len} bytes accepted"
            );
        }
        let mut longer = bytes.clone();
        longer.push(0);
        assert!(matches!(class_file(&longer), Err(Error::MalformedClassFile(_))));
    }

    #[test]
    fn test_zero_pool_count() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 52, 0, 0]);
        assert!(matches!(class_file(&bytes), Err(Error::MalformedClassFile(_))));
    }

    #[test]
    fn test_unknown_tag() {
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[0, 0, 0, 52, 0, 2, 2, 0, 0]);
        assert!(matches!(class_file(&bytes), Err(Error::MalformedClassFile(_))));
    }

    #[test]
    fn test_this_class_out_of_range() {
        let mut class = class_file(&sample()).unwrap();
        class.this_class = class.constant_pool.len() as u16 + 1;
        assert!(matches!(
            class_file(&class.to_bytes()),
            Err(Error::MalformedClassFile(_))
        ));
    }
}
