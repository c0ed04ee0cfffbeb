/// A constant pool entry as stored in the class file. `Utf8` keeps the raw
/// modified UTF-8 bytes; `Empty` fills the slot after a `Long` or `Double`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConstantPoolInfo {
    Empty,
    Utf8(Vec<u8>),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class {
        name_index: u16,
    },
    String {
        string_index: u16,
    },
    Fieldref {
        class_index: u16,
        name_and_type_index: u16,
    },
    Methodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    InterfaceMethodref {
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType {
        name_index: u16,
        descriptor_index: u16,
    },
    MethodHandle {
        reference_kind: u8,
        reference_index: u16,
    },
    MethodType {
        descriptor_index: u16,
    },
    Dynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    InvokeDynamic {
        bootstrap_method_attr_index: u16,
        name_and_type_index: u16,
    },
    Module {
        name_index: u16,
    },
    Package {
        name_index: u16,
    },
}

impl ConstantPoolInfo {
    pub fn tag(&self) -> u8 {
        match self {
            ConstantPoolInfo::Empty => 0,
            ConstantPoolInfo::Utf8(_) => 1,
            ConstantPoolInfo::Integer(_) => 3,
            ConstantPoolInfo::Float(_) => 4,
            ConstantPoolInfo::Long(_) => 5,
            ConstantPoolInfo::Double(_) => 6,
            ConstantPoolInfo::Class { .. } => 7,
            ConstantPoolInfo::String { .. } => 8,
            ConstantPoolInfo::Fieldref { .. } => 9,
            ConstantPoolInfo::Methodref { .. } => 10,
            ConstantPoolInfo::InterfaceMethodref { .. } => 11,
            ConstantPoolInfo::NameAndType { .. } => 12,
            ConstantPoolInfo::MethodHandle { .. } => 15,
            ConstantPoolInfo::MethodType { .. } => 16,
            ConstantPoolInfo::Dynamic { .. } => 17,
            ConstantPoolInfo::InvokeDynamic { .. } => 18,
            ConstantPoolInfo::Module { .. } => 19,
            ConstantPoolInfo::Package { .. } => 20,
        }
    }

    /// Long and double entries occupy two pool indices.
    pub fn is_wide(&self) -> bool {
        matches!(self, ConstantPoolInfo::Long(_) | ConstantPoolInfo::Double(_))
    }
}
