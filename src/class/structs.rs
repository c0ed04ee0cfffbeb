mod constant_pool;
mod java_str;

pub use constant_pool::*;
pub(crate) use java_str::*;

use crate::consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag};

/// A parsed class file. Constant pool indices are 1-based; entry `i` lives at
/// `constant_pool[i - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: Vec<ConstantPoolInfo>,
    pub access_flags: ClassAccessFlag,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<FieldInfo>,
    pub methods: Vec<MethodInfo>,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldInfo {
    pub access_flags: FieldAccessFlag,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub access_flags: MethodAccessFlag,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeInfo {
    Code {
        name_index: u16,
        code: CodeAttribute,
    },
    Raw {
        name_index: u16,
        info: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionTableEntry>,
    pub attributes: Vec<AttributeInfo>,
}

/// `catch_type` is a constant pool index, 0 for a catch-all handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionTableEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

impl ClassFile {
    pub fn constant(&self, index: u16) -> Option<&ConstantPoolInfo> {
        constant(&self.constant_pool, index)
    }

    pub fn utf8(&self, index: u16) -> Option<&[u8]> {
        match self.constant(index)? {
            ConstantPoolInfo::Utf8(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Internal name of the class this file defines.
    pub fn name(&self) -> Option<String> {
        let ConstantPoolInfo::Class { name_index } = self.constant(self.this_class)? else {
            return None;
        };
        decode_modified_utf8(self.utf8(*name_index)?).map(|name| name.into_owned())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        crate::class::write_class(self)
    }
}

impl AttributeInfo {
    pub fn name_index(&self) -> u16 {
        match self {
            AttributeInfo::Code { name_index, .. } | AttributeInfo::Raw { name_index, .. } => {
                *name_index
            }
        }
    }
}

impl MethodInfo {
    pub fn code(&self) -> Option<&CodeAttribute> {
        self.attributes.iter().find_map(|attribute| match attribute {
            AttributeInfo::Code { code, .. } => Some(code),
            AttributeInfo::Raw { .. } => None,
        })
    }
}

pub(crate) fn constant(pool: &[ConstantPoolInfo], index: u16) -> Option<&ConstantPoolInfo> {
    pool.get((index as usize).checked_sub(1)?)
}
