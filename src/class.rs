//! The binary class file format: parsing into [`ClassFile`], serializing it back, and
//! assembling new class files with [`ClassBuilder`].

pub mod parser;
mod structs;
pub mod writer;

pub use parser::class_file;
pub use structs::*;
pub(crate) use structs::{constant, decode_modified_utf8, encode_modified_utf8};
pub use writer::{ClassBuilder, CodeBuilder, ConstantPoolBuilder, ConstantValue, Label, write_class};
