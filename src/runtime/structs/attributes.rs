use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum AttributeInfo {
    ConstantValue(Const),
    SourceFile(Arc<str>),
    /// Anything the runtime does not interpret, kept raw.
    Unknown { name: Arc<str>, info: Arc<[u8]> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(Arc<str>),
}

#[derive(Debug)]
pub struct CodeAttribute {
    pub(crate) max_stack: usize,
    pub(crate) max_locals: usize,
    pub(crate) code: Vec<u8>,
    pub(crate) exception_table: Vec<ExceptionTableItem>,
}

impl CodeAttribute {
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    pub fn max_locals(&self) -> usize {
        self.max_locals
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn exception_table(&self) -> &[ExceptionTableItem] {
        &self.exception_table
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionTableItem {
    pub(crate) start_pc: usize,
    // exclusive
    pub(crate) end_pc: usize,
    pub(crate) handler_pc: usize,
    // None catches everything
    pub(crate) catch_type: Option<Arc<str>>,
}

impl ExceptionTableItem {
    pub(crate) fn covers(&self, pc: usize) -> bool {
        (self.start_pc..self.end_pc).contains(&pc)
    }

    pub fn catch_type(&self) -> Option<&str> {
        self.catch_type.as_deref()
    }
}
