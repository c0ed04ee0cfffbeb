mod frame;

use std::{cmp::Ordering, sync::Arc};

use tracing::trace;

use crate::{
    consts::{
        ARITHMETIC_EXCEPTION, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION,
        CLASS_CAST_EXCEPTION, DETAIL_MESSAGE, NEGATIVE_ARRAY_SIZE_EXCEPTION, NULL_POINTER_EXCEPTION,
        OUT_OF_MEMORY_ERROR,
    },
    descriptor::FieldType,
    error::{Error, Result},
    instructions as inst,
    runtime::{
        Class, CodeAttribute, ConstantPoolInfo, CpClassInfo, Exception, FieldResolve, Fieldref,
        MethodResolve, Methodref, NativeEnv, NativeResult, ObjectRef, Runtime,
        class_loader::initialize_class, inheritance::is_assignable_to,
    },
};

pub use frame::{Frame, Value};
pub(crate) use frame::{from_slots, to_slots};

/// `a/b/C` as Java source spells it.
pub(crate) fn java_name(class_name: &str) -> String {
    class_name.replace('/', ".")
}

/// One call stack. Frames of nested invocations, including natives calling back
/// into bytecode, all count against the same depth limit.
pub struct Thread<'r> {
    runtime: &'r Runtime,
    depth: usize,
}

pub(crate) enum Next {
    Invoke {
        class: Arc<Class>,
        method_index: usize,
        args: Vec<Value>,
    },
    Return(Option<Value>),
}

impl<'r> Thread<'r> {
    pub(crate) fn new(runtime: &'r Runtime) -> Self {
        Thread { runtime, depth: 0 }
    }

    pub fn runtime(&self) -> &'r Runtime {
        self.runtime
    }

    /// Frames currently on this call stack.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn resolve_class(&self, class_name: &str) -> Result<Arc<Class>> {
        self.runtime.class_loader.resolve_class(class_name)
    }

    fn resolve_cp_class(&self, info: &CpClassInfo) -> Result<Arc<Class>> {
        info.get_or_load_class(|name| self.resolve_class(name))
    }

    pub(crate) fn intern(&self, value: &str) -> ObjectRef {
        self.runtime
            .heap
            .intern(&self.runtime.famous_classes.string, value)
    }

    pub(crate) fn new_string(&self, value: &str) -> ObjectRef {
        self.runtime.new_string(value)
    }

    /// A new throwable of a built-in class, or the fatal error that prevented it.
    pub(crate) fn new_exception(&mut self, class_name: &str, message: Option<&str>) -> Exception {
        match self.create_exception(class_name, message) {
            Ok(exception) => Exception::Java(exception),
            Err(err) => err,
        }
    }

    fn create_exception(&mut self, class_name: &str, message: Option<&str>) -> NativeResult<ObjectRef> {
        let class = self.resolve_class(class_name)?;
        initialize_class(self, &class)?;
        let exception = self.runtime.heap.new_instance(&class);
        if let Some(message) = message {
            let field = class
                .instance_field(DETAIL_MESSAGE)
                .ok_or_else(|| Error::NoSuchField {
                    class_name: class_name.to_string(),
                    field: DETAIL_MESSAGE.to_string(),
                })?;
            exception.put_field(field.index, Value::Reference(Some(self.new_string(message))))?;
        }
        Ok(exception)
    }

    /// Runs `class.methods[method_index]` to completion. `args` are in slot form,
    /// `this` first for instance methods.
    pub(crate) fn invoke(
        &mut self,
        class: Arc<Class>,
        method_index: usize,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        let method = class.methods.get(method_index).ok_or_else(|| {
            Error::vm(format!("{} has no method #{method_index}", class.class_name))
        })?;
        if method.is_abstract() {
            return Err(Error::AbstractMethod {
                class_name: class.class_name.to_string(),
                method: format!("{}{}", method.name, method.descriptor_str),
            }
            .into());
        }
        if method.is_native() {
            self.enter()?;
            let result = self.invoke_native(class, method_index, args);
            self.depth -= 1;
            return result;
        }

        let frame = Frame::new(class, method_index, args)?;
        let base = self.depth;
        let result = self.run(frame);
        self.depth = base;
        result
    }

    /// Calls `name` + `descriptor` on `receiver`, dispatching on its class.
    pub(crate) fn invoke_virtual(
        &mut self,
        receiver: ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        let class = receiver.class()?;
        let (owner, index) = class
            .resolve_method(name, descriptor)
            .ok_or_else(|| Error::NoSuchMethod {
                class_name: class.class_name.to_string(),
                method: format!("{name}{descriptor}"),
            })?;
        let args = to_slots(std::iter::once(Value::Reference(Some(receiver))).chain(args));
        self.invoke(owner, index, args)
    }

    fn enter(&mut self) -> Result<()> {
        let max_call_depth = self.runtime.options.max_call_depth;
        if self.depth >= max_call_depth {
            return Err(Error::vm(format!("call depth exceeds {max_call_depth}")));
        }
        self.depth += 1;
        Ok(())
    }

    fn invoke_native(
        &mut self,
        class: Arc<Class>,
        method_index: usize,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        let method = class.method(method_index);
        let function = self
            .runtime
            .natives
            .get(&class.class_name, &method.name, &method.descriptor_str)
            .ok_or_else(|| Error::UnsatisfiedLink {
                class_name: class.class_name.to_string(),
                method: format!("{}{}", method.name, method.descriptor_str),
            })?;
        trace!(class = %class.class_name, method = %method.name, "native call");
        let mut env = NativeEnv::new(self, class, method_index, from_slots(args));
        function(&mut env)
    }

    fn run(&mut self, frame: Frame) -> NativeResult<Option<Value>> {
        self.enter()?;
        let mut frame = Box::new(frame);
        loop {
            let next = match self.execute(&mut frame) {
                Ok(next) => next,
                Err(Exception::Java(exception)) => {
                    frame = self.unwind(frame, exception)?;
                    continue;
                }
                Err(fatal) => return Err(fatal),
            };

            match next {
                Next::Invoke {
                    class,
                    method_index,
                    args,
                } => {
                    let bodyless = {
                        let method = class.method(method_index);
                        method.is_native() || method.is_abstract()
                    };
                    if bodyless {
                        match self.invoke(class, method_index, args) {
                            Ok(value) => frame.resume(value)?,
                            Err(Exception::Java(exception)) => frame = self.unwind(frame, exception)?,
                            Err(fatal) => return Err(fatal),
                        }
                    } else {
                        self.enter()?;
                        let mut callee = Box::new(Frame::new(class, method_index, args)?);
                        callee.previous_frame = Some(frame);
                        frame = callee;
                    }
                }
                Next::Return(value) => {
                    self.depth -= 1;
                    let Some(caller) = frame.previous_frame.take() else {
                        return Ok(value);
                    };
                    frame = caller;
                    frame.resume(value)?;
                }
            }
        }
    }

    fn execute(&mut self, frame: &mut Frame) -> NativeResult<Next> {
        loop {
            if let Some(next) = self.step(frame)? {
                return Ok(next);
            }
        }
    }

    /// Executes the instruction at `frame.pc`.
    pub(crate) fn step(&mut self, frame: &mut Frame) -> NativeResult<Option<Next>> {
        InterpreterEnv::new(self, frame).step()
    }

    /// Finds a handler for `exception`, popping frames that have none. Fails with the
    /// exception itself once the bottom frame is gone.
    pub(crate) fn unwind(
        &mut self,
        mut frame: Box<Frame>,
        exception: ObjectRef,
    ) -> NativeResult<Box<Frame>> {
        loop {
            if let Some(handler_pc) = self.find_handler(&frame, &exception)? {
                trace!(
                    exception = exception.class_name(),
                    class = %frame.class.class_name,
                    handler_pc,
                    "exception caught"
                );
                frame.stack.clear();
                frame.push(Value::Reference(Some(exception)))?;
                frame.pc = handler_pc;
                return Ok(frame);
            }
            self.depth = self.depth.saturating_sub(1);
            match frame.previous_frame.take() {
                Some(caller) => frame = caller,
                None => return Err(Exception::Java(exception)),
            }
        }
    }

    fn find_handler(&self, frame: &Frame, exception: &ObjectRef) -> Result<Option<usize>> {
        let exception_class = exception.class()?;
        for entry in &frame.code.exception_table {
            if !entry.covers(frame.pc) {
                continue;
            }
            let Some(catch_type) = &entry.catch_type else {
                return Ok(Some(entry.handler_pc));
            };
            let catch_class = self.resolve_class(catch_type)?;
            if is_assignable_to(&exception_class, &catch_class) {
                return Ok(Some(entry.handler_pc));
            }
        }
        Ok(None)
    }
}

macro_rules! binary_op {
    ($env:ident, $pop:ident => $variant:ident, |$a:ident, $b:ident| $body:expr) => {{
        let $b = $env.frame.$pop()?;
        let $a = $env.frame.$pop()?;
        $env.frame.push(Value::$variant($body))?;
    }};
}

macro_rules! unary_op {
    ($env:ident, $pop:ident => $variant:ident, |$a:ident| $body:expr) => {{
        let $a = $env.frame.$pop()?;
        $env.frame.push(Value::$variant($body))?;
    }};
}

macro_rules! division {
    ($env:ident, $pop:ident => $variant:ident, $op:ident) => {{
        let b = $env.frame.$pop()?;
        let a = $env.frame.$pop()?;
        if b == 0 {
            return Err($env.throw(ARITHMETIC_EXCEPTION, Some("/ by zero".to_string())));
        }
        $env.frame.push(Value::$variant(a.$op(b)))?;
    }};
}

struct InterpreterEnv<'t, 'r> {
    thread: &'t mut Thread<'r>,
    frame: &'t mut Frame,
    code: Arc<CodeAttribute>,
    op: u8,
    // start of the current instruction
    pc: usize,
    // next byte to decode
    cursor: usize,
}

impl<'t, 'r> InterpreterEnv<'t, 'r> {
    fn new(thread: &'t mut Thread<'r>, frame: &'t mut Frame) -> Self {
        let code = Arc::clone(&frame.code);
        let pc = frame.pc;
        InterpreterEnv {
            thread,
            frame,
            code,
            op: inst::NOP,
            pc,
            cursor: pc,
        }
    }

    fn step(&mut self) -> NativeResult<Option<Next>> {
        let op = self.get_u8_args()?;
        self.op = op;
        if self.thread.runtime.options.trace_instructions {
            trace!(
                class = %self.frame.class.class_name,
                method = %self.frame.method().name,
                pc = self.pc,
                op = inst::mnemonic(op),
                stack = self.frame.depth(),
                "execute"
            );
        }

        match op {
            inst::NOP => {}

            // const
            inst::ACONST_NULL => self.frame.push(Value::NULL)?,
            inst::ICONST_M1..=inst::ICONST_5 => {
                self.frame.push(Value::Int(op as i32 - inst::ICONST_0 as i32))?
            }
            inst::LCONST_0 | inst::LCONST_1 => {
                self.frame.push(Value::Long((op - inst::LCONST_0) as i64))?
            }
            inst::FCONST_0..=inst::FCONST_2 => {
                self.frame.push(Value::Float((op - inst::FCONST_0) as f32))?
            }
            inst::DCONST_0 | inst::DCONST_1 => {
                self.frame.push(Value::Double((op - inst::DCONST_0) as f64))?
            }
            inst::BIPUSH => {
                let byte = self.get_i8_args()?;
                self.frame.push(Value::Int(byte as i32))?;
            }
            inst::SIPUSH => {
                let short = self.get_i16_args()?;
                self.frame.push(Value::Int(short as i32))?;
            }
            inst::LDC => {
                let index = self.get_u8_args()? as u16;
                self.ldc(index)?;
            }
            inst::LDC_W => {
                let index = self.get_u16_args()?;
                self.ldc(index)?;
            }
            inst::LDC2_W => {
                let index = self.get_u16_args()?;
                self.ldc2(index)?;
            }

            // load
            inst::ILOAD => {
                let index = self.get_u8_args()? as usize;
                self.load(index, "int")?;
            }
            inst::LLOAD => {
                let index = self.get_u8_args()? as usize;
                self.load(index, "long")?;
            }
            inst::FLOAD => {
                let index = self.get_u8_args()? as usize;
                self.load(index, "float")?;
            }
            inst::DLOAD => {
                let index = self.get_u8_args()? as usize;
                self.load(index, "double")?;
            }
            inst::ALOAD => {
                let index = self.get_u8_args()? as usize;
                self.load(index, "reference")?;
            }
            inst::ILOAD_0..=inst::ILOAD_3 => self.load((op - inst::ILOAD_0) as usize, "int")?,
            inst::LLOAD_0..=inst::LLOAD_3 => self.load((op - inst::LLOAD_0) as usize, "long")?,
            inst::FLOAD_0..=inst::FLOAD_3 => self.load((op - inst::FLOAD_0) as usize, "float")?,
            inst::DLOAD_0..=inst::DLOAD_3 => self.load((op - inst::DLOAD_0) as usize, "double")?,
            inst::ALOAD_0..=inst::ALOAD_3 => {
                self.load((op - inst::ALOAD_0) as usize, "reference")?
            }
            inst::IALOAD => self.arr_load(|t| matches!(t, FieldType::Int))?,
            inst::LALOAD => self.arr_load(|t| matches!(t, FieldType::Long))?,
            inst::FALOAD => self.arr_load(|t| matches!(t, FieldType::Float))?,
            inst::DALOAD => self.arr_load(|t| matches!(t, FieldType::Double))?,
            inst::AALOAD => self.arr_load(FieldType::is_reference)?,
            inst::BALOAD => self.arr_load(|t| matches!(t, FieldType::Byte | FieldType::Boolean))?,
            inst::CALOAD => self.arr_load(|t| matches!(t, FieldType::Char))?,
            inst::SALOAD => self.arr_load(|t| matches!(t, FieldType::Short))?,

            // store
            inst::ISTORE => {
                let index = self.get_u8_args()? as usize;
                self.store(index, "int")?;
            }
            inst::LSTORE => {
                let index = self.get_u8_args()? as usize;
                self.store(index, "long")?;
            }
            inst::FSTORE => {
                let index = self.get_u8_args()? as usize;
                self.store(index, "float")?;
            }
            inst::DSTORE => {
                let index = self.get_u8_args()? as usize;
                self.store(index, "double")?;
            }
            inst::ASTORE => {
                let index = self.get_u8_args()? as usize;
                self.store(index, "reference")?;
            }
            inst::ISTORE_0..=inst::ISTORE_3 => self.store((op - inst::ISTORE_0) as usize, "int")?,
            inst::LSTORE_0..=inst::LSTORE_3 => self.store((op - inst::LSTORE_0) as usize, "long")?,
            inst::FSTORE_0..=inst::FSTORE_3 => {
                self.store((op - inst::FSTORE_0) as usize, "float")?
            }
            inst::DSTORE_0..=inst::DSTORE_3 => {
                self.store((op - inst::DSTORE_0) as usize, "double")?
            }
            inst::ASTORE_0..=inst::ASTORE_3 => {
                self.store((op - inst::ASTORE_0) as usize, "reference")?
            }
            inst::IASTORE => self.arr_store(|t| matches!(t, FieldType::Int))?,
            inst::LASTORE => self.arr_store(|t| matches!(t, FieldType::Long))?,
            inst::FASTORE => self.arr_store(|t| matches!(t, FieldType::Float))?,
            inst::DASTORE => self.arr_store(|t| matches!(t, FieldType::Double))?,
            inst::AASTORE => self.arr_store(FieldType::is_reference)?,
            inst::BASTORE => self.arr_store(|t| matches!(t, FieldType::Byte | FieldType::Boolean))?,
            inst::CASTORE => self.arr_store(|t| matches!(t, FieldType::Char))?,
            inst::SASTORE => self.arr_store(|t| matches!(t, FieldType::Short))?,

            // stack
            inst::POP => {
                self.frame.pop_slot()?;
            }
            inst::POP2 => {
                self.frame.pop_slots(2)?;
            }
            inst::DUP => self.dup(1, 0)?,
            inst::DUP_X1 => self.dup(1, 1)?,
            inst::DUP_X2 => self.dup(1, 2)?,
            inst::DUP2 => self.dup(2, 0)?,
            inst::DUP2_X1 => self.dup(2, 1)?,
            inst::DUP2_X2 => self.dup(2, 2)?,
            inst::SWAP => {
                let v1 = self.frame.pop_slot()?;
                let v2 = self.frame.pop_slot()?;
                self.frame.push_slot(v1)?;
                self.frame.push_slot(v2)?;
            }

            // arithmetic
            inst::IADD => binary_op!(self, pop_int => Int, |a, b| a.wrapping_add(b)),
            inst::LADD => binary_op!(self, pop_long => Long, |a, b| a.wrapping_add(b)),
            inst::FADD => binary_op!(self, pop_float => Float, |a, b| a + b),
            inst::DADD => binary_op!(self, pop_double => Double, |a, b| a + b),
            inst::ISUB => binary_op!(self, pop_int => Int, |a, b| a.wrapping_sub(b)),
            inst::LSUB => binary_op!(self, pop_long => Long, |a, b| a.wrapping_sub(b)),
            inst::FSUB => binary_op!(self, pop_float => Float, |a, b| a - b),
            inst::DSUB => binary_op!(self, pop_double => Double, |a, b| a - b),
            inst::IMUL => binary_op!(self, pop_int => Int, |a, b| a.wrapping_mul(b)),
            inst::LMUL => binary_op!(self, pop_long => Long, |a, b| a.wrapping_mul(b)),
            inst::FMUL => binary_op!(self, pop_float => Float, |a, b| a * b),
            inst::DMUL => binary_op!(self, pop_double => Double, |a, b| a * b),
            inst::IDIV => division!(self, pop_int => Int, wrapping_div),
            inst::LDIV => division!(self, pop_long => Long, wrapping_div),
            inst::FDIV => binary_op!(self, pop_float => Float, |a, b| a / b),
            inst::DDIV => binary_op!(self, pop_double => Double, |a, b| a / b),
            inst::IREM => division!(self, pop_int => Int, wrapping_rem),
            inst::LREM => division!(self, pop_long => Long, wrapping_rem),
            inst::FREM => binary_op!(self, pop_float => Float, |a, b| a % b),
            inst::DREM => binary_op!(self, pop_double => Double, |a, b| a % b),
            inst::INEG => unary_op!(self, pop_int => Int, |a| a.wrapping_neg()),
            inst::LNEG => unary_op!(self, pop_long => Long, |a| a.wrapping_neg()),
            inst::FNEG => unary_op!(self, pop_float => Float, |a| -a),
            inst::DNEG => unary_op!(self, pop_double => Double, |a| -a),

            // shifts and bitwise
            inst::ISHL => binary_op!(self, pop_int => Int, |a, b| a.wrapping_shl(b as u32)),
            inst::ISHR => binary_op!(self, pop_int => Int, |a, b| a.wrapping_shr(b as u32)),
            inst::IUSHR => {
                binary_op!(self, pop_int => Int, |a, b| (a as u32).wrapping_shr(b as u32) as i32)
            }
            inst::LSHL | inst::LSHR | inst::LUSHR => {
                let shift = self.frame.pop_int()? as u32;
                let value = self.frame.pop_long()?;
                let result = match op {
                    inst::LSHL => value.wrapping_shl(shift),
                    inst::LSHR => value.wrapping_shr(shift),
                    _ => (value as u64).wrapping_shr(shift) as i64,
                };
                self.frame.push(Value::Long(result))?;
            }
            inst::IAND => binary_op!(self, pop_int => Int, |a, b| a & b),
            inst::LAND => binary_op!(self, pop_long => Long, |a, b| a & b),
            inst::IOR => binary_op!(self, pop_int => Int, |a, b| a | b),
            inst::LOR => binary_op!(self, pop_long => Long, |a, b| a | b),
            inst::IXOR => binary_op!(self, pop_int => Int, |a, b| a ^ b),
            inst::LXOR => binary_op!(self, pop_long => Long, |a, b| a ^ b),
            inst::IINC => {
                let index = self.get_u8_args()? as usize;
                let delta = self.get_i8_args()? as i32;
                self.iinc(index, delta)?;
            }

            // conversions
            inst::I2L => unary_op!(self, pop_int => Long, |a| a as i64),
            inst::I2F => unary_op!(self, pop_int => Float, |a| a as f32),
            inst::I2D => unary_op!(self, pop_int => Double, |a| a as f64),
            inst::L2I => unary_op!(self, pop_long => Int, |a| a as i32),
            inst::L2F => unary_op!(self, pop_long => Float, |a| a as f32),
            inst::L2D => unary_op!(self, pop_long => Double, |a| a as f64),
            inst::F2I => unary_op!(self, pop_float => Int, |a| a as i32),
            inst::F2L => unary_op!(self, pop_float => Long, |a| a as i64),
            inst::F2D => unary_op!(self, pop_float => Double, |a| a as f64),
            inst::D2I => unary_op!(self, pop_double => Int, |a| a as i32),
            inst::D2L => unary_op!(self, pop_double => Long, |a| a as i64),
            inst::D2F => unary_op!(self, pop_double => Float, |a| a as f32),
            inst::I2B => unary_op!(self, pop_int => Int, |a| a as i8 as i32),
            inst::I2C => unary_op!(self, pop_int => Int, |a| a as u16 as i32),
            inst::I2S => unary_op!(self, pop_int => Int, |a| a as i16 as i32),

            // comparisons
            inst::LCMP => binary_op!(self, pop_long => Int, |a, b| a.cmp(&b) as i32),
            inst::FCMPL => self.fcmp(-1)?,
            inst::FCMPG => self.fcmp(1)?,
            inst::DCMPL => self.dcmp(-1)?,
            inst::DCMPG => self.dcmp(1)?,

            // control
            inst::IFEQ..=inst::IFLE => {
                let value = self.frame.pop_int()?;
                let jump = match op {
                    inst::IFEQ => value == 0,
                    inst::IFNE => value != 0,
                    inst::IFLT => value < 0,
                    inst::IFGE => value >= 0,
                    inst::IFGT => value > 0,
                    _ => value <= 0,
                };
                self.goto(jump)?;
            }
            inst::IF_ICMPEQ..=inst::IF_ICMPLE => {
                let b = self.frame.pop_int()?;
                let a = self.frame.pop_int()?;
                let jump = match op {
                    inst::IF_ICMPEQ => a == b,
                    inst::IF_ICMPNE => a != b,
                    inst::IF_ICMPLT => a < b,
                    inst::IF_ICMPGE => a >= b,
                    inst::IF_ICMPGT => a > b,
                    _ => a <= b,
                };
                self.goto(jump)?;
            }
            inst::IF_ACMPEQ | inst::IF_ACMPNE => {
                let b = self.frame.pop_reference()?;
                let a = self.frame.pop_reference()?;
                self.goto((a == b) == (op == inst::IF_ACMPEQ))?;
            }
            inst::IFNULL | inst::IFNONNULL => {
                let a = self.frame.pop_reference()?;
                self.goto(a.is_none() == (op == inst::IFNULL))?;
            }
            inst::GOTO => self.goto(true)?,
            inst::GOTO_W => {
                let offset = self.get_i32_args()?;
                self.cursor = self.target(offset)?;
            }
            inst::JSR => {
                let offset = self.get_i16_args()? as i32;
                self.jsr(offset)?;
            }
            inst::JSR_W => {
                let offset = self.get_i32_args()?;
                self.jsr(offset)?;
            }
            inst::RET => {
                let index = self.get_u8_args()? as usize;
                self.ret(index)?;
            }
            inst::TABLESWITCH => self.table_switch()?,
            inst::LOOKUPSWITCH => self.lookup_switch()?,
            inst::WIDE => self.wide()?,

            // return
            inst::IRETURN => {
                let value = Value::Int(self.frame.pop_int()?);
                let value = match &self.frame.method().descriptor.return_type {
                    Some(return_type) => narrow(return_type, value),
                    None => value,
                };
                return Ok(Some(Next::Return(Some(value))));
            }
            inst::LRETURN => {
                return Ok(Some(Next::Return(Some(Value::Long(self.frame.pop_long()?)))));
            }
            inst::FRETURN => {
                return Ok(Some(Next::Return(Some(Value::Float(self.frame.pop_float()?)))));
            }
            inst::DRETURN => {
                return Ok(Some(Next::Return(Some(Value::Double(self.frame.pop_double()?)))));
            }
            inst::ARETURN => {
                return Ok(Some(Next::Return(Some(Value::Reference(
                    self.frame.pop_reference()?,
                )))));
            }
            inst::RETURN => return Ok(Some(Next::Return(None))),

            // fields
            inst::GETSTATIC => self.get_static()?,
            inst::PUTSTATIC => self.put_static()?,
            inst::GETFIELD => self.get_field()?,
            inst::PUTFIELD => self.put_field()?,

            // call
            inst::INVOKEVIRTUAL => return self.invoke_virtual(false),
            inst::INVOKEINTERFACE => return self.invoke_virtual(true),
            inst::INVOKESPECIAL => return self.invoke_special(),
            inst::INVOKESTATIC => return self.invoke_static(),
            inst::INVOKEDYNAMIC => {
                return Err(Error::vm(format!(
                    "invokedynamic is not supported ({}.{} at {})",
                    self.frame.class.class_name,
                    self.frame.method().name,
                    self.pc
                ))
                .into());
            }

            // objects and arrays
            inst::NEW => self.new_object()?,
            inst::NEWARRAY => self.new_array()?,
            inst::ANEWARRAY => self.new_reference_array()?,
            inst::MULTIANEWARRAY => self.new_multi_array()?,
            inst::ARRAYLENGTH => {
                let array = self.pop_non_null()?;
                let length = array.array_length().ok_or_else(|| {
                    Error::vm(format!("arraylength on non-array {}", array.class_name()))
                })?;
                self.frame.push(Value::Int(length as i32))?;
            }
            inst::ATHROW => {
                let exception = self.pop_non_null()?;
                return Err(Exception::Java(exception));
            }
            inst::CHECKCAST => self.check_cast()?,
            inst::INSTANCEOF => {
                let index = self.get_u16_args()?;
                let target = self.resolve_class(index)?;
                let result = match self.frame.pop_reference()? {
                    Some(object) => is_assignable_to(&object.class()?, &target),
                    None => false,
                };
                self.frame.push(Value::Int(result as i32))?;
            }
            inst::MONITORENTER | inst::MONITOREXIT => {
                self.pop_non_null()?;
            }

            _ => {
                return Err(Error::vm(format!(
                    "unknown opcode {op:#04x} in {}.{} at {}",
                    self.frame.class.class_name,
                    self.frame.method().name,
                    self.pc
                ))
                .into());
            }
        }

        self.frame.pc = self.cursor;
        Ok(None)
    }

    fn throw(&mut self, class_name: &str, message: Option<String>) -> Exception {
        self.thread.new_exception(class_name, message.as_deref())
    }

    fn null_pointer(&mut self) -> Exception {
        self.throw(NULL_POINTER_EXCEPTION, None)
    }

    fn pop_non_null(&mut self) -> NativeResult<ObjectRef> {
        match self.frame.pop_reference()? {
            Some(object) => Ok(object),
            None => Err(self.null_pointer()),
        }
    }

    fn vm_error(&self, message: impl std::fmt::Display) -> Error {
        Error::vm(format!(
            "{} in {}.{} at {}",
            message,
            self.frame.class.class_name,
            self.frame.method().name,
            self.pc
        ))
    }

    #[inline]
    fn get_u8_args(&mut self) -> Result<u8> {
        let byte = self
            .code
            .code
            .get(self.cursor)
            .copied()
            .ok_or_else(|| self.vm_error(format_args!("code ends at {}", self.cursor)))?;
        self.cursor += 1;
        Ok(byte)
    }

    #[inline]
    fn get_i8_args(&mut self) -> Result<i8> {
        Ok(self.get_u8_args()? as i8)
    }

    #[inline]
    fn get_u16_args(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes([self.get_u8_args()?, self.get_u8_args()?]))
    }

    #[inline]
    fn get_i16_args(&mut self) -> Result<i16> {
        Ok(self.get_u16_args()? as i16)
    }

    #[inline]
    fn get_i32_args(&mut self) -> Result<i32> {
        Ok(i32::from_be_bytes([
            self.get_u8_args()?,
            self.get_u8_args()?,
            self.get_u8_args()?,
            self.get_u8_args()?,
        ]))
    }

    /// Absolute target of a branch `offset` relative to the current instruction.
    fn target(&self, offset: i32) -> Result<usize> {
        let target = self.pc as i64 + offset as i64;
        usize::try_from(target)
            .ok()
            .filter(|target| *target < self.code.code.len())
            .ok_or_else(|| self.vm_error(format_args!("branch target {target} is outside the code")))
    }

    fn goto(&mut self, jump: bool) -> Result<()> {
        let offset = self.get_i16_args()?;
        if jump {
            self.cursor = self.target(offset as i32)?;
        }
        Ok(())
    }

    fn jsr(&mut self, offset: i32) -> Result<()> {
        self.frame.push(Value::ReturnAddress(self.cursor))?;
        self.cursor = self.target(offset)?;
        Ok(())
    }

    fn ret(&mut self, index: usize) -> Result<()> {
        match self.frame.local(index)? {
            Value::ReturnAddress(address) => {
                self.cursor = address;
                Ok(())
            }
            other => Err(self.vm_error(format_args!(
                "ret expects a return address in local {index}, found {}",
                other.kind()
            ))),
        }
    }

    fn table_switch(&mut self) -> NativeResult<()> {
        let index = self.frame.pop_int()?;
        // operands are 4-byte aligned relative to the start of the code
        self.cursor = (self.pc + 4) & !3;
        let default = self.get_i32_args()?;
        let low = self.get_i32_args()?;
        let high = self.get_i32_args()?;
        if high < low {
            return Err(self.vm_error(format_args!("tableswitch with low {low} > high {high}")).into());
        }

        let offset = if index < low || index > high {
            default
        } else {
            self.cursor += 4 * (index as i64 - low as i64) as usize;
            self.get_i32_args()?
        };
        self.cursor = self.target(offset)?;
        Ok(())
    }

    fn lookup_switch(&mut self) -> NativeResult<()> {
        let key = self.frame.pop_int()?;
        self.cursor = (self.pc + 4) & !3;
        let default = self.get_i32_args()?;
        let npairs = self.get_i32_args()?;
        if npairs < 0 {
            return Err(self.vm_error(format_args!("lookupswitch with {npairs} pairs")).into());
        }

        let mut offset = default;
        for _ in 0..npairs {
            let candidate = self.get_i32_args()?;
            let candidate_offset = self.get_i32_args()?;
            if candidate == key {
                offset = candidate_offset;
                break;
            }
        }
        self.cursor = self.target(offset)?;
        Ok(())
    }

    fn wide(&mut self) -> NativeResult<()> {
        let op = self.get_u8_args()?;
        let index = self.get_u16_args()? as usize;
        match op {
            inst::ILOAD => self.load(index, "int")?,
            inst::LLOAD => self.load(index, "long")?,
            inst::FLOAD => self.load(index, "float")?,
            inst::DLOAD => self.load(index, "double")?,
            inst::ALOAD => self.load(index, "reference")?,
            inst::ISTORE => self.store(index, "int")?,
            inst::LSTORE => self.store(index, "long")?,
            inst::FSTORE => self.store(index, "float")?,
            inst::DSTORE => self.store(index, "double")?,
            inst::ASTORE => self.store(index, "reference")?,
            inst::IINC => {
                let delta = self.get_i16_args()? as i32;
                self.iinc(index, delta)?;
            }
            inst::RET => self.ret(index)?,
            _ => {
                return Err(self
                    .vm_error(format_args!("wide cannot modify {}", inst::mnemonic(op)))
                    .into());
            }
        }
        Ok(())
    }

    fn load(&mut self, index: usize, kind: &str) -> Result<()> {
        let value = self.frame.local(index)?;
        if value.kind() != kind {
            return Err(self.vm_error(format_args!(
                "{} expects {kind} in local {index}, found {}",
                inst::mnemonic(self.op),
                value.kind()
            )));
        }
        self.frame.push(value)
    }

    fn store(&mut self, index: usize, kind: &str) -> Result<()> {
        let value = self.frame.pop()?;
        // astore also stores the return address of jsr
        let accepted = value.kind() == kind
            || (kind == "reference" && matches!(value, Value::ReturnAddress(_)));
        if !accepted {
            return Err(self.vm_error(format_args!(
                "{} expects {kind}, found {}",
                inst::mnemonic(self.op),
                value.kind()
            )));
        }
        self.frame.store(index, value)
    }

    fn iinc(&mut self, index: usize, delta: i32) -> Result<()> {
        match self.frame.local(index)? {
            Value::Int(value) => self.frame.store(index, Value::Int(value.wrapping_add(delta))),
            other => Err(self.vm_error(format_args!(
                "iinc expects int in local {index}, found {}",
                other.kind()
            ))),
        }
    }

    /// Duplicates the top `count` slots, inserting the copy below `skip` further slots.
    fn dup(&mut self, count: usize, skip: usize) -> Result<()> {
        let top = self.frame.pop_slots(count)?;
        let under = self.frame.pop_slots(skip)?;
        for value in top.iter().cloned().chain(under).chain(top.iter().cloned()) {
            self.frame.push_slot(value)?;
        }
        Ok(())
    }

    #[inline]
    fn fcmp(&mut self, nan: i32) -> Result<()> {
        let v2 = self.frame.pop_float()?;
        let v1 = self.frame.pop_float()?;
        self.frame.push(Value::Int(compare(v1.partial_cmp(&v2), nan)))
    }

    #[inline]
    fn dcmp(&mut self, nan: i32) -> Result<()> {
        let v2 = self.frame.pop_double()?;
        let v1 = self.frame.pop_double()?;
        self.frame.push(Value::Int(compare(v1.partial_cmp(&v2), nan)))
    }

    fn ldc(&mut self, index: u16) -> NativeResult<()> {
        let class = Arc::clone(&self.frame.class);
        let value = match class.get_constant(index)? {
            ConstantPoolInfo::Integer(i) => Value::Int(*i),
            ConstantPoolInfo::Float(f) => Value::Float(*f),
            ConstantPoolInfo::String(s) => Value::Reference(Some(self.thread.intern(s))),
            other => {
                return Err(self
                    .vm_error(format_args!("ldc of {} constants is not supported", other.kind()))
                    .into());
            }
        };
        self.frame.push(value)?;
        Ok(())
    }

    fn ldc2(&mut self, index: u16) -> NativeResult<()> {
        let value = match self.frame.class.get_constant(index)? {
            ConstantPoolInfo::Long(l) => Value::Long(*l),
            ConstantPoolInfo::Double(d) => Value::Double(*d),
            other => {
                return Err(self
                    .vm_error(format_args!("ldc2_w of a {} constant", other.kind()))
                    .into());
            }
        };
        self.frame.push(value)?;
        Ok(())
    }

    fn resolve_class(&mut self, index: u16) -> Result<Arc<Class>> {
        let class = Arc::clone(&self.frame.class);
        match class.get_constant(index)? {
            ConstantPoolInfo::Class(info) if info.name == class.class_name => Ok(Arc::clone(&class)),
            ConstantPoolInfo::Class(info) => self.thread.resolve_cp_class(info),
            other => Err(self.vm_error(format_args!("expected Class at #{index}, found {}", other.kind()))),
        }
    }

    fn array_class(&self, component: &FieldType) -> Result<Arc<Class>> {
        self.thread
            .resolve_class(&FieldType::Array(Box::new(component.clone())).to_descriptor())
    }

    fn array_length(&mut self, count: i32) -> NativeResult<usize> {
        usize::try_from(count)
            .map_err(|_| self.throw(NEGATIVE_ARRAY_SIZE_EXCEPTION, Some(count.to_string())))
    }

    fn index_out_of_bounds(&mut self, array: &ObjectRef, index: i32) -> Exception {
        let length = array.array_length().unwrap_or_default();
        self.throw(
            ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION,
            Some(format!("Index {index} out of bounds for length {length}")),
        )
    }

    fn array_component(&self, array: &ObjectRef, accepts: fn(&FieldType) -> bool) -> Result<FieldType> {
        match array.array_component() {
            Some(component) if accepts(component) => Ok(component.clone()),
            _ => Err(self.vm_error(format_args!(
                "{} cannot access {}",
                inst::mnemonic(self.op),
                array.class_name()
            ))),
        }
    }

    fn arr_load(&mut self, accepts: fn(&FieldType) -> bool) -> NativeResult<()> {
        let index = self.frame.pop_int()?;
        let array = self.pop_non_null()?;
        self.array_component(&array, accepts)?;
        match array.array_get(index)? {
            Some(value) => {
                self.frame.push(value)?;
                Ok(())
            }
            None => Err(self.index_out_of_bounds(&array, index)),
        }
    }

    fn arr_store(&mut self, accepts: fn(&FieldType) -> bool) -> NativeResult<()> {
        let value = self.frame.pop()?;
        let index = self.frame.pop_int()?;
        let array = self.pop_non_null()?;
        let component = self.array_component(&array, accepts)?;
        self.check_kind(&component, &value)?;

        if let Value::Reference(Some(element)) = &value {
            let array_class = array.class()?;
            if let Some(element_class) = &array_class.array_element_class {
                if !is_assignable_to(&element.class()?, element_class) {
                    return Err(self.throw(ARRAY_STORE_EXCEPTION, Some(java_name(element.class_name()))));
                }
            }
        }

        if !array.array_set(index, narrow(&component, value))? {
            return Err(self.index_out_of_bounds(&array, index));
        }
        Ok(())
    }

    fn check_kind(&self, field_type: &FieldType, value: &Value) -> Result<()> {
        let expected = Value::zero(field_type).kind();
        if value.kind() != expected {
            return Err(self.vm_error(format_args!(
                "{} expects {expected}, found {}",
                inst::mnemonic(self.op),
                value.kind()
            )));
        }
        Ok(())
    }

    fn fieldref<'c>(&self, class: &'c Class, index: u16) -> Result<&'c Fieldref> {
        match class.get_constant(index)? {
            ConstantPoolInfo::Fieldref(fieldref) => Ok(fieldref),
            other => Err(self.vm_error(format_args!("expected Fieldref at #{index}, found {}", other.kind()))),
        }
    }

    fn resolve_field(&mut self, fieldref: &Fieldref, is_static: bool) -> Result<FieldResolve> {
        if let Some(resolved) = fieldref.resolve.get() {
            return Ok(resolved.clone());
        }
        let class = self.thread.resolve_cp_class(&fieldref.class)?;
        let name = &fieldref.name_and_type.name;
        let descriptor = &fieldref.name_and_type.descriptor;
        let no_such_field = || Error::NoSuchField {
            class_name: class.class_name.to_string(),
            field: format!("{name}:{descriptor}"),
        };

        let resolved = if is_static {
            let (owner, index) = class.static_field(name).ok_or_else(no_such_field)?;
            let declared = owner
                .static_fields_info
                .iter()
                .any(|field| field.index == index && field.descriptor == *descriptor);
            if !declared {
                return Err(no_such_field());
            }
            FieldResolve::Static {
                class: Arc::downgrade(&owner),
                index,
            }
        } else {
            let field = class
                .instance_field(name)
                .filter(|field| field.descriptor == *descriptor)
                .ok_or_else(no_such_field)?;
            FieldResolve::Instance(field.index)
        };
        let _ = fieldref.resolve.set(resolved.clone());
        Ok(resolved)
    }

    /// The declaring class of a static field, initialized, and the field's slot.
    fn static_slot(&mut self, fieldref: &Fieldref) -> NativeResult<(Arc<Class>, usize)> {
        let FieldResolve::Static { class, index } = self.resolve_field(fieldref, true)? else {
            return Err(self.vm_error("static access to an instance field").into());
        };
        let class = class
            .upgrade()
            .ok_or_else(|| self.vm_error("declaring class is no longer loaded"))?;
        initialize_class(self.thread, &class)?;
        Ok((class, index))
    }

    fn instance_slot(&mut self, fieldref: &Fieldref) -> Result<usize> {
        match self.resolve_field(fieldref, false)? {
            FieldResolve::Instance(index) => Ok(index),
            FieldResolve::Static { .. } => Err(self.vm_error("instance access to a static field")),
        }
    }

    fn get_static(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let fieldref = self.fieldref(&class, index)?;
        let (owner, slot) = self.static_slot(fieldref)?;
        self.frame.push(owner.get_static_field(slot)?)?;
        Ok(())
    }

    fn put_static(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let fieldref = self.fieldref(&class, index)?;
        let (owner, slot) = self.static_slot(fieldref)?;
        let value = self.frame.pop()?;
        let field_type = &fieldref.name_and_type.descriptor;
        self.check_kind(field_type, &value)?;
        owner.set_static_field(slot, narrow(field_type, value))?;
        Ok(())
    }

    fn get_field(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let fieldref = self.fieldref(&class, index)?;
        let slot = self.instance_slot(fieldref)?;
        let object = self.pop_non_null()?;
        self.frame.push(object.get_field(slot)?)?;
        Ok(())
    }

    fn put_field(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let fieldref = self.fieldref(&class, index)?;
        let slot = self.instance_slot(fieldref)?;
        let value = self.frame.pop()?;
        let object = self.pop_non_null()?;
        let field_type = &fieldref.name_and_type.descriptor;
        self.check_kind(field_type, &value)?;
        object.put_field(slot, narrow(field_type, value))?;
        Ok(())
    }

    fn methodref<'c>(&self, class: &'c Class, index: u16) -> Result<&'c Methodref> {
        match class.get_constant(index)? {
            ConstantPoolInfo::Methodref(methodref) | ConstantPoolInfo::InterfaceMethodref(methodref) => {
                Ok(methodref)
            }
            other => Err(self.vm_error(format_args!("expected Methodref at #{index}, found {}", other.kind()))),
        }
    }

    /// The method a symbolic reference names, looked up in the referenced class.
    fn resolve_method(&mut self, methodref: &Methodref) -> Result<(Arc<Class>, usize)> {
        if let Some(resolved) = methodref.resolve.get() {
            if let Some(class) = resolved.class.upgrade() {
                return Ok((class, resolved.index));
            }
        }
        let class = self.thread.resolve_cp_class(&methodref.class)?;
        let (owner, index) = class
            .resolve_method_key(&methodref.key)
            .ok_or_else(|| Error::NoSuchMethod {
                class_name: class.class_name.to_string(),
                method: methodref.key.to_string(),
            })?;
        let _ = methodref.resolve.set(MethodResolve {
            class: Arc::downgrade(&owner),
            index,
        });
        Ok((owner, index))
    }

    fn invoke(&mut self, class: Arc<Class>, method_index: usize, args: Vec<Value>) -> NativeResult<Option<Next>> {
        self.frame.resume_pc = self.cursor;
        Ok(Some(Next::Invoke {
            class,
            method_index,
            args,
        }))
    }

    fn invoke_static(&mut self) -> NativeResult<Option<Next>> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let methodref = self.methodref(&class, index)?;
        let (owner, method_index) = self.resolve_method(methodref)?;
        let (is_static, slots) = {
            let method = owner.method(method_index);
            (method.is_static(), method.argument_slots())
        };
        if !is_static {
            return Err(self.vm_error(format_args!("invokestatic of instance method {}", methodref.key)).into());
        }
        initialize_class(self.thread, &owner)?;
        let args = self.frame.pop_slots(slots)?;
        self.invoke(owner, method_index, args)
    }

    fn invoke_special(&mut self) -> NativeResult<Option<Next>> {
        let index = self.get_u16_args()?;
        let class = Arc::clone(&self.frame.class);
        let methodref = self.methodref(&class, index)?;
        let (owner, method_index) = self.resolve_method(methodref)?;
        let (is_static, slots) = {
            let method = owner.method(method_index);
            (method.is_static(), method.argument_slots())
        };
        if is_static {
            return Err(self.vm_error(format_args!("invokespecial of static method {}", methodref.key)).into());
        }
        let args = self.frame.pop_slots(slots)?;
        if matches!(args.first(), Some(Value::Reference(None))) {
            return Err(self.null_pointer());
        }
        self.invoke(owner, method_index, args)
    }

    fn invoke_virtual(&mut self, interface: bool) -> NativeResult<Option<Next>> {
        let index = self.get_u16_args()?;
        if interface {
            // count and a zero byte
            self.get_u16_args()?;
        }
        let class = Arc::clone(&self.frame.class);
        let methodref = self.methodref(&class, index)?;
        let (declared_class, declared_index) = self.resolve_method(methodref)?;
        let (is_static, is_private, slots) = {
            let method = declared_class.method(declared_index);
            (method.is_static(), method.is_private(), method.argument_slots())
        };
        if is_static {
            return Err(self
                .vm_error(format_args!("{} of static method {}", inst::mnemonic(self.op), methodref.key))
                .into());
        }

        let args = self.frame.pop_slots(slots)?;
        let receiver = match args.first() {
            Some(Value::Reference(Some(receiver))) => receiver.clone(),
            Some(Value::Reference(None)) => return Err(self.null_pointer()),
            _ => return Err(self.vm_error("receiver is not a reference").into()),
        };
        if is_private {
            return self.invoke(declared_class, declared_index, args);
        }

        let receiver_class = receiver.class()?;
        let (owner, method_index) = receiver_class
            .resolve_method_key(&methodref.key)
            .ok_or_else(|| Error::NoSuchMethod {
                class_name: receiver_class.class_name.to_string(),
                method: methodref.key.to_string(),
            })?;
        self.invoke(owner, method_index, args)
    }

    fn new_object(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let class = self.resolve_class(index)?;
        if class.is_abstract() || class.is_interface() {
            return Err(self
                .vm_error(format_args!("cannot instantiate {}", class.class_name))
                .into());
        }
        initialize_class(self.thread, &class)?;
        let object = self.thread.runtime.heap.new_instance(&class);
        self.frame.push(Value::Reference(Some(object)))?;
        Ok(())
    }

    fn new_array(&mut self) -> NativeResult<()> {
        let atype = self.get_u8_args()?;
        let component = match atype {
            inst::T_BOOLEAN => FieldType::Boolean,
            inst::T_CHAR => FieldType::Char,
            inst::T_FLOAT => FieldType::Float,
            inst::T_DOUBLE => FieldType::Double,
            inst::T_BYTE => FieldType::Byte,
            inst::T_SHORT => FieldType::Short,
            inst::T_INT => FieldType::Int,
            inst::T_LONG => FieldType::Long,
            _ => return Err(self.vm_error(format_args!("bad newarray type {atype}")).into()),
        };
        let count = self.frame.pop_int()?;
        let length = self.array_length(count)?;
        let class = self.array_class(&component)?;
        let array = self.allocate_array(&class, length)?;
        self.frame.push(Value::Reference(Some(array)))?;
        Ok(())
    }

    fn new_reference_array(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let component = self.resolve_class(index)?;
        let count = self.frame.pop_int()?;
        let length = self.array_length(count)?;
        let component = if component.is_array() {
            FieldType::parse(&component.class_name)
                .ok_or_else(|| self.vm_error(format_args!("bad array class {}", component.class_name)))?
        } else {
            FieldType::Object(component.class_name.to_string())
        };
        let class = self.array_class(&component)?;
        let array = self.allocate_array(&class, length)?;
        self.frame.push(Value::Reference(Some(array)))?;
        Ok(())
    }

    fn new_multi_array(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let dimensions = self.get_u8_args()? as usize;
        let class = self.resolve_class(index)?;
        if dimensions == 0 {
            return Err(self.vm_error("multianewarray with zero dimensions").into());
        }

        // outermost first
        let counts = self.frame.pop_slots(dimensions)?;
        let mut lengths = Vec::with_capacity(dimensions);
        for count in counts {
            let Value::Int(count) = count else {
                return Err(self.vm_error("multianewarray count is not an int").into());
            };
            lengths.push(self.array_length(count)?);
        }
        // arrays created at each level
        let max_array_length = self.thread.runtime.options.max_array_length;
        let mut created = 1usize;
        for &length in &lengths {
            created = created.saturating_mul(length);
            if created > max_array_length {
                return Err(self.out_of_memory());
            }
        }
        let array = self.multi_array(&class, &lengths)?;
        self.frame.push(Value::Reference(Some(array)))?;
        Ok(())
    }

    fn multi_array(&mut self, class: &Arc<Class>, lengths: &[usize]) -> NativeResult<ObjectRef> {
        let Some((&length, rest)) = lengths.split_first() else {
            return Err(self.vm_error("multianewarray without dimensions").into());
        };
        if rest.is_empty() {
            return self.allocate_array(class, length);
        }
        let element_class = class
            .array_element_class
            .as_ref()
            .filter(|element| element.is_array())
            .map(Arc::clone)
            .ok_or_else(|| {
                self.vm_error(format_args!("{} has fewer dimensions than requested", class.class_name))
            })?;
        let mut elements = Vec::new();
        if elements.try_reserve_exact(length).is_err() {
            return Err(self.out_of_memory());
        }
        for _ in 0..length {
            let element = self.multi_array(&element_class, rest)?;
            elements.push(Value::Reference(Some(element)));
        }
        Ok(self.thread.runtime.heap.new_array_with(class, elements)?)
    }

    fn allocate_array(&mut self, class: &Arc<Class>, length: usize) -> NativeResult<ObjectRef> {
        if length <= self.thread.runtime.options.max_array_length {
            if let Some(array) = self.thread.runtime.heap.new_array(class, length)? {
                return Ok(array);
            }
        }
        Err(self.out_of_memory())
    }

    fn out_of_memory(&mut self) -> Exception {
        self.throw(OUT_OF_MEMORY_ERROR, Some("Java heap space".into()))
    }

    fn check_cast(&mut self) -> NativeResult<()> {
        let index = self.get_u16_args()?;
        let target = self.resolve_class(index)?;
        let object = self.frame.pop_reference()?;
        if let Some(object) = &object {
            if !is_assignable_to(&object.class()?, &target) {
                let message = format!(
                    "class {} cannot be cast to class {}",
                    java_name(object.class_name()),
                    java_name(&target.class_name)
                );
                return Err(self.throw(CLASS_CAST_EXCEPTION, Some(message)));
            }
        }
        self.frame.push(Value::Reference(object))?;
        Ok(())
    }
}

fn compare(ordering: Option<Ordering>, nan: i32) -> i32 {
    match ordering {
        None => nan,
        Some(Ordering::Less) => -1,
        Some(Ordering::Equal) => 0,
        Some(Ordering::Greater) => 1,
    }
}

/// Truncates an int to the width of a boolean, byte, char or short slot.
pub(crate) fn narrow(field_type: &FieldType, value: Value) -> Value {
    match (field_type, value) {
        (FieldType::Boolean, Value::Int(v)) => Value::Int(v & 1),
        (FieldType::Byte, Value::Int(v)) => Value::Int(v as i8 as i32),
        (FieldType::Char, Value::Int(v)) => Value::Int(v as u16 as i32),
        (FieldType::Short, Value::Int(v)) => Value::Int(v as i16 as i32),
        (_, value) => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{class::ClassBuilder, class::CodeBuilder, consts::MethodAccessFlag};

    fn runtime_with(
        methods: &[(&str, &str, &dyn Fn(&mut CodeBuilder<'_>))],
        max_call_depth: usize,
    ) -> (Runtime, Arc<Class>) {
        let mut builder = ClassBuilder::new("Calc", Some("java/lang/Object"));
        for (name, descriptor, build) in methods {
            builder = builder.method(MethodAccessFlag::STATIC, name, descriptor, |c| build(c));
        }
        let runtime = Runtime::builder()
            .max_call_depth(max_call_depth)
            .class("Calc", builder.to_bytes().unwrap())
            .build()
            .unwrap();
        let class = runtime.load_class("Calc").unwrap();
        (runtime, class)
    }

    fn call(
        runtime: &Runtime,
        class: &Arc<Class>,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> NativeResult<Option<Value>> {
        let index = class.declared_method(name, descriptor).unwrap();
        runtime.thread().invoke(Arc::clone(class), index, args)
    }

    #[test]
    fn test_stack_depth_per_instruction() {
        let (runtime, class) = runtime_with(
            &[("calc", "()I", &|c: &mut CodeBuilder<'_>| {
                c.iconst(2)
                    .iconst(3)
                    .insn(inst::IADD)
                    .lconst(1)
                    .lconst(1)
                    .insn(inst::LMUL)
                    .insn(inst::L2I)
                    .insn(inst::IMUL)
                    .insn(inst::I2D)
                    .dconst(1.0)
                    .insn(inst::DDIV)
                    .insn(inst::D2F)
                    .insn(inst::FNEG)
                    .insn(inst::F2I)
                    .insn(inst::IRETURN);
            })],
            64,
        );
        let index = class.declared_method("calc", "()I").unwrap();
        let mut frame = Frame::new(Arc::clone(&class), index, Vec::new()).unwrap();
        let mut thread = runtime.thread();
        for expected in [1, 2, 1, 3, 5, 3, 2, 1, 2, 4, 2, 1, 1, 1] {
            assert!(thread.step(&mut frame).unwrap().is_none());
            assert_eq!(frame.depth(), expected, "at pc {}", frame.pc());
        }
        match thread.step(&mut frame).unwrap() {
            Some(Next::Return(Some(Value::Int(value)))) => assert_eq!(value, -5),
            _ => panic!("expected an int return"),
        }
    }

    #[test]
    fn test_caught_division_by_zero() {
        let (runtime, class) = runtime_with(
            &[("safe", "()I", &|c: &mut CodeBuilder<'_>| {
                let start = c.new_label();
                let end = c.new_label();
                let handler = c.new_label();
                c.try_catch(start, end, handler, Some(ARITHMETIC_EXCEPTION));
                c.bind(start)
                    .iconst(1)
                    .iconst(0)
                    .insn(inst::IDIV)
                    .insn(inst::IRETURN);
                c.bind(handler).bind(end).insn(inst::POP).iconst(-1).insn(inst::IRETURN);
            })],
            64,
        );
        let index = class.declared_method("safe", "()I").unwrap();
        let mut frame = Frame::new(Arc::clone(&class), index, Vec::new()).unwrap();
        let mut thread = runtime.thread();
        thread.step(&mut frame).unwrap();
        thread.step(&mut frame).unwrap();
        let exception = match thread.step(&mut frame) {
            Err(Exception::Java(exception)) => exception,
            _ => panic!("expected ArithmeticException"),
        };
        assert_eq!(exception.class_name(), ARITHMETIC_EXCEPTION);
        let frame = thread.unwind(Box::new(frame), exception).unwrap();
        assert_eq!(frame.pc(), 4);
        assert_eq!(frame.depth(), 1);

        let result = call(&runtime, &class, "safe", "()I", Vec::new()).unwrap();
        assert_eq!(result, Some(Value::Int(-1)));
    }

    #[test]
    fn test_uncaught_exception_leaves_every_frame() {
        let (runtime, class) = runtime_with(
            &[
                ("boom", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(1).iconst(0).insn(inst::IREM).insn(inst::IRETURN);
                }),
                ("outer", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.invokestatic("Calc", "boom", "()I").insn(inst::IRETURN);
                }),
            ],
            64,
        );
        let err = call(&runtime, &class, "outer", "()I", Vec::new()).unwrap_err();
        match Error::from(err) {
            Error::Thrown(thrown) => {
                assert_eq!(thrown.class_name, ARITHMETIC_EXCEPTION);
                assert_eq!(thrown.message.as_deref(), Some("/ by zero"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_call_depth_limit_is_fatal() {
        let (runtime, class) = runtime_with(
            &[("recurse", "()V", &|c: &mut CodeBuilder<'_>| {
                c.invokestatic("Calc", "recurse", "()V").insn(inst::RETURN);
            })],
            16,
        );
        match call(&runtime, &class, "recurse", "()V", Vec::new()) {
            Err(Exception::Fatal(Error::VirtualMachine(message))) => {
                assert!(message.contains("call depth"), "{message}");
            }
            _ => panic!("expected a fatal call depth error"),
        }
    }

    #[test]
    fn test_switches() {
        let (runtime, class) = runtime_with(
            &[
                ("table", "(I)I", &|c: &mut CodeBuilder<'_>| {
                    let one = c.new_label();
                    let two = c.new_label();
                    let default = c.new_label();
                    c.iload(0).tableswitch(1, default, &[one, two]);
                    c.bind(one).iconst(10).insn(inst::IRETURN);
                    c.bind(two).iconst(20).insn(inst::IRETURN);
                    c.bind(default).iconst(-1).insn(inst::IRETURN);
                }),
                ("lookup", "(I)I", &|c: &mut CodeBuilder<'_>| {
                    let low = c.new_label();
                    let high = c.new_label();
                    let default = c.new_label();
                    c.iload(0).lookupswitch(default, &[(1000, high), (-100, low)]);
                    c.bind(low).iconst(1).insn(inst::IRETURN);
                    c.bind(high).iconst(2).insn(inst::IRETURN);
                    c.bind(default).iconst(0).insn(inst::IRETURN);
                }),
            ],
            64,
        );
        let table = |v| call(&runtime, &class, "table", "(I)I", vec![Value::Int(v)]).unwrap();
        assert_eq!(table(1), Some(Value::Int(10)));
        assert_eq!(table(2), Some(Value::Int(20)));
        assert_eq!(table(5), Some(Value::Int(-1)));
        assert_eq!(table(i32::MIN), Some(Value::Int(-1)));

        let lookup = |v| call(&runtime, &class, "lookup", "(I)I", vec![Value::Int(v)]).unwrap();
        assert_eq!(lookup(-100), Some(Value::Int(1)));
        assert_eq!(lookup(1000), Some(Value::Int(2)));
        assert_eq!(lookup(7), Some(Value::Int(0)));
    }

    #[test]
    fn test_shift_distance_is_masked() {
        let (runtime, class) = runtime_with(
            &[
                ("lshift", "()J", &|c: &mut CodeBuilder<'_>| {
                    c.lconst(1).iconst(65).insn(inst::LSHL).insn(inst::LRETURN);
                }),
                ("ishift", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(-16).iconst(33).insn(inst::IUSHR).insn(inst::IRETURN);
                }),
            ],
            64,
        );
        assert_eq!(
            call(&runtime, &class, "lshift", "()J", Vec::new()).unwrap(),
            Some(Value::Long(2))
        );
        assert_eq!(
            call(&runtime, &class, "ishift", "()I", Vec::new()).unwrap(),
            Some(Value::Int(((-16i32) as u32 >> 1) as i32))
        );
    }

    #[test]
    fn test_iinc_accepts_negative_and_wide_deltas() {
        let (runtime, class) = runtime_with(
            &[("count", "()I", &|c: &mut CodeBuilder<'_>| {
                c.iconst(10)
                    .istore(0)
                    .iinc(0, -3)
                    .iinc(0, 1000)
                    .iload(0)
                    .insn(inst::IRETURN);
            })],
            64,
        );
        assert_eq!(
            call(&runtime, &class, "count", "()I", Vec::new()).unwrap(),
            Some(Value::Int(1007))
        );
    }

    #[test]
    fn test_int_arrays() {
        let (runtime, class) = runtime_with(
            &[
                ("sum", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(3)
                        .newarray(inst::T_INT)
                        .astore(0)
                        .aload(0)
                        .iconst(1)
                        .iconst(42)
                        .insn(inst::IASTORE)
                        .aload(0)
                        .iconst(1)
                        .insn(inst::IALOAD)
                        .aload(0)
                        .insn(inst::ARRAYLENGTH)
                        .insn(inst::IADD)
                        .insn(inst::IRETURN);
                }),
                ("outside", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(3)
                        .newarray(inst::T_INT)
                        .iconst(3)
                        .insn(inst::IALOAD)
                        .insn(inst::IRETURN);
                }),
            ],
            64,
        );
        assert_eq!(
            call(&runtime, &class, "sum", "()I", Vec::new()).unwrap(),
            Some(Value::Int(45))
        );
        match call(&runtime, &class, "outside", "()I", Vec::new()) {
            Err(Exception::Java(exception)) => {
                assert_eq!(exception.class_name(), ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION)
            }
            _ => panic!("expected ArrayIndexOutOfBoundsException"),
        }
    }

    #[test]
    fn test_oversized_arrays_throw_out_of_memory() {
        let (runtime, class) = runtime_with(
            &[
                ("huge", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(i32::MAX)
                        .newarray(inst::T_INT)
                        .insn(inst::ARRAYLENGTH)
                        .insn(inst::IRETURN);
                }),
                ("grid", "()I", &|c: &mut CodeBuilder<'_>| {
                    c.iconst(1 << 20)
                        .iconst(1 << 20)
                        .multianewarray("[[J", 2)
                        .insn(inst::ARRAYLENGTH)
                        .insn(inst::IRETURN);
                }),
                ("guarded", "()I", &|c: &mut CodeBuilder<'_>| {
                    let start = c.new_label();
                    let end = c.new_label();
                    let handler = c.new_label();
                    c.try_catch(start, end, handler, Some(OUT_OF_MEMORY_ERROR));
                    c.bind(start)
                        .iconst(i32::MAX)
                        .anewarray("java/lang/String")
                        .insn(inst::ARRAYLENGTH)
                        .insn(inst::IRETURN);
                    c.bind(handler).bind(end).insn(inst::POP).iconst(-1).insn(inst::IRETURN);
                }),
            ],
            64,
        );
        for name in ["huge", "grid"] {
            match call(&runtime, &class, name, "()I", Vec::new()) {
                Err(Exception::Java(exception)) => {
                    assert_eq!(exception.class_name(), OUT_OF_MEMORY_ERROR, "{name}")
                }
                _ => panic!("expected OutOfMemoryError from {name}"),
            }
        }
        assert_eq!(
            call(&runtime, &class, "guarded", "()I", Vec::new()).unwrap(),
            Some(Value::Int(-1))
        );
    }

    #[test]
    fn test_narrow() {
        assert_eq!(narrow(&FieldType::Byte, Value::Int(200)), Value::Int(-56));
        assert_eq!(narrow(&FieldType::Char, Value::Int(-1)), Value::Int(0xffff));
        assert_eq!(narrow(&FieldType::Boolean, Value::Int(3)), Value::Int(1));
        assert_eq!(narrow(&FieldType::Int, Value::Int(200)), Value::Int(200));
    }
}
