//! Class files shared by the integration tests, assembled with `ClassBuilder`.

#![allow(dead_code)]

use javaclass::{
    class::ClassBuilder,
    consts::{ClassAccessFlag, FieldAccessFlag, MethodAccessFlag},
    instructions as inst,
};

pub const OBJECT: &str = "java/lang/Object";
pub const STRING: &str = "java/lang/String";
pub const PRINT_STREAM: &str = "Ljava/io/PrintStream;";

const PUBLIC: MethodAccessFlag = MethodAccessFlag::PUBLIC;
const PUBLIC_STATIC: MethodAccessFlag = MethodAccessFlag::PUBLIC.union(MethodAccessFlag::STATIC);

/// `HelloWorld.main` prints a greeting, the number of arguments and the first one.
pub fn hello_world() -> Vec<u8> {
    ClassBuilder::new("HelloWorld", Some(OBJECT))
        .source_file("HelloWorld.java")
        .method(PUBLIC_STATIC, "main", "([Ljava/lang/String;)V", |c| {
            let done = c.new_label();
            c.getstatic("java/lang/System", "out", PRINT_STREAM)
                .ldc_string("Hello World!")
                .invokevirtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V")
                .getstatic("java/lang/System", "out", PRINT_STREAM)
                .aload(0)
                .insn(inst::ARRAYLENGTH)
                .invokevirtual("java/io/PrintStream", "println", "(I)V")
                .aload(0)
                .insn(inst::ARRAYLENGTH)
                .jump(inst::IFEQ, done)
                .getstatic("java/lang/System", "out", PRINT_STREAM)
                .aload(0)
                .iconst(0)
                .insn(inst::AALOAD)
                .invokevirtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V");
            c.bind(done).insn(inst::RETURN);
        })
        .to_bytes()
        .unwrap()
}

/// `demo/Calculator`: overloaded statics, an array loop, a static counter set by
/// `<clinit>`, an instance accumulator and a method that throws.
pub fn calculator() -> Vec<u8> {
    const CLASS: &str = "demo/Calculator";
    ClassBuilder::new(CLASS, Some(OBJECT))
        .field(FieldAccessFlag::PUBLIC | FieldAccessFlag::STATIC, "counter", "I")
        .field(FieldAccessFlag::PRIVATE, "total", "I")
        .method(MethodAccessFlag::STATIC, "<clinit>", "()V", |c| {
            c.getstatic(CLASS, "counter", "I")
                .iconst(100)
                .insn(inst::IADD)
                .putstatic(CLASS, "counter", "I")
                .insn(inst::RETURN);
        })
        .method(PUBLIC, "<init>", "(I)V", |c| {
            c.aload(0)
                .invokespecial(OBJECT, "<init>", "()V")
                .aload(0)
                .iload(1)
                .putfield(CLASS, "total", "I")
                .insn(inst::RETURN);
        })
        .method(PUBLIC_STATIC, "add", "(II)I", |c| {
            c.iload(0).iload(1).insn(inst::IADD).insn(inst::IRETURN);
        })
        .method(PUBLIC_STATIC, "add", "(JJ)J", |c| {
            c.lload(0).lload(2).insn(inst::LADD).insn(inst::LRETURN);
        })
        .method(PUBLIC_STATIC, "greet", "(Ljava/lang/String;)Ljava/lang/String;", |c| {
            c.ldc_string("Hello, ")
                .aload(0)
                .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
                .insn(inst::ARETURN);
        })
        .method(PUBLIC_STATIC, "sum", "([I)I", |c| {
            let top = c.new_label();
            let done = c.new_label();
            c.iconst(0).istore(1).iconst(0).istore(2);
            c.bind(top)
                .iload(2)
                .aload(0)
                .insn(inst::ARRAYLENGTH)
                .jump(inst::IF_ICMPGE, done)
                .iload(1)
                .aload(0)
                .iload(2)
                .insn(inst::IALOAD)
                .insn(inst::IADD)
                .istore(1)
                .iinc(2, 1)
                .jump(inst::GOTO, top);
            c.bind(done).iload(1).insn(inst::IRETURN);
        })
        .method(PUBLIC_STATIC, "halve", "(D)D", |c| {
            c.dload(0).dconst(2.0).insn(inst::DDIV).insn(inst::DRETURN);
        })
        .method(PUBLIC_STATIC, "id", "(Ljava/lang/Object;)Ljava/lang/Object;", |c| {
            c.aload(0).insn(inst::ARETURN);
        })
        .method(PUBLIC_STATIC, "fail", "()V", |c| {
            c.new_instance("java/lang/IllegalArgumentException")
                .insn(inst::DUP)
                .ldc_string("bad input")
                .invokespecial(
                    "java/lang/IllegalArgumentException",
                    "<init>",
                    "(Ljava/lang/String;)V",
                )
                .insn(inst::ATHROW);
        })
        .method(PUBLIC, "add", "(I)I", |c| {
            c.aload(0)
                .aload(0)
                .getfield(CLASS, "total", "I")
                .iload(1)
                .insn(inst::IADD)
                .putfield(CLASS, "total", "I")
                .aload(0)
                .getfield(CLASS, "total", "I")
                .insn(inst::IRETURN);
        })
        .to_bytes()
        .unwrap()
}

/// The interface `demo/Shape` with a single `area()I`.
pub fn shape() -> Vec<u8> {
    ClassBuilder::new("demo/Shape", Some(OBJECT))
        .access_flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::INTERFACE | ClassAccessFlag::ABSTRACT)
        .abstract_method(PUBLIC, "area", "()I")
        .to_bytes()
        .unwrap()
}

/// `demo/Square implements Shape`.
pub fn square() -> Vec<u8> {
    const CLASS: &str = "demo/Square";
    ClassBuilder::new(CLASS, Some(OBJECT))
        .interface("demo/Shape")
        .field(FieldAccessFlag::PRIVATE | FieldAccessFlag::FINAL, "side", "I")
        .method(PUBLIC, "<init>", "(I)V", |c| {
            c.aload(0)
                .invokespecial(OBJECT, "<init>", "()V")
                .aload(0)
                .iload(1)
                .putfield(CLASS, "side", "I")
                .insn(inst::RETURN);
        })
        .method(PUBLIC, "area", "()I", |c| {
            c.aload(0)
                .getfield(CLASS, "side", "I")
                .insn(inst::DUP)
                .insn(inst::IMUL)
                .insn(inst::IRETURN);
        })
        .to_bytes()
        .unwrap()
}

/// `demo/Shapes.total(Shape, Shape)` sums the areas through `invokeinterface`.
pub fn shapes() -> Vec<u8> {
    ClassBuilder::new("demo/Shapes", Some(OBJECT))
        .method(PUBLIC_STATIC, "total", "(Ldemo/Shape;Ldemo/Shape;)I", |c| {
            c.aload(0)
                .invokeinterface("demo/Shape", "area", "()I")
                .aload(1)
                .invokeinterface("demo/Shape", "area", "()I")
                .insn(inst::IADD)
                .insn(inst::IRETURN);
        })
        .to_bytes()
        .unwrap()
}

/// `Lambda.run()` starts with an `invokedynamic`.
pub fn lambda() -> Vec<u8> {
    ClassBuilder::new("Lambda", Some(OBJECT))
        .method(PUBLIC_STATIC, "run", "()V", |c| {
            c.raw(&[inst::INVOKEDYNAMIC, 0, 1, 0, 0]).insn(inst::RETURN);
        })
        .to_bytes()
        .unwrap()
}
