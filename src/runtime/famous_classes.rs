//! The bootstrap classes every runtime starts with, assembled in memory.

use std::sync::Arc;

use crate::{
    class::ClassBuilder,
    consts::{
        ARITHMETIC_EXCEPTION, ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION,
        CLASS_CAST_EXCEPTION, CLINIT, ClassAccessFlag, DETAIL_MESSAGE, FieldAccessFlag, INIT,
        INDEX_OUT_OF_BOUNDS_EXCEPTION, MethodAccessFlag, NEGATIVE_ARRAY_SIZE_EXCEPTION,
        NULL_POINTER_EXCEPTION, OBJECT_CLASS, OUT_OF_MEMORY_ERROR, PRINT_STREAM_CLASS, STRING_CLASS,
        STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION, SYSTEM_CLASS, THROWABLE_CLASS,
    },
    error::Result,
    instructions as inst,
    runtime::{BootstrapClassLoader, Class, MemorySource, native::PRINT_DESCRIPTORS},
};

const EXCEPTION_CLASS: &str = "java/lang/Exception";
const RUNTIME_EXCEPTION_CLASS: &str = "java/lang/RuntimeException";
const ERROR_CLASS: &str = "java/lang/Error";
const ILLEGAL_ARGUMENT_EXCEPTION: &str = "java/lang/IllegalArgumentException";
const VIRTUAL_MACHINE_ERROR: &str = "java/lang/VirtualMachineError";

// class name, superclass
const THROWABLES: [(&str, &str); 14] = [
    (EXCEPTION_CLASS, THROWABLE_CLASS),
    (ERROR_CLASS, THROWABLE_CLASS),
    (VIRTUAL_MACHINE_ERROR, ERROR_CLASS),
    (OUT_OF_MEMORY_ERROR, VIRTUAL_MACHINE_ERROR),
    (RUNTIME_EXCEPTION_CLASS, EXCEPTION_CLASS),
    (ARITHMETIC_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (NULL_POINTER_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (INDEX_OUT_OF_BOUNDS_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, INDEX_OUT_OF_BOUNDS_EXCEPTION),
    (STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION, INDEX_OUT_OF_BOUNDS_EXCEPTION),
    (NEGATIVE_ARRAY_SIZE_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (CLASS_CAST_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (ARRAY_STORE_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
    (ILLEGAL_ARGUMENT_EXCEPTION, RUNTIME_EXCEPTION_CLASS),
];

/// Classes the runtime itself needs to hand out objects.
#[derive(Debug)]
pub(crate) struct FamousClasses {
    pub(crate) string: Arc<Class>,
}

impl FamousClasses {
    pub(crate) fn load(class_loader: &BootstrapClassLoader) -> Result<FamousClasses> {
        Ok(FamousClasses {
            string: class_loader.resolve_class(STRING_CLASS)?,
        })
    }
}

/// The source serving `java/lang/Object`, `String`, `System`, `PrintStream` and the
/// throwables the interpreter raises.
pub(crate) fn builtin_source() -> Result<MemorySource> {
    let public = MethodAccessFlag::PUBLIC;
    let public_static = MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC;
    let mut source = MemorySource::new("built-in");

    let object = ClassBuilder::new(OBJECT_CLASS, None)
        .native_method(public, INIT, "()V")
        .native_method(public, "hashCode", "()I")
        .native_method(public, "equals", "(Ljava/lang/Object;)Z")
        .native_method(public, "toString", "()Ljava/lang/String;")
        .to_bytes()?;
    source.insert(OBJECT_CLASS, object);

    let string = ClassBuilder::new(STRING_CLASS, Some(OBJECT_CLASS))
        .access_flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::SUPER)
        .native_method(public, INIT, "()V")
        .native_method(public, "length", "()I")
        .native_method(public, "isEmpty", "()Z")
        .native_method(public, "charAt", "(I)C")
        .native_method(public, "equals", "(Ljava/lang/Object;)Z")
        .native_method(public, "hashCode", "()I")
        .native_method(public, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
        .native_method(public, "toString", "()Ljava/lang/String;")
        .native_method(public_static, "valueOf", "(Ljava/lang/Object;)Ljava/lang/String;")
        .native_method(public_static, "valueOf", "(I)Ljava/lang/String;")
        .to_bytes()?;
    source.insert(STRING_CLASS, string);

    let stream_field = FieldAccessFlag::PUBLIC | FieldAccessFlag::STATIC | FieldAccessFlag::FINAL;
    let system = ClassBuilder::new(SYSTEM_CLASS, Some(OBJECT_CLASS))
        .access_flags(ClassAccessFlag::PUBLIC | ClassAccessFlag::FINAL | ClassAccessFlag::SUPER)
        .field(stream_field, "out", "Ljava/io/PrintStream;")
        .field(stream_field, "err", "Ljava/io/PrintStream;")
        .native_method(MethodAccessFlag::STATIC, CLINIT, "()V")
        .native_method(
            public_static,
            "arraycopy",
            "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        )
        .native_method(public_static, "identityHashCode", "(Ljava/lang/Object;)I")
        .native_method(public_static, "currentTimeMillis", "()J")
        .native_method(public_static, "nanoTime", "()J")
        .to_bytes()?;
    source.insert(SYSTEM_CLASS, system);

    let mut print_stream = ClassBuilder::new(PRINT_STREAM_CLASS, Some(OBJECT_CLASS))
        .field(FieldAccessFlag::PRIVATE | FieldAccessFlag::FINAL, "fd", "I")
        .native_method(public, "println", "()V");
    for descriptor in PRINT_DESCRIPTORS {
        print_stream = print_stream
            .native_method(public, "print", descriptor)
            .native_method(public, "println", descriptor);
    }
    source.insert(PRINT_STREAM_CLASS, print_stream.to_bytes()?);

    let throwable = ClassBuilder::new(THROWABLE_CLASS, Some(OBJECT_CLASS))
        .field(FieldAccessFlag::PRIVATE, DETAIL_MESSAGE, "Ljava/lang/String;")
        .native_method(public, INIT, "()V")
        .native_method(public, INIT, "(Ljava/lang/String;)V")
        .native_method(public, "getMessage", "()Ljava/lang/String;")
        .native_method(public, "toString", "()Ljava/lang/String;")
        .to_bytes()?;
    source.insert(THROWABLE_CLASS, throwable);

    for (class_name, super_name) in THROWABLES {
        source.insert(class_name, throwable_subclass(class_name, super_name)?);
    }
    Ok(source)
}

/// A throwable whose two constructors delegate to the superclass.
fn throwable_subclass(class_name: &str, super_name: &str) -> Result<Vec<u8>> {
    ClassBuilder::new(class_name, Some(super_name))
        .method(MethodAccessFlag::PUBLIC, INIT, "()V", |c| {
            c.aload(0)
                .invokespecial(super_name, INIT, "()V")
                .insn(inst::RETURN);
        })
        .method(MethodAccessFlag::PUBLIC, INIT, "(Ljava/lang/String;)V", |c| {
            c.aload(0)
                .aload(1)
                .invokespecial(super_name, INIT, "(Ljava/lang/String;)V")
                .insn(inst::RETURN);
        })
        .to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ClassSource;

    #[test]
    fn test_builtin_source_serves_every_bootstrap_class() {
        let source = builtin_source().unwrap();
        for class_name in [OBJECT_CLASS, STRING_CLASS, SYSTEM_CLASS, PRINT_STREAM_CLASS, THROWABLE_CLASS] {
            assert!(source.find_class(class_name).unwrap().is_some(), "{class_name}");
        }
        for (class_name, _) in THROWABLES {
            assert!(source.find_class(class_name).unwrap().is_some(), "{class_name}");
        }
        assert_eq!(source.len(), 5 + THROWABLES.len());
    }

    #[test]
    fn test_builtin_classes_link() {
        let runtime = crate::Runtime::builder().build().unwrap();
        let exception = runtime.load_class(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION).unwrap();
        assert_eq!(
            exception.super_class().unwrap().name(),
            INDEX_OUT_OF_BOUNDS_EXCEPTION
        );
        assert!(exception.instance_field(DETAIL_MESSAGE).is_some());
        let system = runtime.load_class(SYSTEM_CLASS).unwrap();
        assert_eq!(system.static_fields().len(), 2);
    }
}
