use std::{
    io::Write,
    sync::LazyLock,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

use tracing::warn;

use crate::{
    consts::{
        ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, ARRAY_STORE_EXCEPTION, CLINIT, NULL_POINTER_EXCEPTION,
        PRINT_STREAM_CLASS, SYSTEM_CLASS,
    },
    error::Error,
    runtime::{
        NativeEnv, NativeResult, ObjectRef, Value,
        inheritance::is_assignable_to,
        interpreter::java_name,
        native::{NativeRegistry, format_double, format_float},
    },
};

const FD_FIELD: &str = "fd";
const STDOUT_FD: i32 = 1;
const STDERR_FD: i32 = 2;

// static { out = new PrintStream(1); err = new PrintStream(2); }
fn native_system_clinit(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let out = new_print_stream(env, STDOUT_FD)?;
    let err = new_print_stream(env, STDERR_FD)?;
    let system = env.class.clone();
    for (name, stream) in [("out", out), ("err", err)] {
        let (owner, index) = system.static_field(name).ok_or_else(|| Error::NoSuchField {
            class_name: SYSTEM_CLASS.to_string(),
            field: name.to_string(),
        })?;
        owner.set_static_field(index, Value::Reference(Some(stream)))?;
    }
    Ok(None)
}

fn new_print_stream(env: &mut NativeEnv<'_, '_>, fd: i32) -> NativeResult<ObjectRef> {
    let class = env.resolve_class(PRINT_STREAM_CLASS)?;
    env.initialize_class(&class)?;
    let stream = env.runtime().heap.new_instance(&class);
    let field = class.instance_field(FD_FIELD).ok_or_else(|| Error::NoSuchField {
        class_name: PRINT_STREAM_CLASS.to_string(),
        field: FD_FIELD.to_string(),
    })?;
    stream.put_field(field.index, Value::Int(fd))?;
    Ok(stream)
}

//     public static native void arraycopy(Object src,  int  srcPos,
//                                         Object dest, int destPos,
//                                         int length);
fn native_system_arraycopy(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let src = env.reference(0)?;
    let src_pos = env.int(1)?;
    let dest = env.reference(2)?;
    let dest_pos = env.int(3)?;
    let length = env.int(4)?;

    let (Some(src), Some(dest)) = (src, dest) else {
        return Err(env.throw(NULL_POINTER_EXCEPTION, None));
    };
    let (Some(src_type), Some(dest_type)) = (src.array_component(), dest.array_component()) else {
        let culprit = if src.is_array() { &dest } else { &src };
        let message = format!(
            "arraycopy: {} type {} is not an array",
            if src.is_array() { "destination" } else { "source" },
            java_name(culprit.class_name())
        );
        return Err(env.throw(ARRAY_STORE_EXCEPTION, Some(&message)));
    };
    let primitive = !src_type.is_reference() || !dest_type.is_reference();
    if primitive && src_type != dest_type {
        let message = format!(
            "arraycopy: type mismatch: can not copy {}[] into {}[]",
            src_type, dest_type
        );
        return Err(env.throw(ARRAY_STORE_EXCEPTION, Some(&message)));
    }

    let src_len = src.array_length().unwrap_or_default() as i64;
    let dest_len = dest.array_length().unwrap_or_default() as i64;
    let (src_pos, dest_pos, length) = (src_pos as i64, dest_pos as i64, length as i64);
    if src_pos < 0 || dest_pos < 0 || length < 0 {
        let message = format!("arraycopy: negative position or length {length}");
        return Err(env.throw(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message)));
    }
    if src_pos + length > src_len {
        let message = format!(
            "arraycopy: last source index {} out of bounds for length {src_len}",
            src_pos + length
        );
        return Err(env.throw(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message)));
    }
    if dest_pos + length > dest_len {
        let message = format!(
            "arraycopy: last destination index {} out of bounds for length {dest_len}",
            dest_pos + length
        );
        return Err(env.throw(ARRAY_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message)));
    }

    // a snapshot, so overlapping copies within one array behave like memmove
    let elements = src.array_elements().unwrap_or_default();
    let dest_class = dest.class()?;
    let element_class = dest_class.array_element_class.as_ref();
    for offset in 0..length {
        let value = elements[(src_pos + offset) as usize].clone();
        if let (Value::Reference(Some(element)), Some(element_class)) = (&value, element_class) {
            if !is_assignable_to(&element.class()?, element_class) {
                let message = format!(
                    "arraycopy: element type {} cannot be stored into {}",
                    java_name(element.class_name()),
                    java_name(&dest_class.class_name)
                );
                return Err(env.throw(ARRAY_STORE_EXCEPTION, Some(&message)));
            }
        }
        dest.array_set((dest_pos + offset) as i32, value)?;
    }
    Ok(None)
}

// public static native int identityHashCode(Object x);
fn native_system_identity_hash_code(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let hash = env.reference(0)?.map_or(0, |object| object.identity_hash());
    Ok(Some(Value::Int(hash)))
}

// public static native long currentTimeMillis();
fn current_time_millis(_env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default();
    Ok(Some(Value::Long(millis)))
}

// public static native long nanoTime();
fn nano_time(_env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    static INSTANT_BASE: LazyLock<Instant> = LazyLock::new(Instant::now);
    let nanos = INSTANT_BASE.elapsed().as_nanos() as i64;
    Ok(Some(Value::Long(nanos)))
}

/// The text `print(descriptor)` writes for the argument at index 1.
fn print_text(env: &mut NativeEnv<'_, '_>, descriptor: &str) -> NativeResult<String> {
    let text = match descriptor {
        "()V" => String::new(),
        "(Z)V" => (env.int(1)? != 0).to_string(),
        "(C)V" => char::decode_utf16([env.int(1)? as u16])
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
        "(I)V" => env.int(1)?.to_string(),
        "(J)V" => env.long(1)?.to_string(),
        "(F)V" => format_float(env.float(1)?),
        "(D)V" => format_double(env.double(1)?),
        _ => {
            let object = env.reference(1)?;
            env.to_java_string(object)?
        }
    };
    Ok(text)
}

fn print(env: &mut NativeEnv<'_, '_>, descriptor: &str, newline: bool) -> NativeResult<Option<Value>> {
    let mut text = print_text(env, descriptor)?;
    if newline {
        text.push('\n');
    }

    let this = env.this()?;
    let class = this.class()?;
    let fd = match class.instance_field(FD_FIELD).map(|field| this.get_field(field.index)) {
        Some(Ok(Value::Int(fd))) => fd,
        _ => STDOUT_FD,
    };
    let options = env.runtime().options();
    let sink = if fd == STDERR_FD {
        &options.stderr
    } else {
        &options.stdout
    };
    let mut sink = sink.lock();
    if let Err(err) = sink.write_all(text.as_bytes()).and_then(|_| sink.flush()) {
        warn!(fd, %err, "failed to write program output");
    }
    Ok(None)
}

pub(crate) const PRINT_DESCRIPTORS: [&str; 8] = [
    "(Z)V",
    "(C)V",
    "(I)V",
    "(J)V",
    "(F)V",
    "(D)V",
    "(Ljava/lang/String;)V",
    "(Ljava/lang/Object;)V",
];

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(SYSTEM_CLASS, CLINIT, "()V", native_system_clinit);
    registry.register(
        SYSTEM_CLASS,
        "arraycopy",
        "(Ljava/lang/Object;ILjava/lang/Object;II)V",
        native_system_arraycopy,
    );
    registry.register(
        SYSTEM_CLASS,
        "identityHashCode",
        "(Ljava/lang/Object;)I",
        native_system_identity_hash_code,
    );
    registry.register(SYSTEM_CLASS, "currentTimeMillis", "()J", current_time_millis);
    registry.register(SYSTEM_CLASS, "nanoTime", "()J", nano_time);

    registry.register(PRINT_STREAM_CLASS, "println", "()V", |env| print(env, "()V", true));
    for descriptor in PRINT_DESCRIPTORS {
        registry.register(PRINT_STREAM_CLASS, "print", descriptor, move |env| {
            print(env, descriptor, false)
        });
        registry.register(PRINT_STREAM_CLASS, "println", descriptor, move |env| {
            print(env, descriptor, true)
        });
    }
}
