use std::sync::Arc;

use crate::{
    consts::{INIT, NULL_POINTER_EXCEPTION, STRING_CLASS, STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION},
    error::Error,
    runtime::{NativeEnv, NativeResult, ObjectRef, Value, native::NativeRegistry},
};

fn this_str(env: &NativeEnv<'_, '_>) -> NativeResult<Arc<str>> {
    let this = env.this()?;
    this.string()
        .ok_or_else(|| Error::vm(format!("{} is not a string", this.class_name())).into())
}

fn string_value(string: ObjectRef) -> NativeResult<Option<Value>> {
    Ok(Some(Value::Reference(Some(string))))
}

// public String()
fn native_string_init(_env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    Ok(None)
}

// public int length();
fn native_string_length(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let length = this_str(env)?.encode_utf16().count();
    Ok(Some(Value::Int(length as i32)))
}

// public boolean isEmpty();
fn native_string_is_empty(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    Ok(Some(Value::Int(this_str(env)?.is_empty() as i32)))
}

// public char charAt(int index);
fn native_string_char_at(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let value = this_str(env)?;
    let index = env.int(1)?;
    let unit = usize::try_from(index)
        .ok()
        .and_then(|i| value.encode_utf16().nth(i));
    match unit {
        Some(unit) => Ok(Some(Value::Int(unit as i32))),
        None => {
            let length = value.encode_utf16().count();
            let message = format!("Index {index} out of bounds for length {length}");
            Err(env.throw(STRING_INDEX_OUT_OF_BOUNDS_EXCEPTION, Some(&message)))
        }
    }
}

// public boolean equals(Object anObject);
fn native_string_equals(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let value = this_str(env)?;
    let equal = env
        .reference(1)?
        .and_then(|other| other.string())
        .is_some_and(|other| other == value);
    Ok(Some(Value::Int(equal as i32)))
}

// public int hashCode();
fn native_string_hash_code(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let hash = this_str(env)?
        .encode_utf16()
        .fold(0i32, |hash, unit| hash.wrapping_mul(31).wrapping_add(unit as i32));
    Ok(Some(Value::Int(hash)))
}

// public String concat(String str);
fn native_string_concat(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    let value = this_str(env)?;
    let Some(other) = env.string(1)? else {
        return Err(env.throw(NULL_POINTER_EXCEPTION, None));
    };
    if other.is_empty() {
        return string_value(this);
    }
    string_value(env.new_string(&format!("{value}{other}")))
}

// public String toString();
fn native_string_to_string(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    string_value(env.this()?)
}

// public static String valueOf(Object obj);
fn native_string_value_of_object(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let object = env.reference(0)?;
    let string = env.to_java_string(object)?;
    string_value(env.new_string(&string))
}

// public static String valueOf(int i);
fn native_string_value_of_int(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let value = env.int(0)?;
    string_value(env.new_string(&value.to_string()))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(STRING_CLASS, INIT, "()V", native_string_init);
    registry.register(STRING_CLASS, "length", "()I", native_string_length);
    registry.register(STRING_CLASS, "isEmpty", "()Z", native_string_is_empty);
    registry.register(STRING_CLASS, "charAt", "(I)C", native_string_char_at);
    registry.register(STRING_CLASS, "equals", "(Ljava/lang/Object;)Z", native_string_equals);
    registry.register(STRING_CLASS, "hashCode", "()I", native_string_hash_code);
    registry.register(
        STRING_CLASS,
        "concat",
        "(Ljava/lang/String;)Ljava/lang/String;",
        native_string_concat,
    );
    registry.register(STRING_CLASS, "toString", "()Ljava/lang/String;", native_string_to_string);
    registry.register(
        STRING_CLASS,
        "valueOf",
        "(Ljava/lang/Object;)Ljava/lang/String;",
        native_string_value_of_object,
    );
    registry.register(STRING_CLASS, "valueOf", "(I)Ljava/lang/String;", native_string_value_of_int);
}
