use crate::{
    consts::{INIT, OBJECT_CLASS},
    runtime::{NativeEnv, NativeResult, Value, interpreter::java_name, native::NativeRegistry},
};

// public Object()
fn native_object_init(_env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    Ok(None)
}

// public native int hashCode();
pub(super) fn native_object_hash_code(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    Ok(Some(Value::Int(env.this()?.identity_hash())))
}

// public boolean equals(Object obj);
fn native_object_equals(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    let same = env.reference(1)?.is_some_and(|other| other.ptr_eq(&this));
    Ok(Some(Value::Int(same as i32)))
}

// public String toString();
fn native_object_to_string(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    let hash = match env.invoke_virtual(this.clone(), "hashCode", "()I", Vec::new())? {
        Some(Value::Int(hash)) => hash,
        _ => this.identity_hash(),
    };
    let string = format!("{}@{:x}", java_name(this.class_name()), hash as u32);
    Ok(Some(Value::Reference(Some(env.new_string(&string)))))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(OBJECT_CLASS, INIT, "()V", native_object_init);
    registry.register(OBJECT_CLASS, "hashCode", "()I", native_object_hash_code);
    registry.register(OBJECT_CLASS, "equals", "(Ljava/lang/Object;)Z", native_object_equals);
    registry.register(OBJECT_CLASS, "toString", "()Ljava/lang/String;", native_object_to_string);
}
