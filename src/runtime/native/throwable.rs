use crate::{
    consts::{DETAIL_MESSAGE, INIT, THROWABLE_CLASS},
    error::{Error, Result},
    runtime::{NativeEnv, NativeResult, ObjectRef, Value, interpreter::java_name, native::NativeRegistry},
};

fn detail_message_index(this: &ObjectRef) -> Result<usize> {
    let class = this.class()?;
    class
        .instance_field(DETAIL_MESSAGE)
        .map(|field| field.index)
        .ok_or_else(|| Error::NoSuchField {
            class_name: this.class_name().to_string(),
            field: DETAIL_MESSAGE.to_string(),
        })
}

// public Throwable()
fn native_throwable_init(_env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    Ok(None)
}

// public Throwable(String message)
fn native_throwable_init_message(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    let message = env.reference(1)?;
    this.put_field(detail_message_index(&this)?, Value::Reference(message))?;
    Ok(None)
}

// public String getMessage();
fn native_throwable_get_message(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    Ok(Some(this.get_field(detail_message_index(&this)?)?))
}

// public String toString();
fn native_throwable_to_string(env: &mut NativeEnv<'_, '_>) -> NativeResult<Option<Value>> {
    let this = env.this()?;
    let name = java_name(this.class_name());
    let string = match this.get_field(detail_message_index(&this)?)? {
        Value::Reference(Some(message)) => {
            format!("{name}: {}", message.as_str().unwrap_or_default())
        }
        _ => name,
    };
    Ok(Some(Value::Reference(Some(env.new_string(&string)))))
}

pub(super) fn register_natives(registry: &NativeRegistry) {
    registry.register(THROWABLE_CLASS, INIT, "()V", native_throwable_init);
    registry.register(THROWABLE_CLASS, INIT, "(Ljava/lang/String;)V", native_throwable_init_message);
    registry.register(
        THROWABLE_CLASS,
        "getMessage",
        "()Ljava/lang/String;",
        native_throwable_get_message,
    );
    registry.register(THROWABLE_CLASS, "toString", "()Ljava/lang/String;", native_throwable_to_string);
}
