//! Loads compiled JVM class files, links them and runs their bytecode.
//!
//! [`class`] reads, writes and assembles class files. [`runtime`] loads and links
//! classes into a [`Runtime`] and interprets them. [`invoke`] is the entry point
//! for calling into loaded classes from Rust.

pub mod class;
pub mod consts;
pub mod descriptor;
pub mod error;
pub mod instructions;
pub mod invoke;
pub mod runtime;

pub use error::{ClassLoadReason, Error, Result, ThrownException};
pub use invoke::{FieldLookup, InstanceContext, Invoker, JavaClass, JavaValue, MethodLookup, StaticContext};
pub use runtime::{ObjectRef, OutputBuffer, Runtime, RuntimeBuilder, RuntimeOptions};
