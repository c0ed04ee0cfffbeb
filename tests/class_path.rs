mod common;

use std::{fs, io::Write, path::Path, process::Command};

use javaclass::{
    JavaValue, OutputBuffer, Runtime,
    class::ClassBuilder,
    consts::MethodAccessFlag,
    instructions as inst,
};
use zip::write::SimpleFileOptions;

fn write_class(root: &Path, name: &str, bytes: &[u8]) {
    let path = root.join(format!("{name}.class"));
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, bytes).unwrap();
}

/// `Boom.main` calls `demo/Calculator.fail()`.
fn boom() -> Vec<u8> {
    ClassBuilder::new("Boom", Some(common::OBJECT))
        .method(
            MethodAccessFlag::PUBLIC | MethodAccessFlag::STATIC,
            "main",
            "([Ljava/lang/String;)V",
            |c| {
                c.invokestatic("demo/Calculator", "fail", "()V").insn(inst::RETURN);
            },
        )
        .to_bytes()
        .unwrap()
}

#[test]
fn test_directory_class_path() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "demo/Calculator", &common::calculator());

    let runtime = Runtime::builder().class_path(dir.path()).build().unwrap();
    let result = runtime
        .load("demo.Calculator")
        .unwrap()
        .get_invoker()
        .get_static()
        .get_methods()
        .call("add", &[20.into(), 22.into()])
        .unwrap();
    assert_eq!(result, JavaValue::Int(42));
}

#[test]
fn test_jar_class_path() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("hello.jar");
    let mut writer = zip::ZipWriter::new(fs::File::create(&jar).unwrap());
    writer
        .start_file("HelloWorld.class", SimpleFileOptions::default())
        .unwrap();
    writer.write_all(&common::hello_world()).unwrap();
    writer.finish().unwrap();

    let stdout = OutputBuffer::new();
    let runtime = Runtime::builder()
        .archive(&jar)
        .unwrap()
        .stdout(stdout.sink())
        .build()
        .unwrap();
    runtime
        .load("HelloWorld")
        .unwrap()
        .get_invoker()
        .get_static()
        .get_methods()
        .call("main", &[JavaValue::Array(vec![])])
        .unwrap();
    assert_eq!(stdout.contents(), "Hello World!\n0\n");
}

#[test]
fn test_earlier_sources_win() {
    let first = tempfile::tempdir().unwrap();
    let second = tempfile::tempdir().unwrap();
    write_class(first.path(), "demo/Calculator", &common::calculator());
    write_class(second.path(), "demo/Calculator", b"not a class file");

    let runtime = Runtime::builder()
        .class_path(first.path())
        .class_path(second.path())
        .build()
        .unwrap();
    assert!(runtime.load("demo/Calculator").is_ok());
}

#[test]
fn test_cli_runs_main() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "HelloWorld", &common::hello_world());

    let output = Command::new(env!("CARGO_BIN_EXE_java"))
        .arg("-c")
        .arg(dir.path())
        .args(["HelloWorld", "first", "second"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout), "Hello World!\n2\nfirst\n");
}

#[test]
fn test_cli_reports_uncaught_exception() {
    let dir = tempfile::tempdir().unwrap();
    write_class(dir.path(), "Boom", &boom());
    write_class(dir.path(), "demo/Calculator", &common::calculator());

    let output = Command::new(env!("CARGO_BIN_EXE_java"))
        .arg("--class-path")
        .arg(dir.path())
        .arg("Boom")
        .output()
        .unwrap();
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(
        stderr.contains("Exception in thread \"main\" java.lang.IllegalArgumentException: bad input"),
        "{stderr}"
    );
}

#[test]
fn test_cli_reports_missing_class() {
    let dir = tempfile::tempdir().unwrap();
    let output = Command::new(env!("CARGO_BIN_EXE_java"))
        .arg("--cp")
        .arg(dir.path())
        .arg("Nowhere")
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Nowhere"));
}
