mod common;

use javaclass::{Error, JavaValue, OutputBuffer, Runtime};

fn runtime() -> Runtime {
    Runtime::builder()
        .class("demo/Calculator", common::calculator())
        .class("demo/Shape", common::shape())
        .class("demo/Square", common::square())
        .class("demo/Shapes", common::shapes())
        .class("HelloWorld", common::hello_world())
        .class("Lambda", common::lambda())
        .build()
        .unwrap()
}

#[test]
fn test_hello_world() {
    let stdout = OutputBuffer::new();
    let runtime = Runtime::builder()
        .class("HelloWorld", common::hello_world())
        .stdout(stdout.sink())
        .build()
        .unwrap();
    let main = runtime.load("HelloWorld").unwrap().get_invoker().get_static().get_methods();

    let result = main.call("main", &[JavaValue::Array(vec![])]).unwrap();
    assert_eq!(result, JavaValue::Void);
    assert_eq!(stdout.contents(), "Hello World!\n0\n");

    main.call("main", &[vec!["from rust"].into()]).unwrap();
    assert_eq!(stdout.contents(), "Hello World!\n0\nHello World!\n1\nfrom rust\n");
}

#[test]
fn test_hello_world_with_one_argument() {
    let stdout = OutputBuffer::new();
    let runtime = Runtime::builder()
        .class("HelloWorld", common::hello_world())
        .stdout(stdout.sink())
        .build()
        .unwrap();
    let main = runtime.load("HelloWorld").unwrap().get_invoker().get_static().get_methods();

    assert_eq!(main.signatures("main"), vec!["([Ljava/lang/String;)V"]);
    let result = main.call("main", &[vec!["Hello World!"].into()]).unwrap();
    assert_eq!(result, JavaValue::Void);
    assert_eq!(stdout.contents(), "Hello World!\n1\nHello World!\n");
}

#[test]
fn test_static_overloads() {
    let runtime = runtime();
    let methods = runtime.load("demo.Calculator").unwrap().get_invoker().get_static().get_methods();

    assert_eq!(methods.signatures("add"), vec!["(II)I", "(JJ)J"]);
    assert_eq!(methods.call("add", &[1.into(), 2.into()]).unwrap(), JavaValue::Int(3));
    assert_eq!(
        methods.call("add", &[1i64.into(), 2.into()]).unwrap(),
        JavaValue::Long(3)
    );
    assert_eq!(
        methods
            .call_with_descriptor("add", "(JJ)J", &[1.into(), 2.into()])
            .unwrap(),
        JavaValue::Long(3)
    );
    assert_eq!(methods.call("halve", &[3.into()]).unwrap(), JavaValue::Double(1.5));

    assert!(matches!(
        methods.call("add", &[1.into()]),
        Err(Error::IllegalArgument(_))
    ));
    assert!(matches!(
        methods.call("add", &[1.5f64.into(), 2.into()]),
        Err(Error::IllegalArgument(_))
    ));
    assert!(matches!(
        methods.call("subtract", &[]),
        Err(Error::NoSuchMethod { .. })
    ));
}

#[test]
fn test_strings_and_arrays() {
    let runtime = runtime();
    let methods = runtime.load("demo/Calculator").unwrap().get_invoker().get_static().get_methods();

    assert_eq!(
        methods.call("greet", &["World".into()]).unwrap(),
        JavaValue::String("Hello, World".into())
    );
    assert_eq!(methods.call("sum", &[vec![1, 2, 3, 4].into()]).unwrap(), JavaValue::Int(10));
    assert_eq!(methods.call("sum", &[JavaValue::Array(vec![])]).unwrap(), JavaValue::Int(0));

    match methods.call("greet", &[JavaValue::Null]) {
        Err(Error::Thrown(thrown)) => assert_eq!(thrown.class_name, "java/lang/NullPointerException"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_arrays_passed_as_object() {
    let runtime = runtime();
    let methods = runtime.load("demo/Calculator").unwrap().get_invoker().get_static().get_methods();

    assert!(matches!(
        methods.call("id", &[JavaValue::Array(vec![JavaValue::Int(1)])]),
        Err(Error::IllegalArgument(_))
    ));
    assert_eq!(
        methods.call("id", &[vec!["a", "b"].into()]).unwrap(),
        JavaValue::Array(vec![JavaValue::String("a".into()), JavaValue::String("b".into())])
    );
    assert_eq!(methods.call("id", &[JavaValue::Null]).unwrap(), JavaValue::Null);
}

#[test]
fn test_static_fields_run_clinit_once() {
    let runtime = runtime();
    let calculator = runtime.load("demo/Calculator").unwrap();
    let fields = calculator.get_invoker().get_static().get_fields();

    assert_eq!(fields.get("counter").unwrap(), JavaValue::Int(100));
    fields.set("counter", 5).unwrap();
    assert_eq!(fields.get("counter").unwrap(), JavaValue::Int(5));
    calculator
        .get_invoker()
        .get_static()
        .get_methods()
        .call("add", &[1.into(), 1.into()])
        .unwrap();
    assert_eq!(fields.get("counter").unwrap(), JavaValue::Int(5));

    assert!(matches!(fields.set("counter", "five"), Err(Error::IllegalArgument(_))));
    assert!(matches!(fields.get("missing"), Err(Error::NoSuchField { .. })));
}

#[test]
fn test_instances() {
    let runtime = runtime();
    let invoker = runtime.load("demo/Calculator").unwrap().get_invoker();
    let object = invoker.construct(&[10.into()]).unwrap();
    let instance = invoker.get_instance(object.clone()).unwrap();

    assert_eq!(instance.get_methods().call("add", &[5.into()]).unwrap(), JavaValue::Int(15));
    assert_eq!(instance.get_methods().call("add", &[5.into()]).unwrap(), JavaValue::Int(20));
    assert_eq!(instance.get_fields().get("total").unwrap(), JavaValue::Int(20));
    instance.get_fields().set("total", 1).unwrap();
    assert_eq!(instance.get_methods().call("add", &[1.into()]).unwrap(), JavaValue::Int(2));

    assert!(matches!(
        invoker.get_instance(runtime.new_string("not a calculator")),
        Err(Error::IllegalArgument(_))
    ));
    assert!(matches!(invoker.construct(&[]), Err(Error::IllegalArgument(_))));
}

#[test]
fn test_interface_dispatch() {
    let runtime = runtime();
    let square = runtime.load("demo/Square").unwrap().get_invoker();
    let three = square.construct(&[3.into()]).unwrap();
    let four = square.construct(&[4.into()]).unwrap();

    let shape = runtime.load("demo/Shape").unwrap().get_invoker();
    assert!(matches!(shape.construct(&[]), Err(Error::IllegalArgument(_))));
    let area = shape.get_instance(three.clone()).unwrap().get_methods().call("area", &[]).unwrap();
    assert_eq!(area, JavaValue::Int(9));

    let total = runtime
        .load("demo/Shapes")
        .unwrap()
        .get_invoker()
        .get_static()
        .get_methods()
        .call("total", &[three.into(), four.into()])
        .unwrap();
    assert_eq!(total, JavaValue::Int(25));
}

#[test]
fn test_java_exceptions_surface_as_thrown() {
    let runtime = runtime();
    let methods = runtime.load("demo/Calculator").unwrap().get_invoker().get_static().get_methods();
    match methods.call("fail", &[]) {
        Err(Error::Thrown(thrown)) => {
            assert_eq!(thrown.class_name, "java/lang/IllegalArgumentException");
            assert_eq!(thrown.message.as_deref(), Some("bad input"));
            assert_eq!(thrown.to_string(), "uncaught java/lang/IllegalArgumentException: bad input");
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_invokedynamic_is_rejected() {
    let runtime = runtime();
    let methods = runtime.load("Lambda").unwrap().get_invoker().get_static().get_methods();
    match methods.call("run", &[]) {
        Err(Error::VirtualMachine(message)) => assert!(message.contains("invokedynamic"), "{message}"),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_loaded_classes_are_shared() {
    let runtime = runtime();
    let first = runtime.load("demo/Calculator").unwrap();
    let second = runtime.load("demo.Calculator").unwrap();
    assert!(first.ptr_eq(&second));
    assert_eq!(first.name(), "demo/Calculator");
    assert!(matches!(runtime.load("demo/Missing"), Err(Error::ClassLoad { .. })));
}
