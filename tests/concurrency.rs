mod common;

use std::thread;

use javaclass::{FieldLookup, JavaValue, Runtime};

fn fields(runtime: &Runtime) -> FieldLookup<'_> {
    runtime
        .load("demo/Calculator")
        .unwrap()
        .get_invoker()
        .get_static()
        .get_fields()
}

#[test]
fn test_clinit_runs_once_across_threads() {
    let runtime = Runtime::builder()
        .class("demo/Calculator", common::calculator())
        .build()
        .unwrap();

    let results: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8i32)
            .map(|i| {
                let runtime = &runtime;
                scope.spawn(move || {
                    let calculator = runtime.load("demo/Calculator").unwrap();
                    let sum = calculator
                        .get_invoker()
                        .get_static()
                        .get_methods()
                        .call("add", &[i.into(), 1.into()])
                        .unwrap();
                    let counter = fields(runtime).get("counter").unwrap();
                    (i, sum, counter)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for (i, sum, counter) in results {
        assert_eq!(sum, JavaValue::Int(i + 1));
        assert_eq!(counter, JavaValue::Int(100));
    }
}

#[test]
fn test_runtimes_are_independent() {
    let first = Runtime::builder()
        .class("demo/Calculator", common::calculator())
        .build()
        .unwrap();
    let second = Runtime::builder()
        .class("demo/Calculator", common::calculator())
        .build()
        .unwrap();

    fields(&first).set("counter", 1).unwrap();
    assert_eq!(fields(&first).get("counter").unwrap(), JavaValue::Int(1));
    assert_eq!(fields(&second).get("counter").unwrap(), JavaValue::Int(100));
}
