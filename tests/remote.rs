
use brisk::{
    handler_fn, url::keys, Code, Error, ExtensionRegistry, Invocation, Kernel, ReferenceConfig,
    RpcResult, ServiceConfig, Status, Url, Value,
};
use shared::{broken, greeter, init_logger, name, text};
use std::sync::{
    atomic::{AtomicUsize, Ordering::SeqCst},
    Arc,
};
use tokio::time::{sleep, Duration};

fn kernel() -> Kernel {
    init_logger();
    Kernel::new(ExtensionRegistry::with_builtins()).unwrap()
}

fn provider(interface: &str, port: u16) -> ServiceConfig {
    ServiceConfig::new(interface)
        .protocol("remote")
        .address("loop", port)
}

fn consumer(interface: &str, port: u16) -> ReferenceConfig {
    ReferenceConfig::new(interface)
        .cluster("failfast")
        .direct(Url::new("remote", "loop", port, ""))
}

fn expect_status(r: brisk::Result<Option<Value>>, code: Code) {
    match r {
        Err(Error::Remote(s)) => assert_eq!(code, s.code(), "{}", s.message()),
        r => panic!("expected {:?}, got {:?}", code, r.map(text)),
    }
}

#[tokio::test]
async fn values_and_attachments_cross_the_wire() {
    let k = kernel();

    let sum = handler_fn(|inv: Invocation| async move {
        let total: u64 = (inv.arguments().iter())
            .filter_map(|v| v.downcast_ref::<u64>())
            .sum();

        let trace = inv.attachment("trace").unwrap_or("none").to_owned();
        RpcResult::value(Value::new(total)).with_attachment("trace", trace)
    });

    let _e = k.export(&provider("demo.Sum", 1), sum).unwrap();
    let proxy = k.refer(&consumer("demo.Sum", 1)).unwrap();

    let inv = Invocation::builder("demo.Sum", "add")
        .arg(Value::new(40u64))
        .arg(Value::new(2u64))
        .attachment("trace", "t-1")
        .build();

    let result = proxy.invoker().invoke(&inv).await.unwrap();
    assert_eq!(Some(&42u64), result.get_value().and_then(|v| v.downcast_ref::<u64>()));
    assert_eq!(Some(&"t-1".to_owned()), result.attachments().get("trace"));
}

#[tokio::test]
async fn versions_and_groups_are_distinct_services() {
    let k = kernel();
    let calls = Arc::new(AtomicUsize::new(0));

    let _v1 = k
        .export(&provider("demo.Greeter", 1).version(1), greeter("v1", Arc::clone(&calls)))
        .unwrap();
    let _v2 = k
        .export(&provider("demo.Greeter", 1).version(2), greeter("v2", Arc::clone(&calls)))
        .unwrap();

    let v2 = k.refer(&consumer("demo.Greeter", 1).version(2)).unwrap();
    assert_eq!("v2: hello, ed", text(v2.call("greet", name("ed")).await.unwrap()));

    let blue = k.refer(&consumer("demo.Greeter", 1).group("blue")).unwrap();
    expect_status(blue.call("greet", name("ed")).await, Code::NotFound);
}

#[tokio::test]
async fn unreachable_and_unknown_codecs_fail_calls() {
    let k = kernel();

    let nobody = k.refer(&consumer("demo.Greeter", 9)).unwrap();
    expect_status(nobody.call("greet", name("fi")).await, Code::Unavailable);

    let _e = k
        .export(&provider("demo.Greeter", 1), greeter("x", Arc::new(AtomicUsize::new(0))))
        .unwrap();

    let garbled = k.refer(&consumer("demo.Greeter", 1).param(keys::SERIALIZATION, "morse"));
    assert!(matches!(garbled, Err(Error::Configuration(_))));

    let proxy = k.refer(&consumer("demo.Greeter", 1)).unwrap();
    expect_status(
        proxy.call("greet", vec![Value::new(1.5f64)]).await,
        Code::InvalidArgument,
    );
}

#[tokio::test]
async fn slow_providers_time_out() {
    let k = kernel();

    let slow = handler_fn(|_: Invocation| async {
        sleep(Duration::from_millis(500)).await;
        RpcResult::empty()
    });

    let _e = k.export(&provider("demo.Slow", 1), slow).unwrap();
    let proxy = k
        .refer(&consumer("demo.Slow", 1).timeout(Duration::from_millis(20)))
        .unwrap();

    expect_status(proxy.call("nap", vec![]).await, Code::DeadlineExceeded);
}

#[tokio::test]
async fn rate_limited_providers_shed_load() {
    let k = kernel();
    let calls = Arc::new(AtomicUsize::new(0));

    let cfg = provider("demo.Greeter", 1)
        .param(keys::FILTER, "ratelimit")
        .param(keys::RATELIMIT_PERMITS, 2)
        .param(keys::RATELIMIT_INTERVAL, 60_000);

    let _e = k.export(&cfg, greeter("x", Arc::clone(&calls))).unwrap();
    let proxy = k.refer(&consumer("demo.Greeter", 1)).unwrap();

    for _ in 0..2 {
        assert!(proxy.call("greet", name("gus")).await.is_ok());
    }

    expect_status(proxy.call("greet", name("gus")).await, Code::ResourceExhausted);
    assert_eq!(2, calls.load(SeqCst));
}

#[tokio::test]
async fn open_circuits_stop_calling_providers() {
    let k = kernel();
    let calls = Arc::new(AtomicUsize::new(0));

    let _e = k.export(&provider("demo.Broken", 1), broken(Arc::clone(&calls))).unwrap();
    let proxy = k
        .refer(
            &consumer("demo.Broken", 1)
                .param(keys::FILTER, "circuitbreaker")
                .param(keys::CIRCUIT_FAILURES, 2)
                .param(keys::CIRCUIT_OPEN, 60_000),
        )
        .unwrap();

    for _ in 0..4 {
        expect_status(proxy.call("poke", vec![]).await, Code::Unavailable);
    }

    assert_eq!(2, calls.load(SeqCst));
}

#[tokio::test]
async fn panicking_providers_report_internal_errors() {
    let k = kernel();

    let panicky = handler_fn(|_: Invocation| async {
        if true {
            panic!("boom");
        }
        Err::<Value, _>(Status::ok(""))
    });

    let _e = k.export(&provider("demo.Panic", 1), panicky).unwrap();
    let proxy = k.refer(&consumer("demo.Panic", 1)).unwrap();

    expect_status(proxy.call("go", vec![]).await, Code::Internal);
}
