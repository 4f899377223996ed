
use brisk::{
    Directory, ExtensionRegistry, Invocation, Kernel, Protocol, ReferenceConfig, Registry,
    RegistryDirectory, ServiceConfig, ServiceInvoker, Url,
};
use shared::{greeter, init_logger, name, text, MemoryRegistry};
use std::sync::{
    atomic::{AtomicUsize, Ordering::SeqCst},
    Arc,
};

fn at(host: &str, port: u16) -> Url {
    Url::new("local", host, port, "demo.Greeter")
}

#[test]
fn notifications_swap_snapshots_and_reuse_invokers() {
    init_logger();

    let extensions = ExtensionRegistry::with_builtins();
    let protocol = extensions.extension::<dyn Protocol>("local").unwrap();
    let calls = Arc::new(AtomicUsize::new(0));

    let _e = protocol
        .export(Arc::new(ServiceInvoker::new(at("a", 1), greeter("a", calls))))
        .unwrap();

    let registry = MemoryRegistry::default();
    let dir = Arc::new(RegistryDirectory::new("demo.Greeter", at("c", 0), protocol));

    registry.register(&at("a", 1)).unwrap();
    dir.subscribe(&registry).unwrap();
    assert_eq!("demo.Greeter", dir.service_key());

    let first = dir.snapshot();
    assert_eq!(1, first.len());

    registry.register(&at("b", 2)).unwrap();
    let second = dir.snapshot();
    assert_eq!(2, second.len());
    assert!(Arc::ptr_eq(&first[0], &second[0]));

    registry.unregister(&at("a", 1)).unwrap();
    let third = dir.snapshot();
    assert_eq!(1, third.len());
    assert!(Arc::ptr_eq(&second[1], &third[0]));
    assert!(!first[0].is_available());

    dir.destroy();
    assert!(!third[0].is_available());
    assert!(dir.list(&Invocation::builder("demo.Greeter", "greet").build()).is_err());

    registry.register(&at("d", 4)).unwrap();
    assert!(dir.snapshot().is_empty());
}

#[test]
fn unreferable_providers_are_skipped() {
    init_logger();

    let extensions = ExtensionRegistry::with_builtins();
    let protocol = extensions.extension::<dyn Protocol>("local").unwrap();

    let registry = MemoryRegistry::default();
    let dir = Arc::new(RegistryDirectory::new("demo.Greeter", at("c", 0), protocol));

    registry.register(&at("a", 1).with_protocol("carrier-pigeon")).unwrap();
    dir.subscribe(&registry).unwrap();

    assert!(dir.snapshot().is_empty());
}

#[tokio::test]
async fn kernel_discovers_providers_through_the_registry() {
    init_logger();

    let registry = Arc::new(MemoryRegistry::default());
    let k = Kernel::new(ExtensionRegistry::with_builtins())
        .unwrap()
        .with_registry(Arc::clone(&registry) as Arc<dyn Registry>);

    let (xs, ys) = (Arc::new(AtomicUsize::new(0)), Arc::new(AtomicUsize::new(0)));
    let remote = |port| {
        ServiceConfig::new("demo.Greeter")
            .protocol("remote")
            .address("loop", port)
    };

    let x = k.export(&remote(1), greeter("x", Arc::clone(&xs))).unwrap();
    assert_eq!(1, registry.providers("demo.Greeter").len());

    let proxy = k
        .refer(&ReferenceConfig::new("demo.Greeter").cluster("failfast"))
        .unwrap();

    assert_eq!("x: hello, al", text(proxy.call("greet", name("al")).await.unwrap()));

    let _y = k.export(&remote(2), greeter("y", Arc::clone(&ys))).unwrap();
    assert_eq!(2, registry.providers("demo.Greeter").len());

    for _ in 0..4 {
        proxy.call("greet", name("al")).await.unwrap();
    }
    assert_eq!(3, xs.load(SeqCst));
    assert_eq!(2, ys.load(SeqCst));

    x.unexport();
    assert_eq!(1, registry.providers("demo.Greeter").len());

    for _ in 0..4 {
        assert_eq!("y: hello, al", text(proxy.call("greet", name("al")).await.unwrap()));
    }
    assert_eq!(3, xs.load(SeqCst));

    k.destroy();
    assert!(registry.providers("demo.Greeter").is_empty());
}
