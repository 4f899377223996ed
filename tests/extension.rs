
use brisk::{
    Error, ExtensionRegistry, Invocation, Invoker, Kernel, ReferenceConfig, Result, Selector,
    ServiceConfig, Url,
};
use shared::{greeter, init_logger, name, text};
use std::{
    fs,
    path::PathBuf,
    sync::{atomic::AtomicUsize, Arc},
};

/// Always picks the first candidate.
struct First;

impl Selector for First {
    fn select(&self, invokers: &[Arc<dyn Invoker>], inv: &Invocation) -> Result<Arc<dyn Invoker>> {
        invokers.first().cloned().ok_or_else(|| Error::NoAvailableInvoker {
            service: inv.service().to_owned(),
        })
    }
}

fn manifest_dir(test: &str, selectors: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("brisk-{}-{}", test, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("brisk.Selector"), selectors).unwrap();
    dir
}

fn kernel(dir: PathBuf) -> Kernel {
    init_logger();

    let extensions = ExtensionRegistry::builder()
        .location_dir(dir)
        .with_builtins()
        .implementation::<dyn Selector, _>("demo::First", |_| Ok(Arc::new(First)))
        .build();

    Kernel::new(extensions).unwrap()
}

async fn replies(k: &Kernel, reference: ReferenceConfig) -> Vec<String> {
    let counter = || Arc::new(AtomicUsize::new(0));
    let remote = |port| {
        ServiceConfig::new("demo.Greeter")
            .protocol("remote")
            .address("loop", port)
    };

    let _x = k.export(&remote(1), greeter("x", counter())).unwrap();
    let _y = k.export(&remote(2), greeter("y", counter())).unwrap();

    let proxy = (k.refer(
        &reference
            .direct(Url::new("remote", "loop", 1, ""))
            .direct(Url::new("remote", "loop", 2, "")),
    ))
    .unwrap();

    let mut out = Vec::new();
    for _ in 0..4 {
        out.push(text(proxy.call("greet", name("jo")).await.unwrap()));
    }
    out
}

#[tokio::test]
async fn directory_manifests_add_extensions() {
    let k = kernel(manifest_dir("add", "# custom\nfirst=demo::First\n"));

    let supported = (k.extensions().loader::<dyn Selector>())
        .unwrap()
        .supported_extensions()
        .unwrap();
    assert_eq!(vec!["first", "roundrobin", "random"], supported);

    let out = replies(&k, ReferenceConfig::new("demo.Greeter").selector("first")).await;
    assert!(out.iter().all(|r| r == "x: hello, jo"), "{:?}", out);
}

#[tokio::test]
async fn earlier_locations_win_name_conflicts() {
    let k = kernel(manifest_dir("override", "roundrobin=demo::First\n"));

    let out = replies(&k, ReferenceConfig::new("demo.Greeter")).await;
    assert!(out.iter().all(|r| r == "x: hello, jo"), "{:?}", out);
}

#[tokio::test]
async fn unknown_selectors_fail_at_refer() {
    let k = kernel(manifest_dir("unknown", ""));
    let _e = k
        .export(&ServiceConfig::new("demo.Greeter"), greeter("x", Arc::new(AtomicUsize::new(0))))
        .unwrap();

    let r = k.refer(&ReferenceConfig::new("demo.Greeter").selector("psychic"));
    assert!(matches!(r, Err(Error::Configuration(_))));
}
