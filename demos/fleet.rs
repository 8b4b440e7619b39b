use std::sync::Arc;
use std::time::Duration;

use semver::Version;

use edgevisor::{Config, LogSink, MemoryRecipeSource, Orchestrator, Recipe, Tree};

/// A small fleet: a storage service, a camera that needs it, a periodic
/// telemetry beacon, and a `main` root tying everything together.
///
/// Run with `cargo run --example fleet`, stop with Ctrl-C and watch the
/// teardown happen in reverse dependency order.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("storage", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("startup", Tree::leaf("echo preparing volumes")),
            ("run", Tree::leaf("while true; do sleep 5; done")),
            ("shutdown", Tree::leaf("echo flushing volumes")),
        ])),
    );
    recipes.add(
        Recipe::new("camera", Version::new(1, 0, 0))
            .with_dependencies("storage")
            .with_env("CAMERA_MODE", "demo")
            .with_lifecycle(Tree::branch([(
                "run",
                Tree::leaf("while true; do echo frame captured mode=$CAMERA_MODE; sleep 3; done"),
            )])),
    );
    recipes.add(
        Recipe::new("beacon", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("run", Tree::leaf("echo telemetry tick")),
            (
                "timer",
                Tree::branch([
                    ("period", Tree::leaf("5s")),
                    ("fuzz", Tree::leaf(0.2)),
                ]),
            ),
        ])),
    );
    recipes.add(
        Recipe::new("main", Version::new(1, 0, 0)).with_dependencies("camera, beacon:finished"),
    );

    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(5);

    let orchestrator = Orchestrator::builder(cfg)
        .recipes(recipes)
        .sink(Arc::new(LogSink))
        .build();

    let result = orchestrator.run(["main"]).await;
    if let Err(e) = &result {
        eprintln!("shutdown incomplete: {e}");
        std::process::exit(e.exit_code());
    }
    Ok(())
}
