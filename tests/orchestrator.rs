//! End-to-end scenarios driving the orchestrator through real shell
//! children: dependency-ordered startup, reverse shutdown, failure
//! propagation, platform selection, skip guards, cycles, and timers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use semver::Version;
use tokio::time::Instant;

use edgevisor::{
    Config, EventKind, MemoryRecipeSource, Orchestrator, Overall, Recipe, State, StatusSink,
    Transition, Tree,
};

/// Status sink that records every transition for later assertions.
#[derive(Default)]
struct Recorder {
    transitions: Mutex<Vec<Transition>>,
}

#[async_trait]
impl StatusSink for Recorder {
    async fn on_transition(&self, t: &Transition) {
        self.transitions.lock().unwrap().push(t.clone());
    }

    fn name(&self) -> &'static str {
        "recorder"
    }
}

impl Recorder {
    fn first_seq(&self, component: &str, to: State) -> Option<u64> {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.component == component && t.to == to)
            .map(|t| t.seq)
    }

    fn count(&self, component: &str, from: State, to: State) -> usize {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .filter(|t| t.component == component && t.from == from && t.to == to)
            .count()
    }
}

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.grace = Duration::from_secs(3);
    cfg.stuck_after = Duration::from_secs(60);
    cfg
}

fn service(name: &str, run: &str) -> Recipe {
    Recipe::new(name, Version::new(1, 0, 0))
        .with_lifecycle(Tree::branch([("run", Tree::leaf(run))]))
}

async fn wait_for(orch: &Orchestrator, name: &str, state: State, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    loop {
        if orch.state_of(name) == Some(state) {
            return;
        }
        if Instant::now() > deadline {
            panic!(
                "{name} never reached {state}; currently {:?}",
                orch.state_of(name)
            );
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn wait_overall(orch: &Orchestrator, overall: Overall, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while orch.overall() != overall {
        if Instant::now() > deadline {
            panic!("overall never became {overall}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn startup_is_dependency_ordered_and_shutdown_reverses() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service("sleeperB", "sleep 30"));
    recipes.add(service("sleeperA", "sleep 30").with_dependencies("sleeperB"));
    recipes.add(service("main", "sleep 30").with_dependencies("sleeperA, sleeperB"));

    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .sink(recorder.clone())
        .build();

    orch.start(["main"]).await.unwrap();
    wait_for(&orch, "main", State::Running, Duration::from_secs(10)).await;
    wait_overall(&orch, Overall::Healthy, Duration::from_secs(2)).await;

    let b_up = recorder.first_seq("sleeperB", State::Running).unwrap();
    let a_up = recorder.first_seq("sleeperA", State::Running).unwrap();
    let main_up = recorder.first_seq("main", State::Running).unwrap();
    assert!(b_up < a_up, "sleeperA ran before its dependency");
    assert!(a_up < main_up, "main ran before its dependency");

    orch.stop().await.unwrap();

    let main_down = recorder.first_seq("main", State::Stopping).unwrap();
    let a_down = recorder.first_seq("sleeperA", State::Stopping).unwrap();
    let b_down = recorder.first_seq("sleeperB", State::Stopping).unwrap();
    assert!(main_down < a_down, "sleeperA stopped before main");
    assert!(a_down < b_down, "sleeperB stopped before sleeperA");

    assert_eq!(orch.state_of("main"), Some(State::New));
    assert_eq!(orch.state_of("sleeperB"), Some(State::New));
}

#[tokio::test]
async fn missing_dependency_breaks_and_poisons() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service("x", "sleep 30").with_dependencies("y"));
    recipes.add(service("main", "sleep 30").with_dependencies("x"));

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();

    orch.start(["main"]).await.unwrap();
    wait_for(&orch, "y", State::Broken, Duration::from_secs(5)).await;
    wait_for(&orch, "x", State::Errored, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let main_state = orch.state_of("main").unwrap();
    assert!(
        matches!(
            main_state,
            State::New | State::Installing | State::AwaitingStartup
        ),
        "main advanced past AwaitingStartup with a poisoned dependency: {main_state}"
    );
    assert_eq!(orch.overall(), Overall::Unhealthy);

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn failing_install_retries_once_then_breaks() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("attempts");
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("flaky", Version::new(1, 0, 0))
            .with_lifecycle(Tree::branch([(
                "install",
                Tree::leaf(format!("echo x >> {} && exit 1", marker.display()).as_str()),
            )])),
    );

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();
    orch.start(["flaky"]).await.unwrap();
    wait_for(&orch, "flaky", State::Broken, Duration::from_secs(10)).await;

    let attempts = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(attempts.lines().count(), 2, "expected one retry");

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn platform_selection_runs_the_most_specific_block() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("variant");
    let run_variant =
        |v: &str| Tree::branch([("run", Tree::leaf(format!("echo {v} >> {} && sleep 30", marker.display()).as_str()))]);

    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("svc", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("posix", run_variant("A")),
            ("ubuntu", run_variant("B")),
            ("all", run_variant("C")),
        ])),
    );

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .tags(edgevisor::TagRanks::from_ranks([
            ("all", 0),
            ("any", 0),
            ("posix", 3),
            ("ubuntu", 20),
        ]))
        .build();

    orch.start(["svc"]).await.unwrap();
    wait_for(&orch, "svc", State::Running, Duration::from_secs(10)).await;

    let chosen = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(chosen.trim(), "B");

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn skipif_onpath_skips_the_step() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("skippy", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([(
            "install",
            Tree::branch([
                ("script", Tree::leaf("exit 1")),
                ("skipif", Tree::leaf("onpath sh")),
            ]),
        )])),
    );

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();
    orch.start(["skippy"]).await.unwrap();

    // The failing install script never runs; with no run step the
    // component parks in Finished.
    wait_for(&orch, "skippy", State::Finished, Duration::from_secs(10)).await;
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn dependency_cycle_errors_the_last_touched_node() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service("a", "sleep 30").with_dependencies("b"));
    recipes.add(service("b", "sleep 30").with_dependencies("a"));

    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .sink(recorder.clone())
        .build();

    orch.start(["a"]).await.unwrap();
    wait_for(&orch, "b", State::Errored, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(orch.state_of("a"), Some(State::New));

    let reason = recorder
        .transitions
        .lock()
        .unwrap()
        .iter()
        .find(|t| t.component == "b" && t.to == State::Errored)
        .and_then(|t| t.reason.clone());
    assert_eq!(reason.as_deref(), Some("dependency cycle"));

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn failed_run_is_errored_never_finished() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service("crasher", "exit 5"));

    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .sink(recorder.clone())
        .build();

    orch.start(["crasher"]).await.unwrap();
    wait_for(&orch, "crasher", State::Errored, Duration::from_secs(10)).await;

    assert_eq!(
        recorder.first_seq("crasher", State::Finished),
        None,
        "a failing run must not look Finished"
    );

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn errored_component_recovers_through_reinstall() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("second-chance");
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service(
        "phoenix",
        // Fails on the first run, stays up afterwards.
        &format!(
            "if [ -f {m} ]; then sleep 30; else touch {m} && exit 1; fi",
            m = marker.display()
        ),
    ));

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();
    orch.start(["phoenix"]).await.unwrap();
    wait_for(&orch, "phoenix", State::Errored, Duration::from_secs(10)).await;

    orch.reinstall("phoenix").await;
    wait_for(&orch, "phoenix", State::Running, Duration::from_secs(10)).await;

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn timer_reexecutes_run_and_coalesces() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("beacon", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("run", Tree::leaf("true")),
            (
                "timer",
                Tree::branch([("period", Tree::leaf("200ms")), ("fuzz", Tree::leaf(0.0))]),
            ),
        ])),
    );
    // A slow one-shot whose run outlives the period: fires must coalesce.
    recipes.add(
        Recipe::new("slowpoke", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("run", Tree::leaf("sleep 1")),
            (
                "timer",
                Tree::branch([("period", Tree::leaf("200ms")), ("fuzz", Tree::leaf(0.0))]),
            ),
        ])),
    );

    let recorder = Arc::new(Recorder::default());
    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .sink(recorder.clone())
        .build();

    orch.start(["beacon", "slowpoke"]).await.unwrap();
    wait_for(&orch, "beacon", State::Finished, Duration::from_secs(5)).await;

    tokio::time::sleep(Duration::from_millis(1100)).await;

    // period=200ms over ~1.1s: at most ceil(t/p)+1 = 7 re-executions.
    let beacon_fires = recorder.count("beacon", State::Finished, State::Running);
    assert!(
        (1..=7).contains(&beacon_fires),
        "beacon fired {beacon_fires} times"
    );

    // slowpoke's 1s run swallows intermediate fires.
    let slow_fires = recorder.count("slowpoke", State::Finished, State::Running);
    assert!(slow_fires <= 2, "slowpoke fired {slow_fires} times");

    orch.stop().await.unwrap();

    // Timers are disarmed on stop: no further fires.
    let after_stop = recorder.count("beacon", State::Finished, State::Running);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        recorder.count("beacon", State::Finished, State::Running),
        after_stop
    );
}

#[tokio::test]
async fn stuck_startup_names_the_blocking_edge() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(
        Recipe::new("y", Version::new(1, 0, 0)).with_lifecycle(Tree::branch([
            ("install", Tree::leaf("sleep 30")),
            ("run", Tree::leaf("sleep 30")),
        ])),
    );
    recipes.add(service("x", "sleep 30").with_dependencies("y"));

    let mut cfg = test_config();
    cfg.stuck_after = Duration::from_millis(300);
    let orch = Orchestrator::builder(cfg).recipes(recipes).build();
    let mut events = orch.bus().subscribe();

    orch.start(["x"]).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let reason = loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let ev = tokio::time::timeout(remaining, events.recv())
            .await
            .expect("no stuck diagnostic")
            .expect("bus closed");
        if ev.kind == EventKind::Stuck {
            break ev.reason.unwrap_or_default();
        }
    };
    assert!(
        reason.contains("x waiting for y"),
        "unexpected stuck reason: {reason}"
    );

    // y's install step is still sleeping; teardown may overrun the grace.
    let _ = orch.stop().await;
}

#[tokio::test]
async fn locate_is_idempotent_through_the_public_api() {
    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(service("solo", "sleep 30"));
    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();

    let first = orch.registry().locate("solo").await;
    let second = orch.registry().locate("solo").await;
    assert!(Arc::ptr_eq(&first, &second));

    orch.stop().await.unwrap();
}

#[tokio::test]
async fn code_backed_handler_drives_the_lifecycle() {
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio_util::sync::CancellationToken;

    struct Svc {
        started: Arc<AtomicBool>,
        shut_down: Arc<AtomicBool>,
    }

    #[async_trait]
    impl edgevisor::Handler for Svc {
        async fn startup(&self) -> Result<(), edgevisor::StepError> {
            self.started.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn run(&self, ctx: CancellationToken) -> Result<(), edgevisor::StepError> {
            ctx.cancelled().await;
            Ok(())
        }

        async fn shutdown(&self) -> Result<(), edgevisor::StepError> {
            self.shut_down.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    let recipes = Arc::new(MemoryRecipeSource::new());
    recipes.add(Recipe::new("svc", Version::new(1, 0, 0)).with_class("svc-handler"));

    let orch = Orchestrator::builder(test_config())
        .recipes(recipes)
        .build();

    let started = Arc::new(AtomicBool::new(false));
    let shut_down = Arc::new(AtomicBool::new(false));
    let (s, d) = (started.clone(), shut_down.clone());
    orch.handlers().register("svc-handler", true, move |_cfg| {
        Ok(Arc::new(Svc {
            started: s.clone(),
            shut_down: d.clone(),
        }))
    });

    orch.start(["svc"]).await.unwrap();
    wait_for(&orch, "svc", State::Running, Duration::from_secs(10)).await;
    assert!(started.load(Ordering::SeqCst));

    orch.stop().await.unwrap();
    assert!(shut_down.load(Ordering::SeqCst));
}
