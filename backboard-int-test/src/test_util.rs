use backboard::engine::memory::{MemoryEngine, MemoryEngineConfig};
use backboard::errors::BackboardResult;
use backboard::pubsub::LocalRelay;
use backboard::schema::{IndexDefinition, SchemaSnapshot, StoreDefinition};
use backboard::Backboard;
use std::backtrace::Backtrace;
use std::time::Instant;

/// Runs a test between its setup and teardown, reporting failures and panics
/// with the backtrace captured at the start of the run.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> BackboardResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> BackboardResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> BackboardResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();
    let result = std::panic::catch_unwind(|| {
        let backtrace = Backtrace::capture();
        match before() {
            Ok(ctx) => match test(ctx.clone()) {
                Ok(_) => after(ctx).map_err(|e| (format!("After run failed: {:?}", e), backtrace.to_string())),
                Err(e) => {
                    let _ = after(ctx);
                    Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                }
            },
            Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
        }
    });

    let error = match result {
        Ok(Ok(_)) => return,
        Ok(Err((e, bt))) => (e, bt),
        Err(panic_err) => {
            let message = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            (format!("Panic: {}", message), Backtrace::capture().to_string())
        }
    };

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Took {:?}", start_time.elapsed());
    eprintln!("Error: {}", error.0);
    if !error.1.is_empty() && !error.1.contains("disabled") {
        eprintln!("\nBacktrace:\n{}", error.1);
    }
    eprintln!("=====================================================\n");
    panic!("Test failed. Last error: {}", error.0);
}

/// A private connection manager plus a unique database name.
#[derive(Clone)]
pub struct TestContext {
    name: String,
    backboard: Backboard,
    engine: MemoryEngine,
    relay: LocalRelay,
}

impl TestContext {
    pub fn new(name: String, backboard: Backboard, engine: MemoryEngine, relay: LocalRelay) -> Self {
        Self {
            name,
            backboard,
            engine,
            relay,
        }
    }

    /// Name of the database owned by this test.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backboard(&self) -> Backboard {
        self.backboard.clone()
    }

    pub fn engine(&self) -> MemoryEngine {
        self.engine.clone()
    }

    pub fn relay(&self) -> LocalRelay {
        self.relay.clone()
    }

    /// Another manager over the same engine and relay, as a second tab would be.
    pub fn peer(&self) -> Backboard {
        Backboard::builder()
            .engine(self.engine.clone())
            .relay(self.relay.clone())
            .build()
    }
}

pub fn random_name() -> String {
    format!("db-{}", uuid::Uuid::new_v4())
}

pub fn create_test_context() -> BackboardResult<TestContext> {
    create_context_with(MemoryEngineConfig::new(), false)
}

pub fn create_context_with(config: MemoryEngineConfig, close_on_version_change: bool) -> BackboardResult<TestContext> {
    let engine = MemoryEngine::new(config);
    let relay = LocalRelay::new();
    let backboard = Backboard::builder()
        .engine(engine.clone())
        .relay(relay.clone())
        .close_on_version_change(close_on_version_change)
        .build();
    Ok(TestContext::new(random_name(), backboard, engine, relay))
}

pub fn cleanup(ctx: TestContext) -> BackboardResult<()> {
    ctx.engine().force_close(ctx.name());
    ctx.backboard().delete(ctx.name())?;
    ctx.backboard().end()
}

/// Version 1 of the league fixture: players indexed by team.
pub fn players_v1() -> SchemaSnapshot {
    SchemaSnapshot::new(1).store(
        "players",
        StoreDefinition::new()
            .key_path("pid")
            .auto_increment()
            .index("tid", IndexDefinition::new("tid")),
    )
}

/// Version 2 of the league fixture: version 1 plus games.
pub fn games_v2() -> SchemaSnapshot {
    SchemaSnapshot::new(2)
        .store(
            "players",
            StoreDefinition::new()
                .key_path("pid")
                .auto_increment()
                .index("tid", IndexDefinition::new("tid")),
        )
        .store("games", StoreDefinition::new().key_path("gid").auto_increment())
}

/// Version 3 of the league fixture: teams appear and player names become unique.
pub fn teams_v3() -> SchemaSnapshot {
    SchemaSnapshot::new(3)
        .store(
            "players",
            StoreDefinition::new()
                .key_path("pid")
                .auto_increment()
                .index("tid", IndexDefinition::new("tid"))
                .index("name", IndexDefinition::new("name").unique()),
        )
        .store("games", StoreDefinition::new().key_path("gid").auto_increment())
        .store("teams", StoreDefinition::new().key_path("tid"))
}

pub fn league() -> Vec<SchemaSnapshot> {
    vec![players_v1(), games_v2(), teams_v3()]
}
