use backboard::event::{BackboardEvent, BackboardEventKind, BackboardEventListener};
use backboard::schema::{IndexDefinition, SchemaSnapshot, StoreDefinition};
use backboard::{json, ErrorKind, OpenTarget};
use backboard_int_test::test_util::{
    cleanup, create_context_with, create_test_context, games_v2, league, players_v1, run_test,
};
use backboard::engine::memory::MemoryEngineConfig;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_fresh_open_applies_snapshots_in_order() {
    run_test(
        || create_test_context(),
        |ctx| {
            let applied = Arc::new(Mutex::new(Vec::new()));
            let sink = applied.clone();
            let target = OpenTarget::from(league()).with_upgrade(move |db| {
                *sink.lock().unwrap() = db.applied_versions().to_vec();
                assert_eq!(db.old_version(), 0);
                assert_eq!(db.new_version(), 3);
                Ok(())
            });

            let db = ctx.backboard().open(ctx.name(), target)?;
            assert_eq!(db.version(), 3);
            assert_eq!(*applied.lock().unwrap(), vec![1, 2, 3]);
            assert_eq!(
                db.object_store_names(),
                vec!["games".to_string(), "players".to_string(), "teams".to_string()]
            );
            assert_eq!(db.index_names("players")?, vec!["name".to_string(), "tid".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_players_then_games() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let pid = db.store("players")?.put(json!({"name": "John", "tid": 1}))?;
            db.close();

            let db = ctx.backboard().open(ctx.name(), vec![players_v1(), games_v2()])?;
            assert_eq!(db.version(), 2);
            assert_eq!(db.object_store_names(), vec!["games".to_string(), "players".to_string()]);
            let john = db.store("players")?.get(pid)?.expect("player survives the upgrade");
            assert_eq!(john["name"], json!("John"));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_reopen_at_current_version_is_idempotent() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().open(ctx.name(), vec![players_v1(), games_v2()])?.close();

            let upgraded = Arc::new(AtomicBool::new(false));
            let flag = upgraded.clone();
            let target = OpenTarget::from(vec![players_v1(), games_v2()]).with_upgrade(move |_| {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });
            let db = ctx.backboard().open(ctx.name(), target)?;
            assert!(!upgraded.load(Ordering::SeqCst));
            assert_eq!(db.version(), 2);
            assert_eq!(db.object_store_names(), vec!["games".to_string(), "players".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_store_removed_in_later_snapshot() {
    run_test(
        || create_test_context(),
        |ctx| {
            let v1 = SchemaSnapshot::new(1)
                .store("players", StoreDefinition::new().key_path("pid").auto_increment())
                .store("scratch", StoreDefinition::new());
            let v2 = SchemaSnapshot::new(2)
                .store("players", StoreDefinition::new().key_path("pid").auto_increment());

            ctx.backboard().open(ctx.name(), vec![v1.clone()])?.close();
            let db = ctx.backboard().open(ctx.name(), vec![v1, v2])?;
            assert_eq!(db.object_store_names(), vec!["players".to_string()]);
            assert_eq!(db.store("scratch").err().map(|e| e.kind().clone()), Some(ErrorKind::NotFoundError));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_index_option_change_recreates_index() {
    run_test(
        || create_test_context(),
        |ctx| {
            let v1 = SchemaSnapshot::new(1).store(
                "players",
                StoreDefinition::new()
                    .key_path("pid")
                    .auto_increment()
                    .index("tid", IndexDefinition::new("tid"))
                    .index("name", IndexDefinition::new("name")),
            );
            let v2 = SchemaSnapshot::new(2).store(
                "players",
                StoreDefinition::new()
                    .key_path("pid")
                    .auto_increment()
                    .index("tid", IndexDefinition::new("tid"))
                    .index("name", IndexDefinition::new("name").unique()),
            );

            let db = ctx.backboard().open(ctx.name(), vec![v1.clone()])?;
            let players = db.store("players")?;
            players.put(json!({"name": "John", "tid": 1}))?;
            players.put(json!({"name": "Jane", "tid": 1}))?;
            players.put(json!({"name": "John", "tid": 2}))?;
            db.close();

            // a unique index cannot be built over the duplicate names
            let err = ctx.backboard().open(ctx.name(), vec![v1.clone(), v2.clone()]).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::OpenError);
            assert_eq!(err.root_cause().kind(), &ErrorKind::ConstraintError);

            let db = ctx.backboard().open(ctx.name(), 1)?;
            assert_eq!(db.version(), 1);
            assert_eq!(db.index_names("players")?, vec!["name".to_string(), "tid".to_string()]);
            assert_eq!(db.store("players")?.count(None)?, 3);
            db.store("players")?.delete(3)?;
            db.close();

            let db = ctx.backboard().open(ctx.name(), vec![v1, v2])?;
            assert_eq!(db.version(), 2);
            let players = db.store("players")?;
            assert_eq!(players.index("tid")?.count(Some(1.into()))?, 2);
            let err = players.add(json!({"name": "Jane", "tid": 3})).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConstraintError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_blocked_upgrade() {
    run_test(
        || create_test_context(),
        |ctx| {
            let blocked = Arc::new(AtomicUsize::new(0));
            let counter = blocked.clone();
            ctx.backboard().on(
                BackboardEventKind::Blocked,
                BackboardEventListener::new(move |event| {
                    if let BackboardEvent::Blocked { event, .. } = event {
                        assert_eq!(event.new_version(), Some(2));
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );

            let peer = ctx.peer();
            let held = peer.open(ctx.name(), vec![players_v1()])?;
            let err = ctx
                .backboard()
                .open(ctx.name(), vec![players_v1(), games_v2()])
                .err()
                .unwrap();
            assert_eq!(err.kind(), &ErrorKind::OpenError);
            assert_eq!(blocked.load(Ordering::SeqCst), 1);
            assert_eq!(held.version(), 1);

            held.close();
            let db = ctx.backboard().open(ctx.name(), vec![players_v1(), games_v2()])?;
            assert_eq!(db.version(), 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_close_on_version_change_unblocks_upgrades() {
    run_test(
        || create_context_with(MemoryEngineConfig::new(), true),
        |ctx| {
            let held = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let db = ctx.backboard().open(ctx.name(), vec![players_v1(), games_v2()])?;
            assert!(held.is_closed());
            assert_eq!(db.version(), 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_malformed_snapshots() {
    run_test(
        || create_test_context(),
        |ctx| {
            let descending = vec![games_v2(), players_v1()];
            let err = ctx.backboard().open(ctx.name(), descending).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::ConfigurationError);

            let bad_key_path = vec![SchemaSnapshot::new(1).store(
                "players",
                StoreDefinition::new().key_path("not a path").auto_increment(),
            )];
            let err = ctx.backboard().open(ctx.name(), bad_key_path).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
            assert!(ctx.backboard().database_names().is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
