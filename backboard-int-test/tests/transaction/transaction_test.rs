use backboard::engine::memory::MemoryEngineConfig;
use backboard::event::{BackboardEvent, BackboardEventKind, BackboardEventListener};
use backboard::{json, ErrorKind, Key, KeyRange, TransactionMode};
use backboard_int_test::test_util::{cleanup, create_context_with, create_test_context, league, run_test};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

#[test]
fn test_multi_store_transaction() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players", "teams"], TransactionMode::ReadWrite)?;
            assert_eq!(tx.object_store_names(), vec!["players".to_string(), "teams".to_string()]);
            tx.store("teams")?.put(json!({"tid": 1, "region": "Boston"}))?;
            let pid = tx.store("players")?.put(json!({"name": "John", "tid": 1}))?;
            tx.complete()?;

            let read = db.tx(&["players", "teams"], TransactionMode::ReadOnly)?;
            let player = read.store("players")?.get(pid)?.expect("player committed");
            let team = read.store("teams")?.get(Key::from_value(&player["tid"]).expect("tid is a key"))?;
            assert_eq!(team.expect("team committed")["region"], json!("Boston"));
            read.complete()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_settlement_is_single() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players"], TransactionMode::ReadWrite)?;
            let players = tx.store("players")?;
            players.put(json!({"name": "John"}))?;
            tx.complete()?;
            assert!(tx.complete().is_ok());
            assert!(tx.outcome().expect("settled").is_ok());

            let err = players.put(json!({"name": "Late"})).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::TransactionInactiveError);
            assert_eq!(err.name(), "TransactionInactiveError");
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_abort_discards_writes() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players", "games"], TransactionMode::ReadWrite)?;
            tx.store("players")?.put(json!({"name": "John"}))?;
            tx.store("games")?.put(json!({"home": 1}))?;
            tx.abort()?;

            let first = tx.complete().unwrap_err();
            let second = tx.complete().unwrap_err();
            assert_eq!(first.kind(), &ErrorKind::AbortError);
            assert_eq!(first.message(), second.message());
            assert_eq!(db.store("players")?.count(None)?, 0);
            assert_eq!(db.store("games")?.count(None)?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_failed_request_keeps_transaction_usable() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players"], TransactionMode::ReadWrite)?;
            let players = tx.store("players")?;
            players.add(json!({"name": "John"}))?;
            let err = players.add(json!({"name": "John"})).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConstraintError);
            players.add(json!({"name": "Jane"}))?;
            tx.complete()?;
            assert_eq!(db.store("players")?.count(None)?, 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_read_only_transaction() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let mode = TransactionMode::from_str("readonly")?;
            let tx = db.tx(&["players"], mode)?;
            let err = tx.store("players")?.put(json!({"name": "John"})).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ReadOnlyError);
            assert_eq!(tx.store("players")?.count(None)?, 0);
            tx.complete()?;

            let err = TransactionMode::from_str("exclusive").unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_dropped_transaction_commits() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            {
                let tx = db.tx(&["games"], TransactionMode::ReadWrite)?;
                tx.store("games")?.put(json!({"home": 1}))?;
            }
            assert_eq!(db.store("games")?.count(None)?, 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_key_range_queries() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let games = db.store("games")?;
            for round in 0..10 {
                games.put(json!({"round": round}))?;
            }

            assert_eq!(games.count(Some(KeyRange::bound(3, 6, false, false)?))?, 4);
            assert_eq!(games.count(Some(KeyRange::bound(3, 6, true, true)?))?, 2);
            assert_eq!(games.count(Some(KeyRange::lower_bound(8, false)))?, 3);
            assert_eq!(games.count(Some(KeyRange::upper_bound(2, true)))?, 1);
            assert_eq!(games.get_all(None, Some(3))?.len(), 3);

            let tail = games.get_all(Some(KeyRange::lower_bound(9, false)), None)?;
            assert_eq!(tail, vec![json!({"round": 8, "gid": 9}), json!({"round": 9, "gid": 10})]);

            let err = KeyRange::bound(6, 3, false, false).unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::DataError);

            games.delete(KeyRange::upper_bound(5, false))?;
            assert_eq!(games.count(None)?, 5);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_index_queries() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players"], TransactionMode::ReadWrite)?;
            let players = tx.store("players")?;
            for (name, tid) in [("a", 1), ("b", 1), ("c", 2), ("d", 3)] {
                players.put(json!({"name": name, "tid": tid}))?;
            }
            let by_team = players.index("tid")?;
            assert_eq!(by_team.count(Some(1.into()))?, 2);
            assert_eq!(by_team.get_all(Some(KeyRange::lower_bound(2, false)), None)?.len(), 2);
            assert_eq!(players.index("name")?.get("c")?.expect("c exists")["tid"], json!(2));
            assert_eq!(players.index("ghost").err().map(|e| e.kind().clone()), Some(ErrorKind::NotFoundError));
            tx.complete()?;
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_quota_exceeded() {
    run_test(
        || create_context_with(MemoryEngineConfig::new().quota_bytes(128), false),
        |ctx| {
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            ctx.backboard().on(
                BackboardEventKind::QuotaExceeded,
                BackboardEventListener::new(move |event| {
                    if let BackboardEvent::QuotaExceeded { database, error } = event {
                        sink.lock().unwrap().push((database, error.name()));
                    }
                    Ok(())
                }),
            );

            let db = ctx.backboard().open(ctx.name(), league())?;
            let tx = db.tx(&["players"], TransactionMode::ReadWrite)?;
            tx.store("players")?.put(json!({"name": "x".repeat(512)}))?;
            let err = tx.complete().unwrap_err();
            assert_eq!(err.kind(), &ErrorKind::QuotaExceededError);
            assert_eq!(
                *events.lock().unwrap(),
                vec![(ctx.name().to_string(), "QuotaExceededError")]
            );
            assert_eq!(db.store("players")?.count(None)?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
