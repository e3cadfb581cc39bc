use backboard::event::{DatabaseEvent, DatabaseEventKind, DatabaseEventListener};
use backboard::ErrorKind;
use backboard_int_test::test_util::{cleanup, create_test_context, games_v2, players_v1, run_test};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[test]
fn test_version_change_listener_unblocks_peer() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let changes = Arc::new(Mutex::new(Vec::new()));
            let sink = changes.clone();
            let handle = db.downgrade();
            db.on(
                DatabaseEventKind::VersionChange,
                DatabaseEventListener::new(move |event| {
                    if let DatabaseEvent::VersionChange(change) = event {
                        sink.lock().unwrap().push((change.old_version(), change.new_version()));
                    }
                    if let Some(db) = handle.upgrade() {
                        db.close();
                    }
                    Ok(())
                }),
            );

            let upgraded = ctx.peer().open(ctx.name(), vec![players_v1(), games_v2()])?;
            assert_eq!(upgraded.version(), 2);
            assert_eq!(*changes.lock().unwrap(), vec![(1, Some(2))]);
            assert!(db.is_closed());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_deletion_is_announced() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let changes = Arc::new(Mutex::new(Vec::new()));
            let sink = changes.clone();
            db.on(
                DatabaseEventKind::VersionChange,
                DatabaseEventListener::new(move |event| {
                    if let DatabaseEvent::VersionChange(change) = event {
                        sink.lock().unwrap().push(change.new_version());
                    }
                    Ok(())
                }),
            );

            ctx.peer().delete(ctx.name())?;
            assert_eq!(*changes.lock().unwrap(), vec![None]);
            assert!(!db.is_closed());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_closed_is_emitted_once() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let closed = Arc::new(AtomicUsize::new(0));
            let counter = closed.clone();
            db.on(
                DatabaseEventKind::Closed,
                DatabaseEventListener::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );

            db.close();
            db.close();
            assert_eq!(closed.load(Ordering::SeqCst), 1);
            assert!(db.is_closed());

            let err = db.tx(&["players"], backboard::TransactionMode::ReadOnly).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::InvalidStateError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_forced_close_emits_closed() {
    run_test(
        || create_test_context(),
        |ctx| {
            let first = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let second = ctx.peer().open(ctx.name(), vec![players_v1()])?;
            let closed = Arc::new(AtomicUsize::new(0));
            for db in [&first, &second] {
                let counter = closed.clone();
                db.on(
                    DatabaseEventKind::Closed,
                    DatabaseEventListener::new(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }),
                );
            }

            assert_eq!(ctx.engine().connection_count(ctx.name()), 2);
            assert_eq!(ctx.engine().force_close(ctx.name()), 2);
            assert_eq!(closed.load(Ordering::SeqCst), 2);
            assert!(first.is_closed() && second.is_closed());
            assert_eq!(ctx.engine().connection_count(ctx.name()), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_off_removes_listener() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let closed = Arc::new(AtomicUsize::new(0));
            let counter = closed.clone();
            let subscriber = db.on(
                DatabaseEventKind::Closed,
                DatabaseEventListener::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );

            assert!(db.off(&subscriber));
            assert!(!db.off(&subscriber));
            db.close();
            assert_eq!(closed.load(Ordering::SeqCst), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
