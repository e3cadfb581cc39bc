use backboard::errors::{BackboardError, ErrorKind};
use backboard::schema::{IndexDefinition, StoreOptions};
use backboard::{json, KeyPath, OpenTarget};
use backboard_int_test::test_util::{cleanup, create_test_context, games_v2, players_v1, run_test};

#[test]
fn test_version_open_with_callback() {
    run_test(
        || create_test_context(),
        |ctx| {
            let target = OpenTarget::version(1).with_upgrade(|db| {
                assert_eq!(db.old_version(), 0);
                assert!(db.applied_versions().is_empty());
                let players = db.create_object_store("players", StoreOptions::new(Some(KeyPath::from("pid")), true))?;
                players.create_index("tid", IndexDefinition::new("tid"))?;
                db.transaction().store("players")?.put(json!({"name": "Seed", "tid": 0}))?;
                Ok(())
            });
            let db = ctx.backboard().open(ctx.name(), target)?;
            assert_eq!(db.version(), 1);
            assert_eq!(db.index_names("players")?, vec!["tid".to_string()]);
            assert_eq!(db.store("players")?.count(None)?, 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_callback_migrates_data_after_snapshots() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            let players = db.store("players")?;
            players.put(json!({"name": "John", "tid": 1}))?;
            players.put(json!({"name": "Jane", "tid": 2}))?;
            db.close();

            let target = OpenTarget::from(vec![players_v1(), games_v2()]).with_upgrade(|db| {
                assert_eq!(db.old_version(), 1);
                assert_eq!(db.applied_versions(), &[2]);
                let tx = db.transaction();
                let games = tx.store("games")?;
                for player in tx.store("players")?.get_all(None, None)? {
                    games.add(json!({"home": player["tid"], "score": 0}))?;
                }
                Ok(())
            });
            let db = ctx.backboard().open(ctx.name(), target)?;
            assert_eq!(db.store("games")?.count(None)?, 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_callback_error_rolls_back() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().open(ctx.name(), vec![players_v1()])?.close();

            let target = OpenTarget::from(vec![players_v1(), games_v2()]).with_upgrade(|db| {
                db.transaction().store("players")?.clear()?;
                anyhow::bail!("season data is inconsistent")
            });
            let err = ctx.backboard().open(ctx.name(), target).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::UpgradeCallbackError);
            assert_eq!(err.cause().unwrap().message(), "season data is inconsistent");

            let db = ctx.backboard().open(ctx.name(), 1)?;
            assert_eq!(db.version(), 1);
            assert_eq!(db.object_store_names(), vec!["players".to_string()]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_callback_engine_error_is_preserved_as_cause() {
    run_test(
        || create_test_context(),
        |ctx| {
            let target = OpenTarget::from(vec![players_v1()]).with_upgrade(|db| {
                db.create_object_store("players", StoreOptions::default())?;
                Ok(())
            });
            let err = ctx.backboard().open(ctx.name(), target).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::UpgradeCallbackError);
            assert_eq!(err.cause().unwrap().kind(), &ErrorKind::ConstraintError);
            assert!(ctx.backboard().database_names().is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_callback_may_return_backboard_errors() {
    run_test(
        || create_test_context(),
        |ctx| {
            let target = OpenTarget::version(1).with_upgrade(|_| {
                Err(BackboardError::new("custom refusal", ErrorKind::DataError).into())
            });
            let err = ctx.backboard().open(ctx.name(), target).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::UpgradeCallbackError);
            assert_eq!(err.cause().unwrap().kind(), &ErrorKind::DataError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_lower_version_is_rejected() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().open(ctx.name(), vec![players_v1(), games_v2()])?.close();
            let err = ctx.backboard().open(ctx.name(), vec![players_v1()]).err().unwrap();
            assert_eq!(err.kind(), &ErrorKind::OpenError);
            assert_eq!(err.cause().unwrap().kind(), &ErrorKind::VersionError);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_panicking_callback_leaves_no_database() {
    run_test(
        || create_test_context(),
        |ctx| {
            let backboard = ctx.backboard();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                let target = OpenTarget::from(vec![players_v1()]).with_upgrade(|_| panic!("callback gave up"));
                let _ = backboard.open(ctx.name(), target);
            }));
            assert!(result.is_err());
            assert!(ctx.backboard().database_names().is_empty());
            assert_eq!(ctx.engine().connection_count(ctx.name()), 0);

            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            assert_eq!(db.version(), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
