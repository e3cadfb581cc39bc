use backboard::json;
use backboard_int_test::test_util::{cleanup, create_test_context, league, players_v1, run_test};

#[test]
fn test_delete_missing_database() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().delete(ctx.name())?;
            ctx.backboard().delete(ctx.name())?;
            assert!(!ctx.backboard().database_names().contains(&ctx.name().to_string()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_delete_closed_database() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().open(ctx.name(), league())?.close();
            assert_eq!(ctx.backboard().database_names(), vec![ctx.name().to_string()]);

            ctx.backboard().delete(ctx.name())?;
            assert!(ctx.backboard().database_names().is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_blocked_delete_completes_on_close() {
    run_test(
        || create_test_context(),
        |ctx| {
            let held = ctx.peer().open(ctx.name(), league())?;
            held.store("players")?.put(json!({"name": "John"}))?;

            ctx.backboard().delete(ctx.name())?;
            assert!(ctx.backboard().database_names().is_empty());
            assert_eq!(ctx.engine().connection_count(ctx.name()), 1);

            held.close();
            assert_eq!(ctx.engine().connection_count(ctx.name()), 0);
            assert!(ctx.backboard().database_names().is_empty());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_reopen_after_delete_starts_fresh() {
    run_test(
        || create_test_context(),
        |ctx| {
            let db = ctx.backboard().open(ctx.name(), league())?;
            db.store("players")?.put(json!({"name": "John"}))?;
            db.close();
            ctx.backboard().delete(ctx.name())?;

            let db = ctx.backboard().open(ctx.name(), vec![players_v1()])?;
            assert_eq!(db.version(), 1);
            assert_eq!(db.object_store_names(), vec!["players".to_string()]);
            assert_eq!(db.store("players")?.count(None)?, 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
