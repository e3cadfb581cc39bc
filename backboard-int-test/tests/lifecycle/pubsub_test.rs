use backboard::event::{BackboardEvent, BackboardEventKind, BackboardEventListener};
use backboard::Backboard;
use backboard_int_test::test_util::{cleanup, create_test_context, run_test};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

type Inbox = Arc<Mutex<Vec<(String, String)>>>;

fn inbox(backboard: &Backboard) -> Inbox {
    let received: Inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    backboard.on(
        BackboardEventKind::Message,
        BackboardEventListener::new(move |event| {
            if let BackboardEvent::Message { channel, message } = event {
                sink.lock().unwrap().push((channel, message));
            }
            Ok(())
        }),
    );
    received
}

#[test]
fn test_messages_reach_subscribed_peers() {
    run_test(
        || create_test_context(),
        |ctx| {
            let peer = ctx.peer();
            let mine = inbox(&ctx.backboard());
            let theirs = inbox(&peer);

            peer.subscribe("scores");
            ctx.backboard().publish("scores", "42-40")?;
            ctx.backboard().publish("trades", "ignored")?;

            assert!(mine.lock().unwrap().is_empty());
            assert_eq!(
                *theirs.lock().unwrap(),
                vec![("scores".to_string(), "42-40".to_string())]
            );
            peer.end()
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_publisher_receives_its_own_messages() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mine = inbox(&ctx.backboard());
            ctx.backboard().subscribe("scores");
            ctx.backboard().publish("scores", "final")?;
            assert_eq!(
                *mine.lock().unwrap(),
                vec![("scores".to_string(), "final".to_string())]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_unsubscribe_filters_shared_channels() {
    run_test(
        || create_test_context(),
        |ctx| {
            let peer = ctx.peer();
            let mine = inbox(&ctx.backboard());
            let theirs = inbox(&peer);
            ctx.backboard().subscribe("scores");
            ctx.backboard().subscribe("trades");
            peer.subscribe("scores");
            assert_eq!(
                ctx.backboard().subscriptions(),
                vec!["scores".to_string(), "trades".to_string()]
            );

            ctx.backboard().unsubscribe("scores");
            assert_eq!(ctx.backboard().subscriptions(), vec!["trades".to_string()]);
            assert_eq!(
                ctx.relay().active_channels(),
                vec!["scores".to_string(), "trades".to_string()]
            );

            peer.publish("scores", "12-10")?;
            assert!(mine.lock().unwrap().is_empty());
            assert_eq!(theirs.lock().unwrap().len(), 1);

            peer.unsubscribe("scores");
            assert_eq!(ctx.relay().active_channels(), vec!["trades".to_string()]);
            peer.end()
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_end_tears_down() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mine = inbox(&ctx.backboard());
            let ended = Arc::new(AtomicUsize::new(0));
            let counter = ended.clone();
            ctx.backboard().on(
                BackboardEventKind::End,
                BackboardEventListener::new(move |_| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
            ctx.backboard().subscribe("scores");
            assert_eq!(ctx.relay().listener_count(), 1);

            ctx.backboard().end()?;
            assert!(ctx.backboard().subscriptions().is_empty());
            assert!(ctx.relay().active_channels().is_empty());
            assert_eq!(ctx.relay().listener_count(), 0);

            ctx.peer().publish("scores", "late")?;
            assert!(mine.lock().unwrap().is_empty());

            ctx.backboard().end()?;
            assert_eq!(ended.load(Ordering::SeqCst), 2);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_resubscribe_after_end() {
    run_test(
        || create_test_context(),
        |ctx| {
            ctx.backboard().subscribe("scores");
            ctx.backboard().end()?;

            let mine = inbox(&ctx.backboard());
            ctx.backboard().subscribe("scores");
            ctx.backboard().publish("scores", "again")?;
            assert_eq!(mine.lock().unwrap().len(), 1);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_instance_is_process_wide() {
    let first = backboard::instance();
    let second = backboard::instance();
    let received = inbox(&second);
    second.subscribe("instance-pubsub");
    first.publish("instance-pubsub", "hello").unwrap();
    assert_eq!(received.lock().unwrap().len(), 1);
    second.unsubscribe("instance-pubsub");
}
