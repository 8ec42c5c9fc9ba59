use super::*;
use std::sync::atomic::Ordering;

use crate::{
    cache::QueryData,
    test_support::{collection, context, MockExamApi},
    Notice, NoticeLevel,
};

#[test]
fn control_is_disabled_once_evaluated() {
    let api = MockExamApi::new();
    let trigger = EvaluationTrigger::new(context(&api));
    let mut target = collection("Midterm 2024");

    assert_eq!(
        trigger.control(&target, false),
        TriggerControl {
            enabled: true,
            label: LABEL_START,
        }
    );
    assert_eq!(
        trigger.control(&target, true),
        TriggerControl {
            enabled: false,
            label: LABEL_EVALUATING,
        }
    );

    target.is_evaluated = true;
    for polling in [false, true] {
        assert_eq!(
            trigger.control(&target, polling),
            TriggerControl {
                enabled: false,
                label: LABEL_EVALUATED,
            }
        );
    }
}

#[test]
fn in_flight_guard_is_exclusive_until_dropped() {
    let flag = AtomicBool::new(false);

    let guard = InFlightGuard::acquire(&flag).expect("first acquire");
    assert!(InFlightGuard::acquire(&flag).is_none());
    drop(guard);

    assert!(!flag.load(Ordering::SeqCst));
    assert!(InFlightGuard::acquire(&flag).is_some());
}

#[tokio::test]
async fn evaluated_collection_is_never_started() {
    let api = MockExamApi::new();
    let mut target = collection("Final");
    target.is_evaluated = true;
    api.insert_collection(target.clone());
    let trigger = EvaluationTrigger::new(context(&api));

    let outcome = trigger.start(&target, false).await.expect("start");

    assert_eq!(outcome, TriggerOutcome::Ignored(IgnoredReason::AlreadyEvaluated));
    assert_eq!(api.start_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn acknowledged_start_enters_polling_once() {
    let api = MockExamApi::new();
    let target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    let ctx = context(&api);
    let mut events = ctx.subscribe_events();
    let trigger = EvaluationTrigger::new(ctx.clone());
    let mut poller = EvaluationPoller::new(ctx.clone(), target.id);
    ctx.collection(target.id).await.expect("load");

    let outcome = trigger
        .start(&target, poller.is_polling())
        .await
        .expect("start");
    assert!(matches!(outcome, TriggerOutcome::Started { .. }));
    assert!(poller.begin());

    let again = trigger
        .start(&target, poller.is_polling())
        .await
        .expect("start");
    assert_eq!(again, TriggerOutcome::Ignored(IgnoredReason::AlreadyPolling));
    assert!(!poller.begin());
    assert_eq!(api.start_calls.load(Ordering::SeqCst), 1);
    assert!(ctx.cache().is_stale(&QueryKey::collection(target.id)).await);

    assert_eq!(
        events.try_recv().expect("notice"),
        ClientEvent::Notice(Notice {
            level: NoticeLevel::Success,
            message: EVALUATION_STARTED_MESSAGE.to_string(),
        })
    );
    assert_eq!(
        events.try_recv().expect("state change"),
        ClientEvent::EvaluationStateChanged {
            collection_id: target.id,
            state: PollState::Polling,
        }
    );
}

#[tokio::test]
async fn rejected_start_keeps_state_and_reports_error() {
    let api = MockExamApi::new();
    let target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    api.fail_start_with(ClientError::Server {
        status: 400,
        message: "Question paper not uploaded for this collection".to_string(),
    });
    let ctx = context(&api);
    let mut events = ctx.subscribe_events();
    let trigger = EvaluationTrigger::new(ctx.clone());
    ctx.collection(target.id).await.expect("load");

    let err = trigger.start(&target, false).await.expect_err("must fail");

    assert_eq!(
        err.user_message(),
        "Question paper not uploaded for this collection"
    );
    assert!(!trigger.is_in_flight());
    assert!(!ctx.cache().is_stale(&QueryKey::collection(target.id)).await);
    assert_eq!(
        events.try_recv().expect("notice"),
        ClientEvent::Notice(Notice {
            level: NoticeLevel::Error,
            message: "Question paper not uploaded for this collection".to_string(),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn poller_refetches_until_evaluated_then_stops() {
    let api = MockExamApi::new();
    let target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    api.flip_after_gets(target.id, 3);
    let mut poller = EvaluationPoller::new(context(&api), target.id);
    let mut state = poller.watch();
    let started = Instant::now();

    assert!(poller.begin());
    state
        .wait_for(|state| *state == PollState::Idle)
        .await
        .expect("idle");

    assert_eq!(api.gets(), 4);
    assert_eq!(started.elapsed(), EVALUATION_POLL_INTERVAL * 4);

    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 10).await;
    assert_eq!(api.gets(), 4);
    assert!(!poller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn evaluated_data_from_elsewhere_latches_idle() {
    let api = MockExamApi::new();
    let mut target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    let ctx = context(&api);
    let mut poller = EvaluationPoller::new(ctx.clone(), target.id);
    let mut state = poller.watch();

    assert!(poller.begin());
    target.is_evaluated = true;
    ctx.cache()
        .set(QueryKey::collection(target.id), QueryData::Collection(target))
        .await;
    state
        .wait_for(|state| *state == PollState::Idle)
        .await
        .expect("idle");

    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 3).await;
    assert_eq!(api.gets(), 0);
}

#[tokio::test(start_paused = true)]
async fn evaluated_data_cached_before_begin_latches_idle() {
    let api = MockExamApi::new();
    let mut target = collection("Midterm 2024");
    target.is_evaluated = true;
    api.insert_collection(target.clone());
    let ctx = context(&api);
    ctx.cache()
        .set(QueryKey::collection(target.id), QueryData::Collection(target.clone()))
        .await;
    let mut events = ctx.subscribe_events();
    let mut poller = EvaluationPoller::new(ctx, target.id);
    let mut state = poller.watch();

    assert!(poller.begin());
    tokio::time::timeout(
        EVALUATION_POLL_INTERVAL - Duration::from_millis(1),
        state.wait_for(|state| *state == PollState::Idle),
    )
    .await
    .expect("latched before the first tick")
    .expect("idle");

    assert_eq!(
        events.recv().await.expect("polling event"),
        ClientEvent::EvaluationStateChanged {
            collection_id: target.id,
            state: PollState::Polling,
        }
    );
    assert_eq!(
        events.recv().await.expect("idle event"),
        ClientEvent::EvaluationStateChanged {
            collection_id: target.id,
            state: PollState::Idle,
        }
    );
    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 3).await;
    assert_eq!(api.gets(), 0);
}

#[tokio::test(start_paused = true)]
async fn observed_evaluated_collection_stops_polling() {
    let api = MockExamApi::new();
    let mut target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    let mut poller = EvaluationPoller::new(context(&api), target.id);

    assert!(poller.begin());
    assert!(!poller.observe(&target));
    target.is_evaluated = true;
    assert!(poller.observe(&target));
    assert_eq!(poller.state(), PollState::Idle);

    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 3).await;
    assert_eq!(api.gets(), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_ticks_keep_polling() {
    let api = MockExamApi::new();
    let poller_target = collection("Missing");
    let mut poller = EvaluationPoller::new(context(&api), poller_target.id);

    assert!(poller.begin());
    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 3 + Duration::from_millis(1)).await;

    assert_eq!(api.gets(), 3);
    assert!(poller.is_polling());
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_the_timer() {
    let api = MockExamApi::new();
    let target = collection("Midterm 2024");
    api.insert_collection(target.clone());
    let mut poller = EvaluationPoller::new(context(&api), target.id);

    assert!(poller.begin());
    tokio::time::sleep(EVALUATION_POLL_INTERVAL + Duration::from_millis(1)).await;
    assert_eq!(api.gets(), 1);

    poller.cancel();
    tokio::time::sleep(EVALUATION_POLL_INTERVAL * 5).await;

    assert_eq!(api.gets(), 1);
    assert_eq!(poller.state(), PollState::Idle);
}
