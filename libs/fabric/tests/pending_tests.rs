use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::prelude::*;

use switchboard_core::{Error, InvocationMode, Request, Response};
use switchboard_fabric::{PendingCalls, ResultHandle};

const SLOW_CALL: &str = "service response time is too slow";

/// Keeps the level and message of every event it sees.
#[derive(Clone, Default)]
struct CapturedEvents(Arc<Mutex<Vec<(Level, String)>>>);

impl CapturedEvents {
    fn warnings(&self, message: &str) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|(level, text)| *level == Level::WARN && text == message)
            .count()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedEvents {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.0
            .lock()
            .unwrap()
            .push((*event.metadata().level(), visitor.0));
    }
}

fn request() -> Request {
    Request::new("demo.Echo", "echo", InvocationMode::Sync)
}

#[tokio::test]
async fn slow_success_is_logged_as_warning() {
    let events = CapturedEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let request = request();
    let (handle, waiter) = ResultHandle::waiter(&request, "127.0.0.1:7001");
    let handle = handle.slow_call_threshold(Some(Duration::from_millis(10)));
    tokio::time::sleep(Duration::from_millis(30)).await;
    handle.complete(Ok(Response::success(&request, vec![1]))).await;

    assert_eq!(waiter.wait(None).await.unwrap().into_result().unwrap(), vec![1]);
    assert_eq!(events.warnings(SLOW_CALL), 1);
}

#[tokio::test]
async fn fast_or_failed_calls_are_not_logged_as_slow() {
    let events = CapturedEvents::default();
    let subscriber = tracing_subscriber::registry().with(events.clone());
    let _guard = tracing::subscriber::set_default(subscriber);

    let fast = request();
    let (handle, _waiter) = ResultHandle::waiter(&fast, "127.0.0.1:7001");
    handle
        .slow_call_threshold(Some(Duration::from_secs(5)))
        .complete(Ok(Response::success(&fast, Vec::new())))
        .await;

    let failed = request();
    let (handle, _waiter) = ResultHandle::waiter(&failed, "127.0.0.1:7001");
    let handle = handle.slow_call_threshold(Some(Duration::from_millis(1)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.complete(Err(Error::ConnectionClosed)).await;

    let unbounded = request();
    let (handle, _waiter) = ResultHandle::waiter(&unbounded, "127.0.0.1:7001");
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.complete(Ok(Response::success(&unbounded, Vec::new()))).await;

    assert_eq!(events.warnings(SLOW_CALL), 0);
}

#[tokio::test]
async fn deferred_handle_runs_once_and_fail_all_drains() {
    let pending = PendingCalls::new();
    let outcomes = Arc::new(Mutex::new(Vec::new()));

    for _ in 0..3 {
        let outcomes = outcomes.clone();
        let request = request();
        let handle = ResultHandle::deferred(&request, "127.0.0.1:7001", move |outcome| {
            async move {
                outcomes.lock().unwrap().push(outcome.is_ok());
            }
            .boxed()
        });
        pending.insert(handle).unwrap();
    }
    assert_eq!(pending.len(), 3);

    pending.fail_all(|| Error::ConnectionClosed).await;
    pending.fail_all(|| Error::ConnectionClosed).await;
    assert!(pending.is_empty());
    assert_eq!(*outcomes.lock().unwrap(), vec![false, false, false]);
}
