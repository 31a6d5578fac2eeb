//! Integration tests for the task queue
//!
//! Covers cross-type ordering, idle detection and timeouts on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_test::{assert_pending, assert_ready};

use feed_session_manager::task_queue::{TaskId, TaskQueue, TaskType};

type Log = Arc<Mutex<Vec<&'static str>>>;

fn push(queue: &TaskQueue, log: &Log, task_type: TaskType, name: &'static str) {
    let log = Arc::clone(log);
    queue.execute(TaskId::Custom(name), task_type, async move {
        log.lock().unwrap().push(name);
    });
}

async fn initialized_queue() -> TaskQueue {
    let queue = TaskQueue::new();
    queue.initialize(async {});
    queue.wait_idle().await;
    assert!(queue.is_initialized());
    queue
}

#[tokio::test]
async fn test_queue_priority_across_types() {
    let queue = initialized_queue().await;
    let log: Log = Arc::default();

    push(&queue, &log, TaskType::UserFacing, "regular");
    push(&queue, &log, TaskType::HeadInvalidate, "invalidate");
    push(&queue, &log, TaskType::HeadReset, "reset");
    push(&queue, &log, TaskType::Immediate, "immediate");
    queue.wait_idle().await;

    // The reset ran before the invalidate, so the regular task is held.
    assert_eq!(*log.lock().unwrap(), vec!["immediate", "reset", "invalidate"]);
    assert!(queue.is_making_request());
    assert!(queue.is_delayed());

    push(&queue, &log, TaskType::HeadReset, "commit");
    queue.wait_idle().await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["immediate", "reset", "invalidate", "commit", "regular"]
    );
    assert!(!queue.is_making_request());
    assert_eq!(queue.pending(), 0);
}

#[tokio::test]
async fn test_wait_idle_pending_while_work_is_runnable() {
    let queue = initialized_queue().await;
    let log: Log = Arc::default();
    push(&queue, &log, TaskType::Background, "work");

    let mut idle = tokio_test::task::spawn(queue.wait_idle());
    assert_pending!(idle.poll());

    queue.wait_idle().await;
    assert!(idle.is_woken());
    assert_ready!(idle.poll());
    assert_eq!(*log.lock().unwrap(), vec!["work"]);
}

#[tokio::test]
async fn test_immediate_runs_before_initialization() {
    let queue = TaskQueue::new();
    let log: Log = Arc::default();

    push(&queue, &log, TaskType::Background, "background");
    push(&queue, &log, TaskType::Immediate, "immediate");
    queue.wait_idle().await;
    assert_eq!(*log.lock().unwrap(), vec!["immediate"]);

    let init_log = Arc::clone(&log);
    queue.initialize(async move {
        init_log.lock().unwrap().push("initialize");
    });
    queue.wait_idle().await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["immediate", "initialize", "background"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_timeout_task_runs_once_on_paused_clock() {
    let queue = initialized_queue().await;
    let log: Log = Arc::default();

    push(&queue, &log, TaskType::HeadInvalidate, "invalidate");
    let task_log = Arc::clone(&log);
    let timeout_log = Arc::clone(&log);
    queue.execute_with_timeout(
        TaskId::Custom("populate"),
        TaskType::UserFacing,
        async move {
            task_log.lock().unwrap().push("populate");
        },
        async move {
            timeout_log.lock().unwrap().push("populate_timeout");
        },
        Duration::from_secs(1),
    );
    queue.wait_idle().await;
    assert_eq!(*log.lock().unwrap(), vec!["invalidate"]);

    tokio::time::sleep(Duration::from_secs(2)).await;
    queue.wait_idle().await;
    assert_eq!(*log.lock().unwrap(), vec!["invalidate", "populate_timeout"]);
    assert_eq!(queue.timed_out(), 1);

    // Releasing the held task must not run it a second time.
    push(&queue, &log, TaskType::HeadReset, "reset");
    queue.wait_idle().await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["invalidate", "populate_timeout", "reset"]
    );
    // initialize, invalidate, timeout task, reset
    assert_eq!(queue.executed(), 4);
}
