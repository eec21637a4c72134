
use api_job_queue::*;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use test_helpers::*;

fn job_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn test_enqueue_requires_login() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();

    let result = queue.enqueue(ScriptedJob::ok("early", &log));

    assert!(matches!(result, Err(QueueError::NotLoggedIn)));
    assert!(queue.queue(Lane::Main).is_empty());
}

#[tokio::test]
async fn test_equal_priority_runs_in_enqueue_order() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let receivers: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|name| queue.enqueue(ScriptedJob::ok(name, &log)).unwrap())
        .collect();
    for receiver in receivers {
        assert!(outcome(receiver).await.is_success());
    }

    assert_eq!(calls(&log), job_names(&["a", "b", "c", "d"]));
}

#[tokio::test]
async fn test_lower_priority_value_runs_first() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.pause_queues().unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    let a = queue
        .enqueue(ScriptedJob::ok("A", &log).with_priority(JobPriority::UPDATE))
        .unwrap();
    let b = queue
        .enqueue(ScriptedJob::ok("B", &log).with_priority(JobPriority::SEND_REPLY))
        .unwrap();
    let c = queue
        .enqueue(ScriptedJob::ok("C", &log).with_priority(JobPriority::UPDATE))
        .unwrap();
    queue.resume_queues();

    for receiver in [a, b, c] {
        outcome(receiver).await;
    }
    assert_eq!(calls(&log), job_names(&["B", "A", "C"]));
}

#[tokio::test]
async fn test_concurrent_producers_get_unique_order_numbers() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let receivers = Mutex::new(Vec::new());
    let numbers = Mutex::new(Vec::new());
    std::thread::scope(|scope| {
        for producer in 0..4 {
            let (queue, log, receivers, numbers) = (&queue, &log, &receivers, &numbers);
            scope.spawn(move || {
                for n in 0..25 {
                    let call = ScriptedJob::ok(&format!("{}-{}", producer, n), log);
                    let (job, receiver) = ApiJob::new(call, 5);
                    numbers.lock().unwrap().push(queue.enqueue_job(job).unwrap());
                    receivers.lock().unwrap().push(receiver);
                }
            });
        }
    });

    let mut numbers = numbers.into_inner().unwrap();
    numbers.sort_unstable();
    assert_eq!(numbers, (0..100).collect::<Vec<u64>>());

    for receiver in receivers.into_inner().unwrap() {
        assert!(outcome(receiver).await.is_success());
    }
    assert_eq!(calls(&log).len(), 100);
}

#[tokio::test]
async fn test_failed_job_does_not_block_the_next() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let failing = queue
        .enqueue(ScriptedJob::scripted("reply", &log, vec![Step::Fail("reply rejected")]))
        .unwrap();
    let next = queue.enqueue(ScriptedJob::ok("star", &log)).unwrap();

    let err = outcome(failing).await.into_result().unwrap_err();
    assert_eq!(err.to_string(), "reply rejected");
    assert_eq!(outcome(next).await.into_result().unwrap(), "star");
    assert_eq!(calls(&log), job_names(&["reply", "star"]));
}

#[tokio::test]
async fn test_timeouts_then_success_within_budget() {
    let config = QueueConfig::builder().with_default_attempts(3).build();
    let queue = new_queue(config);
    let log = CallLog::default();
    let mut events = queue.subscribe();
    queue.login(FakeClient::new("token"));

    let receiver = queue
        .enqueue(ScriptedJob::scripted(
            "sync",
            &log,
            vec![Step::Timeout, Step::Timeout, Step::Ok],
        ))
        .unwrap();

    assert_eq!(outcome(receiver).await.into_result().unwrap(), "sync");
    assert_eq!(calls(&log).len(), 3);
    assert!(!queue.queue(Lane::Main).is_paused());
    assert!(!drain_events(&mut events).contains(&"queue:pause_requested"));
}

#[tokio::test]
async fn test_pause_then_resume_keeps_order() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    queue.pause_queues().unwrap();
    let first = queue.enqueue(ScriptedJob::ok("first", &log)).unwrap();
    let second = queue.enqueue(ScriptedJob::ok("second", &log)).unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    assert!(calls(&log).is_empty());
    assert_eq!(queue.queue(Lane::Main).pending(), 2);

    queue.resume_queues();
    outcome(first).await;
    outcome(second).await;
    assert_eq!(calls(&log), job_names(&["first", "second"]));
}

#[tokio::test]
async fn test_jobs_queued_before_pause_run_in_order_after_resume() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let first = queue.enqueue(ScriptedJob::ok("first", &log)).unwrap();
    let second = queue.enqueue(ScriptedJob::ok("second", &log)).unwrap();
    queue.pause_queues().unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    assert!(calls(&log).is_empty());
    assert_eq!(queue.queue(Lane::Main).pending(), 2);

    queue.resume_queues();
    outcome(first).await;
    outcome(second).await;
    assert_eq!(calls(&log), job_names(&["first", "second"]));
}

#[tokio::test]
async fn test_auth_failure_halts_all_lanes_until_login() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("stale"));
    queue.pause_queues().unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;
    wait_for_state(queue.queue(Lane::Downloads), QueueState::Paused).await;

    let reply = queue
        .enqueue(ScriptedJob::scripted("reply", &log, vec![Step::Auth]))
        .unwrap();
    let star = queue.enqueue(ScriptedJob::ok("star", &log)).unwrap();
    let file = queue
        .enqueue(ScriptedJob::scripted("file", &log, vec![Step::Auth]).on_lane(Lane::Downloads))
        .unwrap();

    let mut events = queue.subscribe();
    queue.resume_queues();
    wait_for_state(queue.queue(Lane::Main), QueueState::SessionInvalid).await;
    wait_for_state(queue.queue(Lane::Downloads), QueueState::SessionInvalid).await;

    assert!(!queue.monitor().is_active());
    assert_eq!(queue.queue(Lane::Main).pending(), 2);
    assert_eq!(queue.queue(Lane::Downloads).pending(), 1);
    assert!(!calls(&log).contains(&"star".to_string()));
    let lost = drain_events(&mut events)
        .into_iter()
        .filter(|name| *name == "queue:session_lost")
        .count();
    assert_eq!(lost, 1);

    queue.login(FakeClient::new("fresh"));
    assert_eq!(outcome(reply).await.into_result().unwrap(), "reply");
    assert_eq!(outcome(star).await.into_result().unwrap(), "star");
    assert_eq!(outcome(file).await.into_result().unwrap(), "file");
    assert!(queue.monitor().is_active());

    let main_calls: Vec<String> = calls(&log)
        .into_iter()
        .filter(|name| name != "file")
        .collect();
    assert_eq!(main_calls, job_names(&["reply", "reply", "star"]));
}

#[tokio::test]
async fn test_logout_halts_next_dispatch() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.pause_queues().unwrap();
    let receiver = queue.enqueue(ScriptedJob::ok("reply", &log)).unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    queue.logout();
    queue.resume_queues();
    wait_for_state(queue.queue(Lane::Main), QueueState::SessionInvalid).await;
    assert!(calls(&log).is_empty());
    assert_eq!(queue.queue(Lane::Main).pending(), 1);

    queue.login(FakeClient::new("again"));
    assert!(outcome(receiver).await.is_success());
}

#[tokio::test]
async fn test_downloads_run_while_main_lane_paused() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.pause_queues().unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;
    wait_for_state(queue.queue(Lane::Downloads), QueueState::Paused).await;

    let reply = queue.enqueue(ScriptedJob::ok("reply", &log)).unwrap();
    let file = queue
        .enqueue(
            ScriptedJob::ok("file", &log)
                .on_lane(Lane::Downloads)
                .with_priority(JobPriority::DOWNLOAD),
        )
        .unwrap();
    queue.queue(Lane::Downloads).resume();

    assert_eq!(outcome(file).await.into_result().unwrap(), "file");
    assert_eq!(calls(&log), job_names(&["file"]));
    assert_eq!(queue.queue(Lane::Main).pending(), 1);

    queue.resume_queues();
    assert!(outcome(reply).await.is_success());
}

#[tokio::test]
async fn test_exhausted_timeouts_pause_every_lane() {
    let config = QueueConfig::builder().with_default_attempts(3).build();
    let queue = new_queue(config);
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.pause_queues().unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;
    wait_for_state(queue.queue(Lane::Downloads), QueueState::Paused).await;

    let slow = queue
        .enqueue(ScriptedJob::scripted(
            "slow",
            &log,
            vec![Step::Timeout, Step::Timeout, Step::Timeout],
        ))
        .unwrap();
    let after = queue.enqueue(ScriptedJob::ok("after", &log)).unwrap();

    let mut events = queue.subscribe();
    queue.resume_queues();

    let requested = wait_for_event(&mut events, |e| matches!(e, QueueEvent::PauseRequested(_))).await;
    match requested {
        QueueEvent::PauseRequested(request) => {
            assert_eq!(request.lane, Lane::Main);
            assert!(request.job_id.is_some());
        }
        other => panic!("unexpected event {:?}", other),
    }
    wait_for_event(&mut events, |e| matches!(e, QueueEvent::Paused(_))).await;
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;
    wait_for_state(queue.queue(Lane::Downloads), QueueState::Paused).await;

    assert_eq!(calls(&log), job_names(&["slow", "slow", "slow"]));
    assert_eq!(queue.queue(Lane::Main).pending(), 2);
    assert!(queue.monitor().is_active());

    queue.resume_queues();
    assert_eq!(outcome(slow).await.into_result().unwrap(), "slow");
    assert!(outcome(after).await.is_success());
    assert_eq!(
        calls(&log),
        job_names(&["slow", "slow", "slow", "slow", "after"])
    );
}

#[tokio::test]
async fn test_exhausted_timeouts_pause_urgent_tier_job() {
    let config = QueueConfig::builder().with_default_attempts(1).build();
    let queue = new_queue(config);
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    let mut events = queue.subscribe();

    let urgent = queue
        .enqueue(
            ScriptedJob::scripted("invalidate", &log, vec![Step::Timeout, Step::Timeout])
                .with_priority(JobPriority::TOKEN_INVALIDATION),
        )
        .unwrap();

    for attempts in 1..=2 {
        wait_for_event(&mut events, |e| matches!(e, QueueEvent::PauseRequested(_))).await;
        let main = queue.queue(Lane::Main);
        assert!(main.is_paused());
        assert_eq!(main.state(), QueueState::Paused);
        assert_eq!(main.pending(), 1);
        assert_eq!(calls(&log).len(), attempts);
        queue.resume_queues();
    }

    assert!(outcome(urgent).await.is_success());
    assert_eq!(calls(&log).len(), 3);
    assert!(queue.queue(Lane::Main).is_empty());
}

#[tokio::test]
async fn test_session_open_failure_requeues_and_pauses() {
    let queue = ApiJobQueue::new(QueueConfig::default(), || {
        Err::<(), _>(QueueError::Session("database locked".into()))
    });
    let log = CallLog::default();
    let mut events = queue.subscribe();
    queue.login(FakeClient::new("token"));

    let mut receiver = queue.enqueue(ScriptedJob::ok("reply", &log)).unwrap();
    wait_for_event(&mut events, |e| matches!(e, QueueEvent::PauseRequested(_))).await;
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    assert!(calls(&log).is_empty());
    assert_eq!(queue.queue(Lane::Main).pending(), 1);
    assert!(receiver.try_outcome().unwrap().is_none());
}

#[tokio::test]
async fn test_outcome_marshalled_to_main_loop() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    let (context, mut main_loop) = main_context();
    let seen = Arc::new(Mutex::new(Vec::new()));
    queue.login(FakeClient::new("token"));

    let sink = Arc::clone(&seen);
    let signals = JobSignals::connect(&context, move |outcome: JobOutcome<String>| {
        sink.lock().unwrap().push(outcome.into_result().unwrap());
    });
    queue
        .enqueue_job(ApiJob::with_signals(ScriptedJob::ok("reply", &log), 5, signals))
        .unwrap();

    let ran = tokio::time::timeout(WAIT, main_loop.dispatch_next())
        .await
        .unwrap();
    assert!(ran);
    assert_eq!(*seen.lock().unwrap(), job_names(&["reply"]));
}

#[tokio::test]
async fn test_shutdown_leaves_jobs_queued() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.shutdown();

    let receiver = queue.enqueue(ScriptedJob::ok("later", &log)).unwrap();
    assert!(outcome(receiver).await.is_success());
}

#[tokio::test]
async fn test_shutdown_lets_running_call_finish() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let slow = queue
        .enqueue(ScriptedJob::scripted(
            "slow",
            &log,
            vec![Step::Slow(Duration::from_millis(200))],
        ))
        .unwrap();
    let waiting = queue.enqueue(ScriptedJob::ok("waiting", &log)).unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Dispatching).await;

    queue.shutdown();

    assert_eq!(outcome(slow).await.into_result().unwrap(), "slow");
    assert_eq!(queue.queue(Lane::Main).pending(), 1);

    queue.start_queues();
    assert_eq!(outcome(waiting).await.into_result().unwrap(), "waiting");
    assert_eq!(calls(&log), job_names(&["slow", "waiting"]));
}

#[tokio::test]
async fn test_restart_during_running_call_keeps_one_worker() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));

    let slow = queue
        .enqueue(ScriptedJob::scripted(
            "slow",
            &log,
            vec![Step::Slow(Duration::from_millis(200))],
        ))
        .unwrap();
    let next = queue.enqueue(ScriptedJob::ok("next", &log)).unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Dispatching).await;

    queue.shutdown();
    queue.start_queues();

    assert!(outcome(slow).await.is_success());
    assert!(outcome(next).await.is_success());
    assert_eq!(calls(&log), job_names(&["slow", "next"]));
}

#[tokio::test]
async fn test_dropping_queue_drops_waiting_jobs() {
    let queue = new_queue(QueueConfig::default());
    let log = CallLog::default();
    queue.login(FakeClient::new("token"));
    queue.pause_queues().unwrap();
    let receiver = queue.enqueue(ScriptedJob::ok("never", &log)).unwrap();
    wait_for_state(queue.queue(Lane::Main), QueueState::Paused).await;

    drop(queue);

    let result = tokio::time::timeout(WAIT, receiver).await.unwrap();
    assert!(matches!(result, Err(QueueError::JobDropped)));
    assert!(calls(&log).is_empty());
}

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use async_trait::async_trait;
    use rusqlite::{params, Connection};
    use tempfile::tempdir;

    struct SaveReply {
        uuid: &'static str,
    }

    #[async_trait]
    impl ApiCall<FakeClient, Connection> for SaveReply {
        type Output = i64;

        async fn call_api(
            &self,
            client: &FakeClient,
            session: &mut Connection,
        ) -> Result<i64, ApiError> {
            session
                .execute(
                    "INSERT INTO replies (uuid, token) VALUES (?1, ?2)",
                    params![self.uuid, client.token],
                )
                .map_err(ApiError::other)?;
            Ok(session.last_insert_rowid())
        }
    }

    #[tokio::test]
    async fn test_job_writes_through_its_session() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("client.db");
        Connection::open(&path)
            .unwrap()
            .execute_batch("CREATE TABLE replies (id INTEGER PRIMARY KEY, uuid TEXT, token TEXT);")
            .unwrap();

        let queue = ApiJobQueue::new(QueueConfig::default(), SqliteSessionMaker::new(&path));
        queue.login(FakeClient::new("abc"));

        let first = queue.enqueue(SaveReply { uuid: "r-1" }).unwrap();
        let second = queue.enqueue(SaveReply { uuid: "r-2" }).unwrap();
        assert_eq!(outcome(first).await.into_result().unwrap(), 1);
        assert_eq!(outcome(second).await.into_result().unwrap(), 2);

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM replies WHERE token = 'abc'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_missing_table_fails_job_only() {
        let queue = ApiJobQueue::new(QueueConfig::default(), SqliteSessionMaker::in_memory());
        queue.login(FakeClient::new("abc"));

        let broken = queue.enqueue(SaveReply { uuid: "r-1" }).unwrap();
        assert!(!outcome(broken).await.is_success());
        assert!(queue.monitor().is_active());
    }
}
