mod support;

use common::{Elapsed, LaunchOptions, TaskStatus};
use poller::PollState;
use serde_json::json;
use std::time::Duration;
use support::*;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn round_waits_for_every_check() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["A", "B", "C"]));
    for (name, ms) in [("A", 300), ("B", 100), ("C", 500)] {
        fake.set_task(&id(name), vec![started(1, 5)]);
        fake.delay(&id(name), Duration::from_millis(ms));
    }
    let poller = off_page(&fake);
    poller.load().await.unwrap();

    let start = Instant::now();
    let summary = poller.poll_all_task_states(false).await;
    let elapsed = start.elapsed();

    // Checks run side by side: the slowest one bounds the round.
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(900));
    assert_eq!(summary.checked, 3);
    assert_eq!(summary.in_flight, 3);
    assert!(poller
        .jobs()
        .iter()
        .all(|j| j.polled && j.status == TaskStatus::Started));
}

#[tokio::test(start_paused = true)]
async fn terminal_jobs_are_not_checked() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["Done", "Running"]));
    fake.set_task(&id("Done"), vec![completed(1, 10)]);
    fake.set_task(&id("Running"), vec![started(1, 3)]);
    let poller = off_page(&fake);
    poller.load().await.unwrap();
    let before = fake.count("check_task", &id("Done"));

    let summary = poller.poll_all_task_states(false).await;

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(fake.count("check_task", &id("Done")), before);
    assert!(poller.jobs().iter().all(|j| j.polled));
}

#[tokio::test(start_paused = true)]
async fn repeated_rounds_converge() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["A", "B", "C"]));
    fake.set_task(&id("A"), vec![completed(3, 40)]);
    fake.set_task(&id("B"), vec![failed("Traceback: boom")]);
    let poller = off_page(&fake);
    poller.load().await.unwrap();

    let first = poller.jobs();
    for _ in 0..5 {
        poller.poll_all_task_states(true).await;
        assert_eq!(poller.jobs(), first);
    }

    let a = poller.job("A").unwrap();
    assert_eq!(a.status, TaskStatus::Completed);
    assert_eq!(a.execution_time, Elapsed::Seconds(40));
    let b = poller.job("B").unwrap();
    assert_eq!(b.status, TaskStatus::Error);
    assert_eq!(b.last_error.as_deref(), Some("Traceback: boom"));
    assert_eq!(poller.job("C").unwrap().status, TaskStatus::NotStarted);
}

#[tokio::test(start_paused = true)]
async fn failed_check_reads_as_not_started() {
    let fake = FakeServer::new();
    fake.store_jobs(json!([
        {"name": "Gone", "status": "queued", "pendingTime": "4", "executionTime": "--"},
        {"name": "Flaky", "status": "started", "pendingTime": "1", "executionTime": "9"}
    ]));
    fake.set_task(&id("Flaky"), vec![started(1, 10)]);
    let poller = off_page(&fake);
    poller.load_with(false).await.unwrap();

    let gone = poller.job("Gone").unwrap();
    assert_eq!(gone.status, TaskStatus::NotStarted);
    assert_eq!(gone.pending_time, Elapsed::NotApplicable);
    assert_eq!(gone.execution_time, Elapsed::NotApplicable);
    assert_eq!(poller.job("Flaky").unwrap().status, TaskStatus::Started);

    fake.fail("check_task");
    poller.poll_all_task_states(false).await;
    let flaky = poller.job("Flaky").unwrap();
    assert_eq!(flaky.status, TaskStatus::NotStarted);
    assert_eq!(flaky.pending_time.format(), "--");
    assert_eq!(flaky.execution_time.format(), "--");
    assert_eq!(poller.metrics().check_failures(&id("Flaky")), 1);
}

#[tokio::test(start_paused = true)]
async fn nothing_in_flight_means_no_polling() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["A"]));
    fake.set_task(&id("A"), vec![completed(0, 12)]);
    let poller = on_page(&fake);
    poller.load().await.unwrap();

    assert!(!poller.need_to_poll());
    assert_eq!(poller.state(), PollState::Idle);

    let rounds = poller.metrics().rounds();
    poller.ensure_polling();
    poller.wait_until_idle().await;
    assert_eq!(poller.metrics().rounds(), rounds + 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(poller.metrics().rounds(), rounds + 1);
    assert_eq!(poller.state(), PollState::Idle);
}

#[tokio::test(start_paused = true)]
async fn need_to_poll_requires_the_owning_page() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["A"]));
    fake.set_task(&id("A"), vec![queued(1)]);
    let poller = off_page(&fake);
    poller.load().await.unwrap();

    assert_eq!(poller.job("A").unwrap().status, TaskStatus::Queued);
    assert!(!poller.need_to_poll());
    assert_eq!(poller.state(), PollState::Idle);

    poller.context().navigate("/optimizations");
    assert!(poller.need_to_poll());
}

#[tokio::test(start_paused = true)]
async fn launched_job_is_polled_until_completed() {
    let fake = FakeServer::new();
    let poller = on_page(&fake);
    let name = poller.add_job("opt-1", Default::default()).await.unwrap();
    assert_eq!(name, "opt-1");
    assert_eq!(poller.job("opt-1").unwrap().status, TaskStatus::NotStarted);

    let datastore_id = id("opt-1");
    fake.on_launch(
        &datastore_id,
        vec![queued(2), started(2, 10), started(2, 30), completed(2, 47)],
    );

    poller
        .launch("opt-1", &LaunchOptions::default())
        .await
        .unwrap();
    let job = poller.job("opt-1").unwrap();
    assert_eq!(job.status, TaskStatus::Queued);
    assert_eq!(job.pending_time, Elapsed::Seconds(2));
    assert_ne!(poller.state(), PollState::Idle);

    poller.wait_until_idle().await;

    let job = poller.job("opt-1").unwrap();
    assert_eq!(job.status, TaskStatus::Completed);
    assert_eq!(job.execution_time.format(), "00:00:47");
    // One check right after launch, then three polling rounds.
    assert_eq!(fake.count("check_task", &datastore_id), 4);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fake.count("check_task", &datastore_id), 4);
    assert_eq!(poller.metrics().launches(&datastore_id), 1);
}

#[tokio::test(start_paused = true)]
async fn rounds_are_one_interval_apart() {
    let fake = FakeServer::new();
    let poller = on_page(&fake);
    poller.add_job("A", Default::default()).await.unwrap();
    fake.on_launch(&id("A"), vec![started(0, 1)]);

    poller.launch("A", &LaunchOptions::default()).await.unwrap();
    poller.ensure_polling();
    tokio::time::sleep(Duration::from_millis(2500)).await;

    // Launch check, then rounds at 0s, 1s and 2s from a single session.
    assert_eq!(fake.count("check_task", &id("A")), 4);
    assert_eq!(poller.state(), PollState::Scheduled);
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn leaving_the_page_stops_polling() {
    let fake = FakeServer::new();
    let poller = on_page(&fake);
    poller.add_job("A", Default::default()).await.unwrap();
    fake.on_launch(&id("A"), vec![started(0, 1)]);
    poller.launch("A", &LaunchOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(poller.state(), PollState::Scheduled);

    let left_at = Instant::now();
    poller.context().navigate("/projects");
    poller.wait_until_idle().await;
    assert!(left_at.elapsed() < Duration::from_millis(100));

    let checks = fake.count("check_task", &id("A"));
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(fake.count("check_task", &id("A")), checks);
    assert_eq!(poller.state(), PollState::Idle);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_the_session() {
    let fake = FakeServer::new();
    let poller = on_page(&fake);
    poller.add_job("A", Default::default()).await.unwrap();
    fake.on_launch(&id("A"), vec![started(0, 1)]);
    poller.launch("A", &LaunchOptions::default()).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1200)).await;
    poller.stop();
    assert_eq!(poller.state(), PollState::Idle);

    let checks = fake.count("check_task", &id("A"));
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(fake.count("check_task", &id("A")), checks);

    // A later trigger starts a fresh session.
    poller.ensure_polling();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fake.count("check_task", &id("A")), checks + 1);
    poller.stop();
}

#[tokio::test(start_paused = true)]
async fn refresh_resumes_polling_after_load() {
    let fake = FakeServer::new();
    fake.store_jobs(names(&["A"]));
    fake.set_task(&id("A"), vec![queued(1), started(1, 1), completed(1, 2)]);
    let poller = on_page(&fake);

    poller.load().await.unwrap();
    assert_eq!(poller.state(), PollState::Scheduled);

    poller.wait_until_idle().await;
    assert_eq!(poller.job("A").unwrap().status, TaskStatus::Completed);
    assert_eq!(fake.count("check_task", &id("A")), 3);
}
