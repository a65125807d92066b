//! Contract Test: Change-Triggered Publishing
//!
//! This test verifies when the publisher runs.
//!
//! Constraints verified:
//! - The first tick always publishes, even an aggregate of 0
//! - Repeated identical aggregates publish exactly once
//! - A failed publish leaves the last published total untouched and is
//!   retried on the next tick while the aggregate still differs
//! - Comparison is against the last *successful* publish
//!
//! If this test fails, the widget is rewritten too often or goes stale.

mod common;

use common::*;
use tally_core::cache::CachePolicy;
use tally_core::orchestrator::OrchestratorEvent;
use tokio::time::Duration;

#[tokio::test(start_paused = true)]
async fn first_tick_publishes_zero() {
    let (mut orchestrator, publisher, _events) = orchestrator(
        vec![descriptor("twitch", 1_000, ScriptedSource::failing("offline"))],
        test_config(CachePolicy::HoldLastSuccess),
    );

    assert_eq!(orchestrator.last_published(), None);

    let report = orchestrator.tick().await;
    assert_eq!(report.aggregate, 0);
    assert_eq!(report.published, Some(0));
    assert_eq!(orchestrator.last_published(), Some(0));
    assert_eq!(publisher.published(), vec![0]);
}

#[tokio::test(start_paused = true)]
async fn identical_aggregates_publish_once() {
    let (mut orchestrator, publisher, mut events) = orchestrator(
        vec![
            descriptor("twitch", 1_000, ScriptedSource::constant(3)),
            descriptor("patreon", 2_000, ScriptedSource::constant(5)),
        ],
        test_config(CachePolicy::HoldLastSuccess),
    );

    for _ in 0..10 {
        let report = orchestrator.tick().await;
        tokio::time::advance(report.next_delay).await;
    }

    assert_eq!(publisher.attempts(), vec![8]);

    let published: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, OrchestratorEvent::Published { .. }))
        .collect();
    assert_eq!(
        published,
        vec![OrchestratorEvent::Published {
            total: 8,
            previous: None
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_publish_is_retried_next_tick() {
    let (mut orchestrator, publisher, mut events) = orchestrator(
        vec![descriptor("twitch", 1_000, ScriptedSource::constant(10))],
        test_config(CachePolicy::HoldLastSuccess),
    );

    publisher.set_failing(true);
    let first = orchestrator.tick().await;
    assert_eq!(first.published, None);
    assert_eq!(first.publish_error.as_deref(), Some("Publish error: disk full"));
    assert_eq!(orchestrator.last_published(), None);

    publisher.set_failing(false);
    tokio::time::advance(Duration::from_millis(1_000)).await;

    let second = orchestrator.tick().await;
    assert_eq!(second.published, Some(10));
    assert_eq!(orchestrator.last_published(), Some(10));
    assert_eq!(publisher.attempts(), vec![10, 10]);
    assert_eq!(publisher.published(), vec![10]);

    let events = drain(&mut events);
    assert!(events.contains(&OrchestratorEvent::PublishFailed {
        total: 10,
        error: "Publish error: disk full".to_string(),
    }));
}

#[tokio::test(start_paused = true)]
async fn comparison_uses_last_successful_publish() {
    let (mut orchestrator, publisher, _events) = orchestrator(
        vec![descriptor(
            "twitch",
            1_000,
            ScriptedSource::new([Ok(10), Ok(11), Ok(10)]),
        )],
        test_config(CachePolicy::HoldLastSuccess),
    );

    orchestrator.tick().await;
    assert_eq!(orchestrator.last_published(), Some(10));

    // 11 fails to publish, so 10 stays the last published total.
    publisher.set_failing(true);
    tokio::time::advance(Duration::from_millis(1_000)).await;
    let second = orchestrator.tick().await;
    assert_eq!(second.aggregate, 11);
    assert_eq!(orchestrator.last_published(), Some(10));

    // Back at 10: nothing to publish.
    publisher.set_failing(false);
    tokio::time::advance(Duration::from_millis(1_000)).await;
    let third = orchestrator.tick().await;
    assert_eq!(third.aggregate, 10);
    assert_eq!(third.published, None);

    assert_eq!(publisher.attempts(), vec![10, 11]);
    assert_eq!(publisher.published(), vec![10]);
}
