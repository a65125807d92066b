//! Single source call with failure containment
//!
//! Every call the orchestrator makes goes through [`poll_source`], which
//! turns all three ways a source can misbehave into a plain
//! [`Outcome::Failure`]:
//!
//! - returning `Err` → the error text
//! - panicking → caught with `catch_unwind`, the panic message
//! - never settling → bounded by the poll timeout, if one is configured

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::time::{Duration, Instant};

use super::SourceDescriptor;
use crate::cache::Outcome;

/// Result of one dispatched call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PollResult {
    pub outcome: Outcome,
    pub elapsed: Duration,
}

/// Call a source once, converting every failure mode into an outcome
pub(crate) async fn poll_source(
    descriptor: &SourceDescriptor,
    poll_timeout: Option<Duration>,
) -> PollResult {
    let started = Instant::now();
    let call = AssertUnwindSafe(descriptor.source.get()).catch_unwind();

    let settled = match poll_timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(settled) => settled,
            Err(_) => {
                return PollResult {
                    outcome: Outcome::Failure(format!(
                        "{} did not respond within {}ms",
                        descriptor.source.source_kind(),
                        limit.as_millis()
                    )),
                    elapsed: started.elapsed(),
                };
            }
        },
        None => call.await,
    };

    let outcome = match settled {
        Ok(Ok(count)) => Outcome::Success(count),
        Ok(Err(e)) => Outcome::Failure(e.to_string()),
        Err(panic) => Outcome::Failure(format!(
            "{} panicked: {}",
            descriptor.source.source_kind(),
            panic_message(panic.as_ref())
        )),
    };

    PollResult {
        outcome,
        elapsed: started.elapsed(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}
