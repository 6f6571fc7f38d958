//! Tracing instrumentation for the agent.
//!
//! Helper functions for the spans the reconciler attaches to its work. The
//! agent emits plain `tracing` events inline; these helpers only cover the
//! spans that group them.

use tracing::{info_span, Span};

/// Span covering one full reconciliation pass.
#[must_use]
pub fn reconcile_span(reactor: &str) -> Span {
    info_span!("agent.reconcile", reactor = %reactor)
}

/// Span covering one supervisor command dispatch.
///
/// # Arguments
/// * `job_id` - The job whose supervisor is commanded
/// * `op` - The dispatched operation (`start`, `stop`, `close`)
#[must_use]
pub fn supervisor_op_span(job_id: impl AsRef<str>, op: &str) -> Span {
    info_span!(
        "agent.supervisor_op",
        job_id = %job_id.as_ref(),
        op = %op,
    )
}

/// Span covering port allocation for one job.
#[must_use]
pub fn port_allocation_span(job_id: impl AsRef<str>) -> Span {
    info_span!("agent.allocate_ports", job_id = %job_id.as_ref())
}
