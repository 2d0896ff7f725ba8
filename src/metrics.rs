use tracing::trace;

// Lightweight counters emitted as trace events.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "buildlist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn poll_finished(outcome: &'static str, attempts: u32) {
    trace!(
        target = "buildlist.metrics",
        outcome = outcome,
        attempts = attempts,
        "run_poll_finished"
    );
}

pub fn fallback_used(reason: &'static str) {
    trace!(
        target = "buildlist.metrics",
        reason = reason,
        "recommendation_fallback_inc"
    );
}

pub fn degraded(stage: &'static str) {
    trace!(
        target = "buildlist.metrics",
        stage = stage,
        "degraded_mode_inc"
    );
}
