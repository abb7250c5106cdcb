//! Optional wall-clock accounting of the two hot spots: Jacobian assembly
//! and the banded/dense linear solves. Compiled away without the `timing`
//! feature.

#![allow(unused)]

use std::cell::RefCell;
use std::time::Duration;

#[derive(Default, Clone)]
pub struct TimingStats {
    pub jacobian: Vec<Duration>,
    pub linear_solve: Vec<Duration>,
}

#[cfg(feature = "timing")]
thread_local! {
    static TIMING: RefCell<TimingStats> = RefCell::new(TimingStats::default());
}

#[cfg(feature = "timing")]
pub fn reset_timing() {
    TIMING.with(|t| *t.borrow_mut() = TimingStats::default());
}

#[cfg(not(feature = "timing"))]
pub fn reset_timing() {}

#[cfg(feature = "timing")]
pub fn record_jacobian<F: FnOnce() -> R, R>(f: F) -> R {
    let start = std::time::Instant::now();
    let out = f();
    TIMING.with(|t| t.borrow_mut().jacobian.push(start.elapsed()));
    out
}

#[cfg(not(feature = "timing"))]
pub fn record_jacobian<F: FnOnce() -> R, R>(f: F) -> R {
    f()
}

#[cfg(feature = "timing")]
pub fn record_linear_solve<F: FnOnce() -> R, R>(f: F) -> R {
    let start = std::time::Instant::now();
    let out = f();
    TIMING.with(|t| t.borrow_mut().linear_solve.push(start.elapsed()));
    out
}

#[cfg(not(feature = "timing"))]
pub fn record_linear_solve<F: FnOnce() -> R, R>(f: F) -> R {
    f()
}

/// Emit the accumulated totals through `tracing` and reset.
#[cfg(feature = "timing")]
pub fn report() {
    TIMING.with(|t| {
        let stats = t.borrow();
        let jac: Duration = stats.jacobian.iter().sum();
        let lin: Duration = stats.linear_solve.iter().sum();
        tracing::debug!(
            jacobian_ms = jac.as_secs_f64() * 1e3,
            jacobian_calls = stats.jacobian.len(),
            linear_ms = lin.as_secs_f64() * 1e3,
            linear_calls = stats.linear_solve.len(),
            "solver timing"
        );
    });
    reset_timing();
}

#[cfg(not(feature = "timing"))]
pub fn report() {}
