//! Integration Test: Lock Policy
//!
//! **Policy**: Locks and condition variables come from `parking_lot`. The
//! std versions poison on panic, which would turn a panicking task into an
//! `unwrap()` at every later lock site.

use architectural_enforcement::{report, scan};

const STD_LOCKS: &[&str] = &["Mutex", "RwLock", "Condvar"];

/// Test that production code does not use std::sync locks
#[test]
fn test_no_std_locks_in_production_code() {
    let violations = scan(uses_std_lock);

    report(
        "std::sync locks found in production code!",
        &["✅ INSTEAD: parking_lot::{Mutex, RwLock, Condvar}"],
        &violations,
    );
}

fn uses_std_lock(code: &str) -> bool {
    code.contains("std::sync") && STD_LOCKS.iter().any(|lock| code.contains(lock))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_std_lock_detection() {
        assert!(uses_std_lock("use std::sync::Mutex;"));
        assert!(uses_std_lock("use std::sync::{Arc, RwLock};"));
        assert!(!uses_std_lock("use std::sync::Arc;"));
        assert!(!uses_std_lock("use parking_lot::{Condvar, Mutex};"));
    }
}
