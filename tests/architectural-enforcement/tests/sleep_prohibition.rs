//! Integration Test: Sleep Prohibition
//!
//! **Policy**: Production code MUST NOT call sleep methods. Relay threads
//! block on channel operations and condition variables, never on timers.
//! **Exceptions**: test code

use architectural_enforcement::{report, scan};

/// Test that production code does not contain sleep() calls
#[test]
fn test_no_sleep_in_production_code() {
    let violations = scan(is_sleep_call);

    report(
        "CRITICAL: Sleep calls found in production code!",
        &[
            "❌ FORBIDDEN: sleeping to wait for a value, a closure or a thread",
            "✅ INSTEAD: block on Receiver::recv, Condvar::wait or TaskGroup::wait",
        ],
        &violations,
    );
}

fn is_sleep_call(code: &str) -> bool {
    code.contains("::sleep(") || code.contains(".sleep(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sleep_violation_detection() {
        assert!(is_sleep_call("    std::thread::sleep(Duration::from_millis(10));"));
        assert!(is_sleep_call("    tokio::time::sleep(delay).await;"));
        assert!(!is_sleep_call("    self.ready.wait(&mut closed);"));
    }
}
