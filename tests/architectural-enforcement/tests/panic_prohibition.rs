//! Integration Test: Panic Prohibition
//!
//! **Policy**: Production code propagates errors with `?` or handles them.
//! `unwrap()` and `expect()` are only allowed in test code.

use architectural_enforcement::{report, scan};

/// Test that production code does not unwrap
#[test]
fn test_no_unwrap_in_production_code() {
    let violations = scan(is_panicking_call);

    report(
        "CRITICAL: unwrap()/expect() found in production code!",
        &[
            "✅ INSTEAD: return a Result, use unwrap_or/unwrap_or_else, or log and continue",
        ],
        &violations,
    );
}

fn is_panicking_call(code: &str) -> bool {
    code.contains(".unwrap()") || code.contains(".expect(")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_detection() {
        assert!(is_panicking_call("let x = y.unwrap();"));
        assert!(is_panicking_call("let x = y.expect(\"present\");"));
        assert!(!is_panicking_call("let x = y.unwrap_or_else(|| z);"));
        assert!(!is_panicking_call("let x = y.unwrap_or(0);"));
    }
}
