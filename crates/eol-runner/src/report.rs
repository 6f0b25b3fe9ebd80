//! Operator-facing text report

use std::fmt::Write;

use crate::result::{ObservedValue, RunPhase, RunReport};

/// Render a run as the line-oriented report kept with each tested unit:
///
/// ```text
/// Key Switch (digital) - PASS
///   Key On: 1 -> PASS
/// Throttle (analog) - FAIL
///   Throttle Sweep: 2.30 -> FAIL (1 step(s) outside ±0.10 V)
///
/// Tests completed: 1/2 passed
/// ```
pub fn render_text_report(report: &RunReport) -> String {
    let mut out = String::new();
    for signal in &report.signals {
        let _ = writeln!(out, "{} ({}) - {}", signal.name, signal.category, signal.status);
        for test in &signal.tests {
            let value = test
                .value
                .as_ref()
                .map(ObservedValue::to_string)
                .unwrap_or_else(|| "None".to_string());
            let _ = write!(out, "  {}: {} -> {}", test.test_name, value, test.status());
            if let Some(error) = &test.error {
                let _ = write!(out, " ({})", error);
            }
            out.push('\n');
        }
    }

    out.push('\n');
    if report.phase == RunPhase::Aborted {
        if let Some(reason) = report.abort_reason {
            let _ = writeln!(out, "Run aborted: {}", reason);
        }
    }
    let _ = writeln!(
        out,
        "Tests completed: {}/{} passed",
        report.passed_count(),
        report.total()
    );
    out
}
