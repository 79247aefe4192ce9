//! Diagnostic-based commit gate.
//!
//! The gate is all-or-nothing: if any changed path carries a blocking
//! diagnostic, nothing is committed for the invocation.

use std::path::PathBuf;

use crate::types::{DiagnosticMap, Severity, ValidationLevel};

fn blocks(level: ValidationLevel, severity: Severity) -> bool {
    match level {
        ValidationLevel::None => false,
        ValidationLevel::Error => severity == Severity::Error,
        ValidationLevel::Warning => matches!(severity, Severity::Error | Severity::Warning),
    }
}

/// Changed paths that carry at least one blocking diagnostic, in input order.
pub fn blocking_paths(
    changed: &[PathBuf],
    diagnostics: &DiagnosticMap,
    level: ValidationLevel,
) -> Vec<PathBuf> {
    if level == ValidationLevel::None {
        return Vec::new();
    }
    changed
        .iter()
        .filter(|path| {
            diagnostics
                .get(path.as_path())
                .is_some_and(|list| list.iter().any(|d| blocks(level, d.severity)))
        })
        .cloned()
        .collect()
}

/// Whether the set of changes may be committed right now.
pub fn is_eligible(changed: &[PathBuf], diagnostics: &DiagnosticMap, level: ValidationLevel) -> bool {
    blocking_paths(changed, diagnostics, level).is_empty()
}
