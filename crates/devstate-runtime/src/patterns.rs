/// Output fragments that mark a command as failed even when it exits 0.
///
/// Matching is case-insensitive and substring based. More specific fragments
/// come first so the reported pattern is the most descriptive one.
pub const ERROR_PATTERNS: &[&str] = &[
    "connection refused",
    "no such file",
    "not found",
    "failed",
    "fail",
    "unable",
    "error",
];

/// Return the first error pattern contained in `output`, if any.
pub fn find_error_pattern(output: &str) -> Option<&'static str> {
    let lower = output.to_lowercase();
    ERROR_PATTERNS.iter().copied().find(|p| lower.contains(p))
}
