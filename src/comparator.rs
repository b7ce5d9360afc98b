/// Outcome of comparing one test case's output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Passed,
    Failed,
}

/// Strips surrounding whitespace and folds `\r\n` and lone `\r` into `\n`.
///
/// Whitespace inside a line is left untouched.
pub fn normalize(output: &str) -> String {
    output.trim().replace("\r\n", "\n").replace('\r', "\n")
}

/// Exact comparison after normalizing both sides.
pub fn compare(actual: &str, expected: &str) -> Comparison {
    if normalize(actual) == normalize(expected) {
        Comparison::Passed
    } else {
        Comparison::Failed
    }
}
