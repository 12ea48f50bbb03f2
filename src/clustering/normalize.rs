// Text cleanup applied to every feedback string before it is embedded.

/// Lowercase the text and collapse every whitespace run (spaces, tabs,
/// newlines) into a single space, trimming both ends.
///
/// Never fails; empty input gives an empty string.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}
