//! Whitespace normalization for extracted page text.

/// Collapse every run of whitespace (tabs and newlines included) into a single
/// space and trim both ends.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Join page texts with newlines, the way a section's pages are concatenated
/// before cleaning and chunking.
pub fn join_pages<'a, I>(pages: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    pages.into_iter().collect::<Vec<_>>().join("\n")
}
