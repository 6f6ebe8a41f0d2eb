/// Removes matching outer `'` or `"` pairs until the text is no longer
/// fully wrapped. Mismatched or inner quotes are left alone.
pub fn strip_quotes(text: &str) -> &str {
    let mut current = text;
    loop {
        let mut chars = current.chars();
        match (chars.next(), chars.next_back()) {
            (Some(first), Some(last)) if first == last && (first == '\'' || first == '"') => {
                current = chars.as_str();
            }
            _ => return current,
        }
    }
}
