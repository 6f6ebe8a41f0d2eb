// Wildcard patterns used by every bulk selection (get/del on commands, del on history)
use regex::Regex;

/// Compiled `*` glob. Every other character is literal, matching is anchored
/// at both ends and case-sensitive.
pub struct Wildcard {
    regex: Regex,
}

impl Wildcard {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^(?s:{body})$"))?;
        Ok(Self { regex })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// One-shot form of [`Wildcard::matches`]. A pattern too large to compile
/// matches nothing.
pub fn matches(text: &str, pattern: &str) -> bool {
    Wildcard::new(pattern).is_ok_and(|w| w.matches(text))
}

/// True when `text` matches at least one of `patterns`.
pub fn matches_any(text: &str, patterns: &[Wildcard]) -> bool {
    patterns.iter().any(|p| p.matches(text))
}

pub fn compile_all<S: AsRef<str>>(patterns: &[S]) -> Vec<Wildcard> {
    patterns
        .iter()
        .map(|p| p.as_ref())
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| Wildcard::new(p).ok())
        .collect()
}
