// Tab completion over reserved words and command names, plus the
// "did you mean" hint for unknown tokens.
use strsim::levenshtein;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The line with its last token completed or extended.
    Line(String),
    /// Nothing to extend; these are the candidates worth listing.
    Candidates(Vec<String>),
}

/// Completes the last space-separated token of `line`. A unique hit replaces
/// it, several hits extend it to their common prefix, otherwise the hits (or
/// every candidate when nothing hits) are returned for listing.
pub fn complete<'a>(line: &str, candidates: impl IntoIterator<Item = &'a str>) -> Completion {
    let mut candidates: Vec<&str> = candidates.into_iter().collect();
    candidates.sort_unstable();
    candidates.dedup();

    let (head, last) = match line.rfind(' ') {
        Some(pos) => line.split_at(pos + 1),
        None => ("", line),
    };
    let hits: Vec<&str> = candidates.iter().copied().filter(|c| c.starts_with(last)).collect();

    match hits.as_slice() {
        [] => Completion::Candidates(candidates.iter().map(|c| c.to_string()).collect()),
        [only] if *only != last => Completion::Line(format!("{head}{only}")),
        [_] => Completion::Candidates(Vec::new()),
        many => {
            let prefix = common_prefix(many);
            if prefix.len() > last.len() {
                Completion::Line(format!("{head}{prefix}"))
            } else {
                Completion::Candidates(many.iter().map(|c| c.to_string()).collect())
            }
        }
    }
}

fn common_prefix<'a>(words: &[&'a str]) -> &'a str {
    let Some((first, rest)) = words.split_first() else {
        return "";
    };
    let mut end = first.len();
    for word in rest {
        end = first
            .char_indices()
            .zip(word.chars())
            .take_while(|((_, a), b)| a == b)
            .map(|((i, a), _)| i + a.len_utf8())
            .last()
            .unwrap_or(0)
            .min(end);
    }
    &first[..end]
}

/// The closest candidate within edit distance 2, if any.
pub fn suggest<'a>(token: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<&'a str> {
    let mut best: Option<(usize, &str)> = None;
    for candidate in candidates {
        let distance = levenshtein(token, candidate);
        if distance == 0 || distance > 2 {
            continue;
        }
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, candidate));
        }
    }
    best.map(|(_, candidate)| candidate)
}
