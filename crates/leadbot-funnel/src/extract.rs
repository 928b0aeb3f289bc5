use regex::Regex;

use crate::definition::AliasRule;

/// First pattern that matches `message` wins. Returns its first
/// participating capture group, or the whole match for patterns without
/// groups.
pub fn match_regex(patterns: &[Regex], message: &str) -> Option<String> {
    patterns.iter().find_map(|re| {
        let caps = re.captures(message)?;
        let m = caps.iter().skip(1).flatten().next().or_else(|| caps.get(0))?;
        non_empty(m.as_str())
    })
}

/// First alias with a phrase contained in `message` or a keyword equal to
/// one of its words. Returns the alias's canonical value.
pub fn match_alias(rules: &[AliasRule], message: &str) -> Option<String> {
    let words: Vec<&str> = words(message).collect();
    rules
        .iter()
        .find(|rule| {
            rule.phrases.iter().any(|p| message.contains(p.as_str()))
                || rule.keywords.iter().any(|k| words.contains(&k.as_str()))
        })
        .map(|rule| rule.canonical.clone())
}

/// Normalize an LLM answer: trimmed, lower-cased, `None` when blank.
pub fn normalize_llm_output(raw: &str) -> Option<String> {
    non_empty(&raw.to_lowercase())
}

/// Whitespace-separated words with surrounding punctuation removed.
fn words(message: &str) -> impl Iterator<Item = &str> {
    message
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| !w.is_empty())
}

fn non_empty(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}
