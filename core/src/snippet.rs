//! Highlighted excerpts around query matches.
use regex::{Regex, RegexBuilder};

use crate::config::SearchSettings;

pub const ELLIPSIS: &str = "...";
const OPEN: &str = "<b>";
const CLOSE: &str = "</b>";

#[derive(Debug, Clone, Copy)]
pub struct SnippetOptions {
    pub half_window: usize,
    pub max_fragments: usize,
    pub max_len: usize,
}

impl From<&SearchSettings> for SnippetOptions {
    fn from(s: &SearchSettings) -> Self {
        Self { half_window: s.snippet_half_window, max_fragments: s.snippet_max_fragments, max_len: s.snippet_max_len }
    }
}

impl Default for SnippetOptions {
    fn default() -> Self {
        (&SearchSettings::default()).into()
    }
}

/// Terms to highlight: the lemmas plus the raw query words longer than one
/// character, lowercased and without surrounding punctuation.
pub fn query_terms(lemmas: &[String], query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    let raw = query
        .to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .collect::<Vec<_>>();
    for t in lemmas.iter().map(|l| l.trim().to_lowercase()).chain(raw) {
        if t.chars().count() > 1 && !terms.contains(&t) {
            terms.push(t);
        }
    }
    terms
}

/// One case-insensitive whole-word alternation over all terms, longest first.
pub fn term_pattern(terms: &[String]) -> Option<Regex> {
    if terms.is_empty() {
        return None;
    }
    let mut escaped: Vec<String> = terms.iter().map(|t| regex::escape(t)).collect();
    escaped.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    RegexBuilder::new(&format!(r"\b(?:{})\b", escaped.join("|")))
        .case_insensitive(true)
        .build()
        .ok()
}

/// Byte offset `n` characters before `idx`, clipped to the start.
fn back_chars(text: &str, idx: usize, n: usize) -> usize {
    text[..idx].char_indices().rev().take(n).last().map_or(idx, |(i, _)| i)
}

/// Byte offset `n` characters after `idx`, clipped to the end.
fn forward_chars(text: &str, idx: usize, n: usize) -> usize {
    text[idx..].char_indices().nth(n).map_or(text.len(), |(i, _)| idx + i)
}

fn merge_windows(mut windows: Vec<(usize, usize)>) -> Vec<(usize, usize)> {
    windows.sort_unstable();
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(windows.len());
    for (start, end) in windows {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

/// First `max` visible characters of highlighted text; markers are not counted
/// and a marker left open by the cut is closed.
fn truncate_highlighted(s: &str, max: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max * 2));
    let mut visible = 0;
    let mut open = false;
    let mut rest = s;
    while let Some(c) = rest.chars().next() {
        if rest.starts_with(OPEN) {
            open = true;
            out.push_str(OPEN);
            rest = &rest[OPEN.len()..];
            continue;
        }
        if rest.starts_with(CLOSE) {
            open = false;
            out.push_str(CLOSE);
            rest = &rest[CLOSE.len()..];
            continue;
        }
        if visible == max {
            if open {
                out.push_str(CLOSE);
            }
            out.push_str(ELLIPSIS);
            return out;
        }
        out.push(c);
        visible += 1;
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn shorten(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Build a snippet from plain text. Without a match the start of the text is used.
pub fn build_snippet(text: &str, pattern: Option<&Regex>, opts: &SnippetOptions) -> String {
    let Some(pattern) = pattern else {
        return shorten(text, opts.half_window * 2);
    };
    let windows: Vec<(usize, usize)> = pattern
        .find_iter(text)
        .map(|m| {
            (back_chars(text, m.start(), opts.half_window), forward_chars(text, m.end(), opts.half_window))
        })
        .collect();
    if windows.is_empty() {
        return shorten(text, opts.half_window * 2);
    }

    let fragments: Vec<(usize, usize)> = merge_windows(windows).into_iter().take(opts.max_fragments.max(1)).collect();
    let mut joined = String::new();
    for (i, &(start, end)) in fragments.iter().enumerate() {
        if i == 0 && start > 0 {
            joined.push_str(ELLIPSIS);
            joined.push(' ');
        }
        if i > 0 {
            joined.push(' ');
            joined.push_str(ELLIPSIS);
            joined.push(' ');
        }
        joined.push_str(text[start..end].trim());
    }
    if fragments.last().map_or(false, |&(_, end)| end < text.len()) {
        joined.push(' ');
        joined.push_str(ELLIPSIS);
    }

    let highlighted = pattern.replace_all(&joined, |caps: &regex::Captures| format!("{OPEN}{}{CLOSE}", &caps[0]));
    truncate_highlighted(&highlighted, opts.max_len)
}
