//! Deterministic cleanup that turns raw model output into one summary voice.
//!
//! `normalize` is idempotent: every rewrite below either shrinks the text or produces a form the
//! same rewrite leaves alone, and the scrub pass runs to a fixed point.

use regex::Regex;
use std::sync::LazyLock;

/// Lead-ins a summary must open with. The first one is the default.
pub const CANONICAL_LEAD_INS: [&str; 4] = [
    "This article discusses",
    "This article explores",
    "This article explains",
    "This article describes",
];

pub const BOILERPLATE_PHRASES: [&str; 5] = [
    "This summary",
    "In conclusion",
    "To summarize",
    "Note:",
    "Remember:",
];

/// Signature-style separator runs (`____`, `--`, `===`).
static SEPARATOR_RUN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[_\-=]{2,}").expect("static regex"));

/// Compiled form of a lead-in/boilerplate policy.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    lead_ins: Vec<String>,
    boilerplate: Option<Regex>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(&CANONICAL_LEAD_INS, &BOILERPLATE_PHRASES)
    }
}

impl TextNormalizer {
    /// `lead_ins[0]` is prepended when the text opens with none of them. Lead-ins must be
    /// non-empty ASCII phrases without periods.
    pub fn new(lead_ins: &[&str], boilerplate: &[&str]) -> Self {
        let alts: Vec<String> = boilerplate
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(regex::escape)
            .collect();
        let boilerplate = if alts.is_empty() {
            None
        } else {
            Regex::new(&format!(r"(?i)\b(?:{})", alts.join("|"))).ok()
        };
        Self {
            lead_ins: lead_ins
                .iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            boilerplate,
        }
    }

    pub fn normalize(&self, raw: &str) -> String {
        let s = self.scrub(raw);
        if s.is_empty() {
            return s;
        }
        let s = self.with_lead_in(&s);
        repair_sentences(&s)
    }

    fn scrub(&self, raw: &str) -> String {
        let mut cur = raw.to_string();
        loop {
            let mut next = collapse_ws(&cur);
            next = dedup_punct(&next);
            if let Some(re) = &self.boilerplate {
                next = re.replace_all(&next, "").into_owned();
            }
            next = SEPARATOR_RUN.replace_all(&next, " ").into_owned();
            next = collapse_ws(&next);
            next = next
                .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':'))
                .to_string();
            if next == cur {
                return next;
            }
            cur = next;
        }
    }

    fn with_lead_in(&self, s: &str) -> String {
        for lead in &self.lead_ins {
            if let Some(prefix) = s.get(..lead.len()) {
                if prefix.eq_ignore_ascii_case(lead) {
                    return format!("{lead}{}", &s[lead.len()..]);
                }
            }
        }
        let Some(default) = self.lead_ins.first() else {
            return s.to_string();
        };
        let mut chars = s.chars();
        let Some(first) = chars.next() else {
            return s.to_string();
        };
        let mut out = String::with_capacity(default.len() + s.len() + 1);
        out.push_str(default);
        out.push(' ');
        out.extend(first.to_lowercase());
        out.push_str(chars.as_str());
        out
    }
}

/// Free-function form with an explicit policy.
pub fn normalize(raw: &str, lead_ins: &[&str], boilerplate: &[&str]) -> String {
    TextNormalizer::new(lead_ins, boilerplate).normalize(raw)
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn dedup_punct(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev: Option<char> = None;
    for ch in s.chars() {
        if prev == Some(ch) && matches!(ch, ',' | ';' | ':' | '!' | '?') {
            continue;
        }
        out.push(ch);
        prev = Some(ch);
    }
    out
}

/// Split on sentence-terminating periods and rejoin as `A. B. C.`
///
/// A period is terminating unless it sits between two alphanumerics, so "3.5" and "example.com"
/// stay intact while "..", "...Then", ". ." collapse.
fn repair_sentences(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut fragments: Vec<String> = Vec::new();
    let mut cur = String::new();
    for (i, &ch) in chars.iter().enumerate() {
        let inner = i
            .checked_sub(1)
            .and_then(|p| chars.get(p))
            .is_some_and(|prev| prev.is_alphanumeric())
            && chars.get(i + 1).is_some_and(|next| next.is_alphanumeric());
        let terminating = ch == '.' && !inner;
        if terminating {
            fragments.push(std::mem::take(&mut cur));
        } else {
            cur.push(ch);
        }
    }
    fragments.push(cur);

    let mut cleaned: Vec<&str> = fragments
        .iter()
        .map(|f| f.trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':')))
        .filter(|f| !f.is_empty())
        .collect();
    // The closing fragment takes the period, so it may not keep its own terminator.
    while let Some(&last) = cleaned.last() {
        let trimmed = last.trim_end_matches(|c: char| {
            c.is_whitespace() || matches!(c, ',' | ';' | ':' | '!' | '?')
        });
        cleaned.pop();
        if !trimmed.is_empty() {
            cleaned.push(trimmed);
            break;
        }
    }
    if cleaned.is_empty() {
        return String::new();
    }

    let mut out = String::new();
    let n = cleaned.len();
    for (i, f) in cleaned.into_iter().enumerate() {
        out.push_str(f);
        if i + 1 == n {
            out.push('.');
        } else if f.ends_with(['!', '?']) {
            out.push(' ');
        } else {
            out.push_str(". ");
        }
    }
    out
}
