//! Regex/string-scan feature extraction for the HTTP worker (§4.3 step 4).
//!
//! Deliberately not a DOM parser: the pipeline only needs a handful of
//! scalar signals out of the page, not a navigable tree, so title/h1/anchor
//! extraction and keyword matching are all done with targeted regexes over
//! the decoded body.

use std::collections::HashSet;

use regex::Regex;

use crate::domain::{KeywordRule, KeywordRuleType, KeywordSet};

/// A known parking-host phrase, checked case-insensitively against the raw
/// body. Not exhaustive; covers the common placeholder providers.
const PARKING_PHRASES: &[&str] = &[
    "domain for sale",
    "buy this domain",
    "this domain is for sale",
    "parking page",
    "sedoparking",
    "parkingcrew",
    "hugedomains",
];

/// Saturating log-scale constant tuned so a density of 0.02 maps to ~0.9
/// (§4.3 step 5): `tanh(k * 0.02) = 0.9` solves to `k ≈ 73.6`.
const DENSITY_K: f64 = 73.6;

fn title_regex() -> Regex {
    Regex::new(r"(?is)<title[^>]*>(.*?)</title>").expect("static title regex")
}

fn h1_regex() -> Regex {
    Regex::new(r"(?is)<h1[^>]*>(.*?)</h1>").expect("static h1 regex")
}

fn anchor_regex() -> Regex {
    Regex::new(r#"(?is)<a\s+[^>]*href\s*=\s*["']([^"']*)["'][^>]*>(.*?)</a>"#).expect("static anchor regex")
}

fn tag_strip_regex() -> Regex {
    Regex::new(r"(?is)<[^>]+>").expect("static tag-strip regex")
}

/// One keyword rule with its regex precompiled (for `Regex` rules) so the
/// cost is paid once per batch rather than once per domain.
#[derive(Clone)]
pub struct CompiledRule {
    pub rule: KeywordRule,
    regex: Option<Regex>,
}

pub fn compile_rules(sets: &[KeywordSet]) -> Vec<CompiledRule> {
    sets.iter()
        .flat_map(|set| set.rules.iter().cloned())
        .map(|rule| {
            let regex = match rule.rule_type {
                KeywordRuleType::Regex => {
                    let pattern = if rule.case_sensitive {
                        rule.pattern.clone()
                    } else {
                        format!("(?i){}", rule.pattern)
                    };
                    Regex::new(&pattern).ok()
                }
                KeywordRuleType::Literal => None,
            };
            CompiledRule { rule, regex }
        })
        .collect()
}

/// Extracted, already-classified signals from one HTTP response body.
#[derive(Debug, Default, Clone)]
pub struct ExtractedFeatures {
    pub h1_count: u32,
    pub link_internal_ratio: f64,
    pub primary_lang: Option<String>,
    pub title: Option<String>,
    pub title_keyword_hit: bool,
    pub total_occurrences: u64,
    pub unique_keywords: usize,
    pub matched_keywords: Vec<String>,
    pub parked_confidence: f64,
}

fn strip_tags(body: &str) -> String {
    tag_strip_regex().replace_all(body, " ").to_string()
}

fn count_literal(body: &str, pattern: &str, case_sensitive: bool) -> u32 {
    if pattern.is_empty() {
        return 0;
    }
    if case_sensitive {
        body.matches(pattern).count() as u32
    } else {
        body.to_lowercase().matches(&pattern.to_lowercase()).count() as u32
    }
}

/// Runs every compiled rule against the body, returning total occurrences
/// and the set of distinct rule patterns that matched at least once.
fn match_keywords(body: &str, rules: &[CompiledRule]) -> (u64, HashSet<String>) {
    let mut total = 0u64;
    let mut unique = HashSet::new();
    for compiled in rules {
        let count = match &compiled.regex {
            Some(re) => re.find_iter(body).count() as u32,
            None => count_literal(body, &compiled.rule.pattern, compiled.rule.case_sensitive),
        };
        if count > 0 {
            total += count as u64;
            unique.insert(compiled.rule.pattern.clone());
        }
    }
    (total, unique)
}

/// A short list of common stopwords per language, used as a cheap n-gram
/// style detector: whichever language's stopwords appear most often in the
/// body wins. Only runs when the phase's advanced-lang flag is enabled —
/// the scan touches every word in the body.
fn detect_primary_lang(body: &str) -> Option<String> {
    const STOPWORDS: &[(&str, &[&str])] = &[
        ("en", &["the", "and", "of", "to", "is", "in", "for", "with"]),
        ("es", &["el", "la", "de", "y", "en", "los", "para", "con"]),
        ("fr", &["le", "la", "de", "et", "les", "des", "pour", "avec"]),
        ("de", &["der", "die", "und", "das", "den", "für", "mit", "ist"]),
    ];

    let lowered = body.to_lowercase();
    let words: Vec<&str> = lowered.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let mut best: Option<(&str, usize)> = None;
    for (lang, stopwords) in STOPWORDS {
        let count = words.iter().filter(|w| stopwords.contains(w)).count();
        if count > 0 && best.map(|(_, best_count)| count > best_count).unwrap_or(true) {
            best = Some((lang, count));
        }
    }
    best.map(|(lang, _)| lang.to_string())
}

fn parked_confidence(body: &str, text_ratio: f64, anchor_texts: &[String]) -> f64 {
    let mut score = 0.0;
    if text_ratio < 0.05 {
        score += 0.5;
    }
    let lowered = body.to_lowercase();
    if PARKING_PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        score += 0.4;
    }
    if anchor_texts.len() >= 4 {
        let unique: HashSet<&String> = anchor_texts.iter().collect();
        if unique.len() <= anchor_texts.len() / 2 {
            score += 0.2;
        }
    }
    score.clamp(0.0, 1.0)
}

/// Runs the full extraction pass described in §4.3 step 4 over a decoded
/// response body.
pub fn extract(body: &str, domain: &str, rules: &[CompiledRule], advanced_lang_detection: bool) -> ExtractedFeatures {
    let title = title_regex()
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| strip_tags(m.as_str()).trim().to_string())
        .filter(|s| !s.is_empty());

    let h1_count = h1_regex().find_iter(body).count() as u32;

    let mut internal = 0u32;
    let mut total_links = 0u32;
    let mut anchor_texts = Vec::new();
    for caps in anchor_regex().captures_iter(body) {
        total_links += 1;
        let href = caps.get(1).map(|m| m.as_str()).unwrap_or("");
        let text = caps.get(2).map(|m| strip_tags(m.as_str()).trim().to_string()).unwrap_or_default();
        let is_internal = !href.starts_with("http://") && !href.starts_with("https://") || href.contains(domain);
        if is_internal {
            internal += 1;
        }
        anchor_texts.push(text);
    }
    let link_internal_ratio = if total_links == 0 { 0.0 } else { internal as f64 / total_links as f64 };

    let stripped = strip_tags(body);
    let text_ratio = stripped.trim().len() as f64 / body.len().max(1) as f64;
    let confidence = parked_confidence(body, text_ratio, &anchor_texts);

    let (total_occurrences, unique) = match_keywords(body, rules);
    let title_keyword_hit = title
        .as_deref()
        .map(|t| match_keywords(t, rules).0 > 0)
        .unwrap_or(false);

    let primary_lang = if advanced_lang_detection { detect_primary_lang(body) } else { None };

    ExtractedFeatures {
        h1_count,
        link_internal_ratio,
        primary_lang,
        title,
        title_keyword_hit,
        total_occurrences,
        unique_keywords: unique.len(),
        matched_keywords: unique.into_iter().collect(),
        parked_confidence: confidence,
    }
}

/// §4.3 step 5 `density` component: saturating log-scale so 0.02 maps to ~0.9.
pub fn density_component(total_occurrences: u64, content_length_bytes: u64) -> f64 {
    let x = total_occurrences as f64 / content_length_bytes.max(1) as f64;
    (DENSITY_K * x).tanh().clamp(0.0, 1.0)
}

/// §4.3 step 5 `content_length` component.
pub fn content_length_component(bytes: u64, cap: u64) -> f64 {
    let num = (1.0 + bytes as f64).ln();
    let den = (1.0 + cap.max(1) as f64).ln();
    (num / den).clamp(0.0, 1.0)
}

/// §4.3 step 5 `tf_lite` component: only meaningful when the phase enables
/// it; callers gate on `tf_lite_enabled` before persisting a nonzero value.
pub fn tf_lite_component(total_occurrences: u64, unique_keywords: usize, content_length_bytes: u64) -> f64 {
    let kb = (content_length_bytes as f64 / 1024.0).max(1e-9);
    (total_occurrences as f64 / kb) * (1.0 + unique_keywords as f64).ln()
}
