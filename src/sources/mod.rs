// src/sources/mod.rs
pub mod collector;
pub mod describe;
pub mod types;

pub use types::{
    BusinessContext, BusinessReference, DescriptionExtractor, Finding, Sentiment, Source,
    SourceAdapter, SourceLocators,
};

use once_cell::sync::OnceCell;
use regex::Regex;

/// Max chars kept from a collector's excerpt.
pub const EXCERPT_CAP: usize = 500;

/// Clean a collector excerpt: decode entities, strip tags, fold whitespace, cap length.
pub fn clean_excerpt(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    if out.chars().count() > EXCERPT_CAP {
        out = out.chars().take(EXCERPT_CAP).collect();
    }
    out
}

/// Treat empty/whitespace-only optional strings as absent.
pub fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Stamp orchestrator-owned fields onto a collector finding before admission.
pub fn prepare_finding(mut f: Finding, source: Source, reference: &BusinessReference) -> Finding {
    f.source = source;
    f.business_reference = reference.clone();
    f.text_excerpt = clean_excerpt(&f.text_excerpt);
    f.external_id = f.external_id.trim().to_string();
    if !matches!(f.rating, Some(1..=5)) {
        f.rating = None;
    }
    f
}
