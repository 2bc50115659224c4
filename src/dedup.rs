//! # Dedup
//! URL canonicalization and the per-job admission index.
//!
//! Two findings are the same if their normalized URLs match, or if both carry
//! the same non-empty source-native id. The index lives for one pipeline run
//! and is owned by that run's task, so it needs no locking.

use std::collections::HashSet;

use crate::sources::Finding;

/// Canonicalize a URL into a comparable key.
///
/// Lower-cases, then strips a leading `https://`/`http://`, a leading `www.`,
/// anything from the first `?`, and a trailing `/`. The rules are re-applied
/// until nothing changes so the result is a fixed point.
pub fn normalize_url(url: &str) -> String {
    let mut cur = url.trim().to_lowercase();
    loop {
        let next = normalize_once(&cur);
        if next == cur {
            return cur;
        }
        cur = next;
    }
}

fn normalize_once(s: &str) -> String {
    let mut s = s;
    if let Some(rest) = s.strip_prefix("https://") {
        s = rest;
    } else if let Some(rest) = s.strip_prefix("http://") {
        s = rest;
    }
    if let Some(rest) = s.strip_prefix("www.") {
        s = rest;
    }
    if let Some((base, _query)) = s.split_once('?') {
        s = base;
    }
    if let Some(rest) = s.strip_suffix('/') {
        s = rest;
    }
    s.to_string()
}

/// Admitted URL keys and external ids for one job.
#[derive(Debug, Default)]
pub struct DedupIndex {
    urls: HashSet<String>,
    ids: HashSet<String>,
    rejected: usize,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the finding is new and records its keys.
    ///
    /// The empty URL key is recorded like any other, so only the first
    /// finding without a URL gets in.
    pub fn admit(&mut self, finding: &Finding) -> bool {
        let key = normalize_url(&finding.canonical_url);
        let id = finding.external_id.trim();

        if self.urls.contains(&key) || (!id.is_empty() && self.ids.contains(id)) {
            self.rejected += 1;
            return false;
        }

        self.urls.insert(key);
        if !id.is_empty() {
            self.ids.insert(id.to_string());
        }
        true
    }

    /// Number of findings admitted so far.
    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Number of findings turned away as duplicates.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::Source;

    #[test]
    fn strips_scheme_www_slash_and_query() {
        assert_eq!(normalize_url("https://site.com/review/1"), "site.com/review/1");
        assert_eq!(normalize_url("http://www.site.com/review/1/"), "site.com/review/1");
        assert_eq!(normalize_url("HTTPS://WWW.Site.com/a?utm=1&b=2"), "site.com/a");
        assert_eq!(normalize_url("site.com/a/?ref=x"), "site.com/a");
    }

    #[test]
    fn empty_input_is_empty_key() {
        assert_eq!(normalize_url(""), "");
        assert_eq!(normalize_url("   "), "");
        assert_eq!(normalize_url("https://"), "");
    }

    #[test]
    fn normalization_is_idempotent() {
        for u in [
            "https://site.com/review/1",
            "http://http://www.www.site.com//",
            "www.site.com/a/?x=1",
            "HTTP://Example.org/Path/",
            "?only-query",
            "",
        ] {
            let once = normalize_url(u);
            assert_eq!(normalize_url(&once), once, "not idempotent for {u:?}");
        }
    }

    #[test]
    fn duplicate_url_is_rejected() {
        let mut idx = DedupIndex::new();
        assert!(idx.admit(&Finding::new(Source::Maps, "https://site.com/review/1")));
        assert!(!idx.admit(&Finding::new(Source::Web, "http://www.site.com/review/1/")));
        assert_eq!(idx.len(), 1);
        assert_eq!(idx.rejected(), 1);
    }

    #[test]
    fn duplicate_external_id_is_rejected_across_urls() {
        let mut idx = DedupIndex::new();
        assert!(idx.admit(&Finding::new(Source::Aggregator, "https://a.test/1").with_external_id("r1")));
        assert!(!idx.admit(&Finding::new(Source::Aggregator, "https://a.test/2").with_external_id("r1")));
        // empty ids never collide on their own
        assert!(idx.admit(&Finding::new(Source::Aggregator, "https://a.test/3")));
        assert!(idx.admit(&Finding::new(Source::Aggregator, "https://a.test/4")));
    }

    #[test]
    fn only_first_empty_url_gets_in() {
        let mut idx = DedupIndex::new();
        assert!(idx.admit(&Finding::new(Source::Forum, "").with_external_id("p1")));
        assert!(!idx.admit(&Finding::new(Source::Forum, "").with_external_id("p2")));
    }
}
