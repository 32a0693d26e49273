//! Path globs and host patterns

use regex::Regex;
use sluice_core::{Error, Result};

/// Glob matcher over slash-delimited paths
///
/// Patterns:
/// - `/users` - literal segments
/// - `/users/*` - `*` matches any run of characters inside one segment
/// - `/v?/items` - `?` matches exactly one character inside one segment
/// - `/static/**` - `**` matches any number of whole segments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatcher {
    pattern: String,
    segments: Vec<String>,
}

impl PathMatcher {
    /// Create a matcher from a glob pattern
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let segments = split_segments(&pattern)
            .into_iter()
            .map(str::to_string)
            .collect();
        Self { pattern, segments }
    }

    /// Match a request path against this pattern
    pub fn matches(&self, path: &str) -> bool {
        if self.pattern.is_empty() {
            return path.is_empty();
        }
        let pattern: Vec<&str> = self.segments.iter().map(String::as_str).collect();
        match_segments(&pattern, &split_segments(path))
    }

    /// Get the pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

/// One-shot glob match of `path` against `pattern`
pub fn path_matches(pattern: &str, path: &str) -> bool {
    if pattern.is_empty() {
        return path.is_empty();
    }
    match_segments(&split_segments(pattern), &split_segments(path))
}

fn split_segments(s: &str) -> Vec<&str> {
    let trimmed = s.trim_matches('/');
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    let (mut pi, mut si) = (0, 0);

    while pi < pattern.len() {
        if pattern[pi] == "**" {
            if pi + 1 == pattern.len() {
                return true;
            }
            let next = pattern[pi + 1];
            while si < path.len() && !segment_matches(next, path[si]) {
                si += 1;
            }
            if si == path.len() {
                return false;
            }
            pi += 2;
            si += 1;
            continue;
        }

        if si >= path.len() || !segment_matches(pattern[pi], path[si]) {
            return false;
        }
        pi += 1;
        si += 1;
    }

    si == path.len()
}

/// Single-segment wildcard match with `*` backtracking
fn segment_matches(pattern: &str, segment: &str) -> bool {
    let p = pattern.as_bytes();
    let s = segment.as_bytes();
    let (mut pi, mut si) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while si < s.len() {
        if pi < p.len() && (p[pi] == b'?' || p[pi] == s[si]) {
            pi += 1;
            si += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if let Some(star_at) = star {
            pi = star_at + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

/// Translate a host pattern into an unanchored regex
///
/// `.` is escaped, `**` becomes `.+` (one or more labels) and `*` becomes
/// `[^.]+` (exactly one label). Anything else is kept as is.
pub fn convert_pattern_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() * 2);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => out.push_str("\\."),
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                out.push_str(".+");
            }
            '*' => out.push_str("[^.]+"),
            other => out.push(other),
        }
    }

    out
}

/// Host pattern compiled once at construction
#[derive(Debug, Clone)]
pub struct HostMatcher {
    pattern: String,
    regex: Regex,
}

impl HostMatcher {
    /// Compile a host pattern such as `*.example.com` or `**.internal`
    pub fn new(pattern: impl Into<String>) -> Result<Self> {
        let pattern = pattern.into();
        let source = format!("(?i)^{}$", convert_pattern_to_regex(&pattern));
        let regex = Regex::new(&source)
            .map_err(|e| Error::invalid("patterns", format!("a valid host pattern ({})", e)))?;
        Ok(Self { pattern, regex })
    }

    /// Match a host, ignoring any port suffix
    pub fn matches(&self, host: &str) -> bool {
        self.regex.is_match(strip_port(host))
    }

    /// Get the pattern
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        return rest.split_once(']').map_or(host, |(addr, _)| addr);
    }
    match host.rsplit_once(':') {
        Some((name, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
