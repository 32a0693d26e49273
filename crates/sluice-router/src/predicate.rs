//! Request predicates
//!
//! A predicate is a named, side-effect free test over the request head.
//! Temporal predicates read the time from an injected [`Clock`] and always
//! compare in UTC.

use crate::matcher::{HostMatcher, PathMatcher};
use chrono::{DateTime, Utc};
use http::header::{COOKIE, HOST};
use http::request::Parts;
use http::{HeaderName, Method};
use regex::Regex;
use sluice_core::{Clock, Error, Result};
use std::fmt;
use std::sync::Arc;

/// Boolean test over an incoming request
pub trait Predicate: Send + Sync + fmt::Debug {
    /// Name the predicate was registered under
    fn name(&self) -> &str;

    /// Whether the request satisfies the predicate
    fn test(&self, req: &Parts) -> bool;
}

/// Evaluate predicates left to right, stopping at the first `false`
pub fn test_all(predicates: &[Arc<dyn Predicate>], req: &Parts) -> bool {
    predicates.iter().all(|p| p.test(req))
}

/// Host of the request, from the URI authority or the `Host` header
pub fn request_host(req: &Parts) -> Option<&str> {
    req.uri
        .host()
        .or_else(|| req.headers.get(HOST).and_then(|v| v.to_str().ok()))
}

fn compile_regex(arg: &str, source: Option<&str>) -> Result<Option<Regex>> {
    source
        .map(|s| {
            Regex::new(s).map_err(|e| Error::invalid(arg, format!("a valid regular expression ({})", e)))
        })
        .transpose()
}

fn value_matches(regex: &Option<Regex>, value: &str) -> bool {
    regex.as_ref().map_or(true, |re| re.is_match(value))
}

/// Matches when the method is one of the configured set
#[derive(Debug, Clone)]
pub struct MethodPredicate {
    methods: Vec<Method>,
}

impl MethodPredicate {
    /// Create from method names (case-insensitive)
    pub fn new<I, S>(methods: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let methods = methods
            .into_iter()
            .map(|m| {
                Method::from_bytes(m.as_ref().to_ascii_uppercase().as_bytes())
                    .map_err(|_| Error::invalid("methods", "HTTP method names"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { methods })
    }
}

impl Predicate for MethodPredicate {
    fn name(&self) -> &str {
        "Method"
    }

    fn test(&self, req: &Parts) -> bool {
        self.methods.contains(&req.method)
    }
}

/// Matches when the path matches any glob
#[derive(Debug, Clone)]
pub struct PathPredicate {
    patterns: Vec<PathMatcher>,
}

impl PathPredicate {
    /// Create from glob patterns
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(PathMatcher::new).collect(),
        }
    }
}

impl Predicate for PathPredicate {
    fn name(&self) -> &str {
        "Path"
    }

    fn test(&self, req: &Parts) -> bool {
        let path = req.uri.path();
        self.patterns.iter().any(|p| p.matches(path))
    }
}

/// Matches when the host matches any pattern
#[derive(Debug, Clone)]
pub struct HostPredicate {
    patterns: Vec<HostMatcher>,
}

impl HostPredicate {
    /// Create from host patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns
            .into_iter()
            .map(HostMatcher::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl Predicate for HostPredicate {
    fn name(&self) -> &str {
        "Host"
    }

    fn test(&self, req: &Parts) -> bool {
        request_host(req).is_some_and(|host| self.patterns.iter().any(|p| p.matches(host)))
    }
}

/// Matches when a header is present and, optionally, one of its values matches
#[derive(Debug, Clone)]
pub struct HeaderPredicate {
    header: HeaderName,
    regex: Option<Regex>,
}

impl HeaderPredicate {
    /// Create for a header name and an optional value regex
    pub fn new(name: &str, regex: Option<&str>) -> Result<Self> {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::invalid("name", "a valid header name"))?;
        Ok(Self {
            header,
            regex: compile_regex("regexp", regex)?,
        })
    }
}

impl Predicate for HeaderPredicate {
    fn name(&self) -> &str {
        "Header"
    }

    fn test(&self, req: &Parts) -> bool {
        req.headers
            .get_all(&self.header)
            .iter()
            .any(|v| value_matches(&self.regex, &String::from_utf8_lossy(v.as_bytes())))
    }
}

/// Matches when a query parameter is present and, optionally, one of its values matches
#[derive(Debug, Clone)]
pub struct QueryPredicate {
    param: String,
    regex: Option<Regex>,
}

impl QueryPredicate {
    /// Create for a parameter name and an optional value regex
    pub fn new(name: impl Into<String>, regex: Option<&str>) -> Result<Self> {
        Ok(Self {
            param: name.into(),
            regex: compile_regex("regexp", regex)?,
        })
    }
}

impl Predicate for QueryPredicate {
    fn name(&self) -> &str {
        "Query"
    }

    fn test(&self, req: &Parts) -> bool {
        let Some(query) = req.uri.query() else {
            return false;
        };
        url::form_urlencoded::parse(query.as_bytes())
            .filter(|(key, _)| *key == self.param)
            .any(|(_, value)| value_matches(&self.regex, &value))
    }
}

/// Matches when a cookie is present and, optionally, its value matches
#[derive(Debug, Clone)]
pub struct CookiePredicate {
    cookie: String,
    regex: Option<Regex>,
}

impl CookiePredicate {
    /// Create for a cookie name and an optional value regex
    pub fn new(name: impl Into<String>, regex: Option<&str>) -> Result<Self> {
        Ok(Self {
            cookie: name.into(),
            regex: compile_regex("regexp", regex)?,
        })
    }
}

/// Iterate `(name, value)` pairs over every `Cookie` header
pub fn request_cookies(req: &Parts) -> impl Iterator<Item = (&str, &str)> {
    req.headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|header| header.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .unwrap_or(value);
            Some((name.trim(), value))
        })
}

impl Predicate for CookiePredicate {
    fn name(&self) -> &str {
        "Cookie"
    }

    fn test(&self, req: &Parts) -> bool {
        request_cookies(req)
            .filter(|(name, _)| *name == self.cookie)
            .any(|(_, value)| value_matches(&self.regex, value))
    }
}

/// Matches strictly before an instant
#[derive(Debug, Clone)]
pub struct BeforePredicate {
    at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl BeforePredicate {
    /// Create for an instant
    pub fn new(at: DateTime<Utc>, clock: Arc<dyn Clock>) -> Self {
        Self { at, clock }
    }
}

impl Predicate for BeforePredicate {
    fn name(&self) -> &str {
        "Before"
    }

    fn test(&self, _req: &Parts) -> bool {
        self.clock.utc_now() < self.at
    }
}

/// Matches strictly after an instant
#[derive(Debug, Clone)]
pub struct AfterPredicate {
    at: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl AfterPredicate {
    /// Create for an instant
    pub fn new(at: DateTime<Utc>, clock: Arc<dyn Clock>) -> Self {
        Self { at, clock }
    }
}

impl Predicate for AfterPredicate {
    fn name(&self) -> &str {
        "After"
    }

    fn test(&self, _req: &Parts) -> bool {
        self.clock.utc_now() > self.at
    }
}

/// Matches strictly between two instants
#[derive(Debug, Clone)]
pub struct BetweenPredicate {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl BetweenPredicate {
    /// Create for an open interval; `start` must precede `end`
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, clock: Arc<dyn Clock>) -> Result<Self> {
        if start >= end {
            return Err(Error::invalid("end", "an instant after 'start'"));
        }
        Ok(Self { start, end, clock })
    }
}

impl Predicate for BetweenPredicate {
    fn name(&self) -> &str {
        "Between"
    }

    fn test(&self, _req: &Parts) -> bool {
        let now = self.clock.utc_now();
        self.start < now && now < self.end
    }
}
