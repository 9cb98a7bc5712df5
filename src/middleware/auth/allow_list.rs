//! Endpoints reachable without a session.
//!
//! Entries are `METHOD /path` or `/path` (any method). Paths support `{param}`
//! segments and a trailing `*` matching any remainder. Fixed at startup.
use axum::http::Method;
use thiserror::Error;

const DEFAULT_ENTRIES: [&str; 4] = [
    "GET /api/v0/status",
    "GET /api/v0/metrics",
    "GET /api/v0/auth",
    "GET /api/v0/auth/callback",
];

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid allow-list entry: {0}")]
pub struct AllowListError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param,
}

#[derive(Debug, Clone)]
struct AllowRule {
    method: Option<Method>,
    segments: Vec<Segment>,
    wildcard_tail: bool,
}

impl AllowRule {
    fn parse(entry: &str) -> Result<Self, AllowListError> {
        let invalid = || AllowListError(entry.to_string());

        let (method, path) = match entry.trim().split_once(char::is_whitespace) {
            Some((m, p)) => (
                Some(Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| invalid())?),
                p.trim(),
            ),
            None => (None, entry.trim()),
        };
        if !path.starts_with('/') {
            return Err(invalid());
        }

        let mut parts: Vec<&str> = split_path(path).collect();
        let wildcard_tail = parts.last() == Some(&"*");
        if wildcard_tail {
            parts.pop();
        }

        let segments = parts
            .into_iter()
            .map(|p| {
                if p.starts_with('{') && p.ends_with('}') && p.len() > 2 {
                    Ok(Segment::Param)
                } else if p.contains(['{', '}', '*']) {
                    Err(invalid())
                } else {
                    Ok(Segment::Literal(p.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            method,
            segments,
            wildcard_tail,
        })
    }

    fn matches(&self, method: &Method, path: &str) -> bool {
        if let Some(expected) = &self.method {
            let head_as_get = *method == Method::HEAD && *expected == Method::GET;
            if expected != method && !head_as_get {
                return false;
            }
        }

        let parts: Vec<&str> = split_path(path).collect();
        if parts.len() < self.segments.len()
            || (!self.wildcard_tail && parts.len() != self.segments.len())
        {
            return false;
        }

        self.segments
            .iter()
            .zip(parts)
            .all(|(seg, part)| match seg {
                Segment::Param => !part.is_empty(),
                Segment::Literal(lit) => lit == part,
            })
    }
}

fn split_path(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct AllowList {
    rules: Vec<AllowRule>,
}

impl AllowList {
    /// Default public endpoints plus `extra` entries.
    pub fn new<S: AsRef<str>>(extra: &[S]) -> Result<Self, AllowListError> {
        let rules = DEFAULT_ENTRIES
            .iter()
            .map(|e| AllowRule::parse(e))
            .chain(extra.iter().map(|e| AllowRule::parse(e.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// `path` is relative to the context path.
    pub fn matches(&self, method: &Method, path: &str) -> bool {
        self.rules.iter().any(|r| r.matches(method, path))
    }
}
