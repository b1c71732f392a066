use std::collections::BTreeMap;

/// Parameters captured from a matched request path
pub type RouteParams = BTreeMap<String, String>;

/// Path pattern parse errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PatternError {
    #[error("path pattern must start with '/': {0}")]
    MissingLeadingSlash(String),
    #[error("parameter segment without a name in pattern {0}")]
    EmptyParameter(String),
    #[error("parameter '{0}' declared twice")]
    DuplicateParameter(String),
    #[error("wildcard must be the last segment in pattern {0}")]
    WildcardNotLast(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Param(String),
    /// Captures the remainder of the path under "*"
    Wildcard,
}

/// Compiled route path, e.g. `/rooms/:room` or `/files/*`
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    segments: Vec<Segment>,
}

impl PathPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let rest = pattern
            .strip_prefix('/')
            .ok_or_else(|| PatternError::MissingLeadingSlash(pattern.to_string()))?;

        let raw: Vec<&str> = split_segments(rest);
        let mut segments = Vec::with_capacity(raw.len());

        for (index, part) in raw.iter().enumerate() {
            if let Some(name) = part.strip_prefix(':') {
                if name.is_empty() {
                    return Err(PatternError::EmptyParameter(pattern.to_string()));
                }
                if segments.contains(&Segment::Param(name.to_string())) {
                    return Err(PatternError::DuplicateParameter(name.to_string()));
                }
                segments.push(Segment::Param(name.to_string()));
            } else if *part == "*" {
                if index + 1 != raw.len() {
                    return Err(PatternError::WildcardNotLast(pattern.to_string()));
                }
                segments.push(Segment::Wildcard);
            } else {
                segments.push(Segment::Literal(part.to_string()));
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Match a request path, returning captured parameters.
    ///
    /// Parameter values are percent-decoded; a value that does not decode to
    /// valid UTF-8 fails the match.
    pub fn matches(&self, path: &str) -> Option<RouteParams> {
        let rest = path.strip_prefix('/')?;
        let parts = split_segments(rest);
        let mut params = RouteParams::new();

        for (index, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(index) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param(name) => {
                    let raw = parts.get(index)?;
                    let value = urlencoding::decode(raw).ok()?;
                    params.insert(name.clone(), value.into_owned());
                }
                Segment::Wildcard => {
                    let remainder = parts[index.min(parts.len())..].join("/");
                    let value = urlencoding::decode(&remainder).ok()?;
                    params.insert("*".to_string(), value.into_owned());
                    return Some(params);
                }
            }
        }

        if parts.len() != self.segments.len() {
            return None;
        }

        Some(params)
    }
}

/// Split on '/', tolerating a single trailing slash
fn split_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    if trimmed.is_empty() {
        return Vec::new();
    }
    trimmed.split('/').collect()
}
