use std::fmt;
use uuid::Uuid;

/// One element of a parsed route pattern.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param { name: String, tag: ParamTag },
    Wildcard { name: String },
}

/// Type tag constraining a parameter segment.
///
/// Variants are ordered most-restrictive first; the router tries parameter
/// edges in this order, so `/x/{n:int}` shadows `/x/{n:string}` for numeric
/// segments while both stay reachable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamTag {
    Uuid,
    Int,
    Str,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPattern {
    #[error("pattern must begin with '/'")]
    MissingLeadingSlash,

    #[error("empty segment")]
    EmptySegment,

    #[error("segment {0:?} contains disallowed characters")]
    DisallowedCharacters(String),

    #[error("malformed parameter segment {0:?}")]
    MalformedParam(String),

    #[error("invalid parameter name {0:?}")]
    InvalidName(String),

    #[error("unknown parameter type {0:?}")]
    UnknownType(String),

    #[error("parameter name {0:?} is used more than once")]
    DuplicateParamName(String),

    #[error("wildcard segment must be the final segment")]
    WildcardNotLast,
}

// === impl ParamTag ===

impl ParamTag {
    /// Whether a path segment satisfies this tag. A mismatch is equivalent
    /// to the edge not existing.
    pub fn accepts(&self, segment: &str) -> bool {
        match self {
            ParamTag::Str => !segment.is_empty(),
            ParamTag::Int => {
                let digits = segment
                    .strip_prefix('+')
                    .or_else(|| segment.strip_prefix('-'))
                    .unwrap_or(segment);
                !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
            }
            // Canonical 8-4-4-4-12 form only; the other uuid encodings have
            // different lengths.
            ParamTag::Uuid => segment.len() == 36 && Uuid::try_parse(segment).is_ok(),
        }
    }
}

impl fmt::Display for ParamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamTag::Uuid => "uuid".fmt(f),
            ParamTag::Int => "int".fmt(f),
            ParamTag::Str => "string".fmt(f),
        }
    }
}

// === parsing ===

/// Splits a route pattern into segments.
///
/// Grammar: `pattern := '/' | ('/' segment)+` where a segment is a literal
/// (`[A-Za-z0-9._~-]+`), a parameter (`{name}` or `{name:type}`), or a
/// wildcard (`*name`). The `path` type is wildcard sugar and carries the
/// same final-segment restriction.
pub fn parse(pattern: &str) -> Result<Vec<Segment>, InvalidPattern> {
    let rest = pattern
        .strip_prefix('/')
        .ok_or(InvalidPattern::MissingLeadingSlash)?;
    if rest.is_empty() {
        return Ok(Vec::new());
    }

    let raw: Vec<&str> = rest.split('/').collect();
    let mut segments = Vec::with_capacity(raw.len());
    let mut names: Vec<String> = Vec::new();
    for (idx, raw_segment) in raw.iter().enumerate() {
        let segment = parse_segment(raw_segment)?;
        match &segment {
            Segment::Wildcard { .. } if idx + 1 != raw.len() => {
                return Err(InvalidPattern::WildcardNotLast);
            }
            Segment::Param { name, .. } | Segment::Wildcard { name } => {
                if names.iter().any(|n| n == name) {
                    return Err(InvalidPattern::DuplicateParamName(name.clone()));
                }
                names.push(name.clone());
            }
            Segment::Literal(_) => {}
        }
        segments.push(segment);
    }
    Ok(segments)
}

fn parse_segment(raw: &str) -> Result<Segment, InvalidPattern> {
    if raw.is_empty() {
        return Err(InvalidPattern::EmptySegment);
    }

    if let Some(body) = raw.strip_prefix('{') {
        let body = body
            .strip_suffix('}')
            .ok_or_else(|| InvalidPattern::MalformedParam(raw.to_string()))?;
        let (name, tag) = match body.split_once(':') {
            Some((name, tag)) => (name, Some(tag)),
            None => (body, None),
        };
        check_name(name)?;
        let tag = match tag {
            None | Some("string") => ParamTag::Str,
            Some("int") => ParamTag::Int,
            Some("uuid") => ParamTag::Uuid,
            Some("path") => {
                return Ok(Segment::Wildcard {
                    name: name.to_string(),
                })
            }
            Some(other) => return Err(InvalidPattern::UnknownType(other.to_string())),
        };
        return Ok(Segment::Param {
            name: name.to_string(),
            tag,
        });
    }

    if let Some(name) = raw.strip_prefix('*') {
        check_name(name)?;
        return Ok(Segment::Wildcard {
            name: name.to_string(),
        });
    }

    let literal = raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'~' | b'-'));
    if !literal {
        return Err(InvalidPattern::DisallowedCharacters(raw.to_string()));
    }
    Ok(Segment::Literal(raw.to_string()))
}

fn check_name(name: &str) -> Result<(), InvalidPattern> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(InvalidPattern::InvalidName(name.to_string()))
    }
}
