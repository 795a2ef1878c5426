//! Dotted-path resolution over parsed payload trees
//!
//! Path expressions address values inside a raw record regardless of the
//! wire format it arrived in. Supported syntax:
//!
//! - `a.b.c` object key traversal
//! - `items[2].name` numeric index into an array
//! - `items[*].qty` wildcard fan-out over every array element
//!
//! Resolution is total: missing keys, out-of-range indexes, type mismatches
//! and malformed expressions all yield [`Resolution::Absent`] rather than an
//! error. A stored JSON `null` is still a resolution, so callers can tell a
//! field the vendor sent as null apart from one that was never there.

use serde_json::Value;

/// Outcome of resolving a path expression
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Nothing at this path
    Absent,
    /// A single value
    One(Value),
    /// A wildcard fan-out, one entry per match
    Many(Vec<Value>),
}

impl Resolution {
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Resolution::Absent => Vec::new(),
            Resolution::One(v) => vec![v],
            Resolution::Many(vs) => vs,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
    Wildcard,
}

/// Parse a path expression into segments. Returns None when the expression
/// is malformed (unbalanced brackets, empty bracket, bad index).
fn parse_path(expr: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();

    for part in expr.split('.') {
        let mut rest = part;

        if let Some(bracket) = rest.find('[') {
            let key = &rest[..bracket];
            if !key.is_empty() {
                segments.push(Segment::Key(key.to_string()));
            }
            rest = &rest[bracket..];

            while !rest.is_empty() {
                if !rest.starts_with('[') {
                    return None;
                }
                let close = rest.find(']')?;
                let inside = &rest[1..close];
                if inside == "*" {
                    segments.push(Segment::Wildcard);
                } else {
                    segments.push(Segment::Index(inside.parse().ok()?));
                }
                rest = &rest[close + 1..];
            }
        } else if !rest.is_empty() {
            segments.push(Segment::Key(rest.to_string()));
        }
    }

    Some(segments)
}

/// Resolve a path expression against a record tree.
pub fn resolve(tree: &Value, path: &str) -> Resolution {
    let Some(segments) = parse_path(path) else {
        return Resolution::Absent;
    };
    if segments.is_empty() {
        return Resolution::Absent;
    }

    let mut frontier: Vec<&Value> = vec![tree];
    let mut fanned_out = false;

    for segment in &segments {
        let mut next = Vec::new();
        for node in frontier {
            match segment {
                Segment::Key(key) => {
                    if let Value::Object(map) = node {
                        if let Some(v) = map.get(key) {
                            next.push(v);
                        }
                    }
                }
                Segment::Index(idx) => {
                    if let Value::Array(items) = node {
                        if let Some(v) = items.get(*idx) {
                            next.push(v);
                        }
                    }
                }
                Segment::Wildcard => {
                    fanned_out = true;
                    if let Value::Array(items) = node {
                        next.extend(items.iter());
                    }
                }
            }
        }
        frontier = next;
        if frontier.is_empty() {
            break;
        }
    }

    let values: Vec<Value> = frontier.into_iter().cloned().collect();

    if values.is_empty() {
        Resolution::Absent
    } else if fanned_out || values.len() > 1 {
        Resolution::Many(values)
    } else {
        match values.into_iter().next() {
            Some(v) => Resolution::One(v),
            None => Resolution::Absent,
        }
    }
}
