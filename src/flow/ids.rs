use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Shape of engine-assigned node identifiers: `<hex>.<hex>` with a fixed
/// total length and the first `.` at a fixed index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdPattern {
    /// Length 14 or 15, dot at index 7 or 8.
    #[default]
    Legacy,
    /// Length 15, dot at index 8.
    Fixed,
}

impl IdPattern {
    fn lengths(self) -> &'static [usize] {
        match self {
            IdPattern::Legacy => &[14, 15],
            IdPattern::Fixed => &[15],
        }
    }

    fn dot_positions(self) -> &'static [usize] {
        match self {
            IdPattern::Legacy => &[7, 8],
            IdPattern::Fixed => &[8],
        }
    }

    /// Splits a matching identifier into `prefix.` and the hex suffix.
    pub fn split(self, candidate: &str) -> Option<(&str, &str)> {
        if !self.lengths().contains(&candidate.len()) {
            return None;
        }
        let dot = candidate.find('.')?;
        if !self.dot_positions().contains(&dot) {
            return None;
        }
        let suffix = &candidate[dot + 1..];
        if suffix.is_empty() || !suffix.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some((&candidate[..=dot], suffix))
    }

    pub fn matches(self, candidate: &str) -> bool {
        self.split(candidate).is_some()
    }

    /// Adds `offset` to the hex suffix, keeping at least the suffix's
    /// original width. `None` when the string is not an id.
    pub fn shift(self, candidate: &str, offset: u64) -> Option<String> {
        let (prefix, suffix) = self.split(candidate)?;
        let value = u64::from_str_radix(suffix, 16).ok()?.checked_add(offset)?;
        Some(format!("{prefix}{value:0width$x}", width = suffix.len()))
    }
}

impl FromStr for IdPattern {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(IdPattern::Legacy),
            "fixed" => Ok(IdPattern::Fixed),
            other => Err(format!(
                "unknown id pattern {other:?} (expected \"legacy\" or \"fixed\")"
            )),
        }
    }
}

impl fmt::Display for IdPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdPattern::Legacy => f.write_str("legacy"),
            IdPattern::Fixed => f.write_str("fixed"),
        }
    }
}

/// Calls `visit` for every string value in the document. Object keys are
/// not visited.
pub fn visit_strings_mut<F>(value: &mut Value, visit: &mut F)
where
    F: FnMut(&mut String),
{
    match value {
        Value::String(text) => visit(text),
        Value::Array(items) => {
            for item in items {
                visit_strings_mut(item, visit);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                visit_strings_mut(item, visit);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Shifts every identifier-shaped string by `offset`, whatever field it
/// sits in, so references (`z`, `wires`, config links) move with the ids
/// they point at. Returns the number of strings rewritten.
pub fn shift_ids(document: &mut Value, pattern: IdPattern, offset: u64) -> usize {
    let mut rewritten = 0;
    visit_strings_mut(document, &mut |text| {
        if let Some(shifted) = pattern.shift(text, offset) {
            tracing::debug!(from = %text, to = %shifted, "shifting node id");
            *text = shifted;
            rewritten += 1;
        }
    });
    rewritten
}
