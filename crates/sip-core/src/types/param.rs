use serde::{Deserialize, Serialize};
use std::fmt;

/// A single `;name[=value]` parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub value: Option<String>,
}

impl Param {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        Param { name: name.into(), value }
    }

    /// A flag parameter such as `lr` or `rport`
    pub fn flag(name: impl Into<String>) -> Self {
        Param { name: name.into(), value: None }
    }

    pub fn branch(value: impl Into<String>) -> Self {
        Param::new("branch", Some(value.into()))
    }

    pub fn tag(value: impl Into<String>) -> Self {
        Param::new("tag", Some(value.into()))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{}={}", self.name, value),
            None => f.write_str(&self.name),
        }
    }
}

/// Ordered parameter list with case-insensitive lookup
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Params(Vec<Param>);

impl Params {
    pub fn new() -> Self {
        Params(Vec::new())
    }

    /// Parse `a=b;c;d=e`; a leading `;` is tolerated
    pub fn parse(input: &str) -> Self {
        let list = split_unquoted(input, ';')
            .into_iter()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((name, value)) => Param::new(name.trim(), Some(value.trim().to_string())),
                None => Param::flag(p),
            })
            .collect();
        Params(list)
    }

    pub fn get(&self, name: &str) -> Option<&Param> {
        self.0.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Value of a parameter; `None` when absent or valueless
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|p| p.value.as_deref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace an existing parameter in place or append it
    pub fn set(&mut self, name: &str, value: Option<String>) {
        match self.0.iter_mut().find(|p| p.name.eq_ignore_ascii_case(name)) {
            Some(param) => param.value = value,
            None => self.0.push(Param::new(name, value)),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Param> {
        let pos = self.0.iter().position(|p| p.name.eq_ignore_ascii_case(name))?;
        Some(self.0.remove(pos))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.0.iter()
    }
}

impl From<Vec<Param>> for Params {
    fn from(list: Vec<Param>) -> Self {
        Params(list)
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.0 {
            write!(f, ";{}", param)?;
        }
        Ok(())
    }
}

/// Split on `sep` outside of double quotes and angle brackets
pub(crate) fn split_unquoted(input: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => depth += 1,
            '>' if !in_quotes => depth = depth.saturating_sub(1),
            c if c == sep && !in_quotes && depth == 0 => {
                parts.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&input[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let params = Params::parse(";branch=z9hG4bK1;rport;received=10.0.0.1");
        assert_eq!(params.value("branch"), Some("z9hG4bK1"));
        assert!(params.contains("RPORT"));
        assert_eq!(params.value("rport"), None);
        assert_eq!(params.to_string(), ";branch=z9hG4bK1;rport;received=10.0.0.1");
    }

    #[test]
    fn test_set_replaces_in_place() {
        let mut params = Params::parse("rport;branch=a");
        params.set("rport", Some("5062".into()));
        assert_eq!(params.to_string(), ";rport=5062;branch=a");
    }

    #[test]
    fn test_split_ignores_quoted_separators() {
        let parts = split_unquoted("\"Doe, John\" <sip:j@x>, <sip:k@y;lr>", ',');
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].trim(), "<sip:k@y;lr>");
    }
}
