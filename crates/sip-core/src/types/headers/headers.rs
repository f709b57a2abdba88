use serde::{Deserialize, Serialize};
use std::fmt;

use super::header_name::HeaderName;

/// One header line; multi-value headers hold a single entry each
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<HeaderName>, value: impl Into<String>) -> Self {
        Header { name: name.into(), value: value.into() }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Headers in wire order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers(Vec<Header>);

impl Headers {
    pub fn new() -> Self {
        Headers(Vec::new())
    }

    /// First value of a header
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.0
            .iter()
            .find(|h| h.name.matches(name))
            .map(|h| h.value.as_str())
    }

    /// All values of a header in order
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .iter()
            .filter(move |h| h.name.matches(name))
            .map(|h| h.value.as_str())
    }

    pub fn count(&self, name: &HeaderName) -> usize {
        self.0.iter().filter(|h| h.name.matches(name)).count()
    }

    pub fn contains(&self, name: &HeaderName) -> bool {
        self.get(name).is_some()
    }

    pub fn push(&mut self, header: Header) {
        self.0.push(header);
    }

    /// Append a value after any existing ones
    pub fn append(&mut self, name: HeaderName, value: impl Into<String>) {
        self.0.push(Header { name, value: value.into() });
    }

    /// Insert a value in front of existing ones of the same name, or at
    /// the end when there are none
    pub fn prepend(&mut self, name: HeaderName, value: impl Into<String>) {
        let header = Header { name, value: value.into() };
        match self.0.iter().position(|h| h.name.matches(&header.name)) {
            Some(pos) => self.0.insert(pos, header),
            None => self.0.push(header),
        }
    }

    /// Replace every value of `name` with a single one, keeping the
    /// position of the first occurrence
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.0.iter().position(|h| h.name.matches(&name)) {
            Some(pos) => {
                self.0[pos].value = value;
                let mut index = 0;
                self.0.retain(|h| {
                    let keep = index <= pos || !h.name.matches(&name);
                    index += 1;
                    keep
                });
            }
            None => self.0.push(Header { name, value }),
        }
    }

    /// Remove every value of `name`, returning how many were removed
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.0.len();
        self.0.retain(|h| !h.name.matches(name));
        before - self.0.len()
    }

    /// Replace the first value of `name`; returns false when absent
    pub fn replace_first(&mut self, name: &HeaderName, value: impl Into<String>) -> bool {
        match self.0.iter_mut().find(|h| h.name.matches(name)) {
            Some(header) => {
                header.value = value.into();
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Header> for Headers {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        Headers(iter.into_iter().collect())
    }
}

impl Extend<Header> for Headers {
    fn extend<I: IntoIterator<Item = Header>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Headers {
        vec![
            Header::new("Via", "SIP/2.0/UDP a"),
            Header::new("From", "<sip:a@x>"),
            Header::new("Via", "SIP/2.0/UDP b"),
            Header::new("Route", "<sip:r1;lr>"),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn test_get_all_in_order() {
        let headers = sample();
        let vias: Vec<_> = headers.get_all(&HeaderName::Via).collect();
        assert_eq!(vias, vec!["SIP/2.0/UDP a", "SIP/2.0/UDP b"]);
        assert_eq!(headers.count(&HeaderName::Via), 2);
    }

    #[test]
    fn test_set_collapses_to_first_position() {
        let mut headers = sample();
        headers.set(HeaderName::Via, "SIP/2.0/UDP c");
        assert_eq!(headers.len(), 3);
        assert_eq!(headers.iter().next().unwrap().value, "SIP/2.0/UDP c");
    }

    #[test]
    fn test_prepend_goes_before_existing() {
        let mut headers = sample();
        headers.prepend(HeaderName::Via, "SIP/2.0/UDP top");
        assert_eq!(headers.get(&HeaderName::Via), Some("SIP/2.0/UDP top"));
        headers.prepend(HeaderName::Contact, "<sip:c@x>");
        assert_eq!(headers.get(&HeaderName::Contact), Some("<sip:c@x>"));
    }

    #[test]
    fn test_remove() {
        let mut headers = sample();
        assert_eq!(headers.remove(&HeaderName::Via), 2);
        assert!(!headers.contains(&HeaderName::Via));
    }
}
