use nom::{
    bytes::complete::take_while1,
    character::complete::{char, space0},
    combinator::rest,
    sequence::tuple,
    IResult,
};

use crate::error::{Error, Result};
use crate::types::headers::{Header, HeaderName};
use crate::types::param::split_unquoted;

/// Split the message head into logical lines, joining folded
/// continuation lines (leading SP/HTAB) onto the previous one
pub fn unfold_lines(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in head.split('\n') {
        let line = raw.strip_suffix('\r').unwrap_or(raw);
        if line.starts_with(|c: char| c == ' ' || c == '\t') {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim_start());
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

/// `header-name HCOLON header-value`
fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, (name, _, _, _, value)) = tuple((
        take_while1(|c: char| c.is_ascii() && super::is_token_char(c as u8)),
        space0,
        char(':'),
        space0,
        rest,
    ))(input)?;
    Ok((input, (name, value)))
}

/// Parse one unfolded header line into one or more headers
pub fn parse_header_line(line: &str) -> Result<Vec<Header>> {
    let (_, (name, value)) =
        header_line(line).map_err(|_| Error::Parse(format!("malformed header line: {:?}", line)))?;
    let name = HeaderName::from(name);
    let value = value.trim();

    if name.is_multi_value() {
        Ok(split_unquoted(value, ',')
            .into_iter()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Header { name: name.clone(), value: v.to_string() })
            .collect())
    } else {
        Ok(vec![Header { name, value: value.to_string() }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unfold() {
        let lines = unfold_lines("INVITE sip:a@b SIP/2.0\r\nSubject: I know you're there,\r\n   pick up\r\nTo: <sip:a@b>");
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "Subject: I know you're there, pick up");
    }

    #[test]
    fn test_compact_and_multi_value() {
        let headers = parse_header_line("v: SIP/2.0/UDP a:5060;branch=z9hG4bK1, SIP/2.0/UDP b;branch=z9hG4bK2").unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0].name, HeaderName::Via);
        assert_eq!(headers[1].value, "SIP/2.0/UDP b;branch=z9hG4bK2");
    }

    #[test]
    fn test_quoted_comma_in_contact() {
        let headers = parse_header_line("Contact: \"Doe, J\" <sip:j@x>").unwrap();
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_single_value_headers_keep_commas() {
        let headers = parse_header_line("Subject: a, b").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].value, "a, b");
    }

    #[test]
    fn test_malformed_line() {
        assert!(parse_header_line("no colon here").is_err());
    }
}
