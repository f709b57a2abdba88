use nom::{
    bytes::complete::{tag, take_till1, take_while1},
    character::complete::space1,
    combinator::all_consuming,
    sequence::tuple,
    IResult,
};

use crate::error::{Error, Result};
use crate::types::method::Method;
use crate::types::uri::Uri;

/// `Method SP Request-URI SP SIP-Version`
fn request_line(input: &str) -> IResult<&str, (&str, &str)> {
    let (input, (method, _, uri, _, _)) = all_consuming(tuple((
        take_while1(|c: char| c.is_ascii() && super::is_token_char(c as u8)),
        space1,
        take_till1(|c: char| c == ' '),
        space1,
        tag("SIP/2.0"),
    )))(input.trim_end())?;
    Ok((input, (method, uri)))
}

/// Parse a request line into method and Request-URI
pub fn parse_request_line(line: &str) -> Result<(Method, Uri)> {
    let (_, (method, uri)) =
        request_line(line).map_err(|_| Error::InvalidStartLine(line.to_string()))?;
    Ok((method.parse()?, uri.parse()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_line() {
        let (method, uri) = parse_request_line("INVITE sip:bob@biloxi.com SIP/2.0").unwrap();
        assert_eq!(method, Method::Invite);
        assert_eq!(uri.host, "biloxi.com");
    }

    #[test]
    fn test_bad_request_lines() {
        assert!(parse_request_line("INVITE sip:bob@biloxi.com").is_err());
        assert!(parse_request_line("INVITE sip:bob@biloxi.com SIP/3.0").is_err());
        assert!(parse_request_line("INVITE  SIP/2.0").is_err());
    }
}
