use nom::{
    bytes::complete::{tag, take_while_m_n},
    character::complete::{space0, space1},
    combinator::{map_res, rest},
    sequence::tuple,
    IResult,
};

use crate::error::{Error, Result};
use crate::types::status::StatusCode;

/// `SIP-Version SP Status-Code SP Reason-Phrase`
fn status_line(input: &str) -> IResult<&str, (u16, &str)> {
    let (input, (_, _, code, _, reason)) = tuple((
        tag("SIP/2.0"),
        space1,
        map_res(take_while_m_n(3, 3, |c: char| c.is_ascii_digit()), str::parse::<u16>),
        space0,
        rest,
    ))(input)?;
    Ok((input, (code, reason)))
}

/// Parse a status line; the reason phrase may be empty
pub fn parse_status_line(line: &str) -> Result<(StatusCode, String)> {
    let (_, (code, reason)) =
        status_line(line).map_err(|_| Error::InvalidStartLine(line.to_string()))?;
    Ok((StatusCode::new(code)?, reason.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line() {
        let (status, reason) = parse_status_line("SIP/2.0 180 Ringing").unwrap();
        assert_eq!(status.as_u16(), 180);
        assert_eq!(reason, "Ringing");
        let (_, reason) = parse_status_line("SIP/2.0 200").unwrap();
        assert_eq!(reason, "");
    }

    #[test]
    fn test_rejects_out_of_range_code() {
        assert_eq!(
            parse_status_line("SIP/2.0 099 Odd"),
            Err(Error::InvalidStatusCode(99))
        );
        assert!(parse_status_line("SIP/2.0 20 OK").is_err());
    }
}
