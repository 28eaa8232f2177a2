//! Cookie and token extraction from handshake responses

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use transport::ApiResponse;

/// Value of cookie `name` in a single `Set-Cookie` header, if it is that cookie.
///
/// Only the `name=value` part before the first `;` is considered. Surrounding
/// spaces and tabs are dropped; the value is otherwise returned verbatim (no
/// unquoting, no percent-decoding).
pub fn set_cookie_value<'a>(header: &'a str, name: &str) -> Option<&'a str> {
    let pair = header.split(';').next()?;
    let (cookie_name, value) = pair.split_once('=')?;
    if cookie_name.trim_matches([' ', '\t']) != name {
        return None;
    }
    Some(value.trim_matches([' ', '\t']))
}

/// Whether a `Set-Cookie` header expires its cookie at `now`.
///
/// `Max-Age` takes precedence over `Expires`; `Max-Age<=0` or an `Expires`
/// date not after `now` clears the cookie. Unparseable dates are ignored.
pub fn set_cookie_expired(header: &str, now: DateTime<Utc>) -> bool {
    let mut max_age = None;
    let mut expires = None;
    for attribute in header.split(';').skip(1) {
        let Some((key, value)) = attribute.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.eq_ignore_ascii_case("max-age") {
            max_age = value.parse::<i64>().ok();
        } else if key.eq_ignore_ascii_case("expires") {
            expires = parse_cookie_date(value);
        }
    }
    match (max_age, expires) {
        (Some(seconds), _) => seconds <= 0,
        (None, Some(expires)) => expires <= now,
        (None, None) => false,
    }
}

/// RFC 1123 dates and the dashed form PHP emits (`Thu, 01-Jan-1970 00:00:01 GMT`).
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    const FORMATS: &[&str] = &["%a, %d-%b-%Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"];
    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        return Some(date.with_timezone(&Utc));
    }
    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|date| date.and_utc())
}

/// Cookie `name` as set by this response.
///
/// Returns `Some("")` when the server cleared the cookie (empty value or an
/// expiry in the past), `None` when the response did not mention it. If the
/// cookie is set more than once, the last header wins.
pub fn session_cookie(response: &ApiResponse, name: &str) -> Option<String> {
    let now = Utc::now();
    response
        .header_values("set-cookie")
        .filter_map(|header| {
            let value = set_cookie_value(header, name)?;
            if set_cookie_expired(header, now) {
                Some("")
            } else {
                Some(value)
            }
        })
        .last()
        .map(str::to_owned)
}

/// First capture group of `pattern` in `body`, if non-empty.
pub fn token_from_body(pattern: &Regex, body: &str) -> Option<String> {
    pattern
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_owned())
        .filter(|token| !token.is_empty())
}

/// Non-empty value of response header `name`.
pub fn token_from_header(response: &ApiResponse, name: &str) -> Option<String> {
    response
        .header_values(name)
        .next()
        .map(|value| value.trim().to_owned())
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::DEFAULT_TOKEN_PATTERN;

    #[test]
    fn set_cookie_value_reads_named_cookie() {
        assert_eq!(
            set_cookie_value("PHPSESSID=abc123; path=/; HttpOnly", "PHPSESSID"),
            Some("abc123")
        );
    }

    #[test]
    fn set_cookie_value_ignores_other_cookies() {
        assert_eq!(set_cookie_value("lang=en; path=/", "PHPSESSID"), None);
        assert_eq!(set_cookie_value("PHPSESSIDX=abc", "PHPSESSID"), None);
    }

    #[test]
    fn set_cookie_value_is_not_normalized() {
        assert_eq!(
            set_cookie_value("PHPSESSID=a%2Fb==; Secure", "PHPSESSID"),
            Some("a%2Fb==")
        );
        assert_eq!(
            set_cookie_value("PHPSESSID=\"Quoted\"", "PHPSESSID"),
            Some("\"Quoted\"")
        );
    }

    #[test]
    fn set_cookie_value_without_attributes() {
        assert_eq!(set_cookie_value("PHPSESSID=xyz", "PHPSESSID"), Some("xyz"));
        assert_eq!(set_cookie_value("PHPSESSID", "PHPSESSID"), None);
    }

    #[test]
    fn session_cookie_last_header_wins() {
        let response = ApiResponse::new(200, "")
            .with_header("set-cookie", "PHPSESSID=first; path=/")
            .with_header("set-cookie", "lang=el")
            .with_header("set-cookie", "PHPSESSID=second; path=/");
        assert_eq!(session_cookie(&response, "PHPSESSID").as_deref(), Some("second"));
    }

    #[test]
    fn session_cookie_reports_cleared_cookie() {
        let response = ApiResponse::new(200, "")
            .with_header("set-cookie", "PHPSESSID=; expires=Thu, 01 Jan 1970 00:00:00 GMT");
        assert_eq!(session_cookie(&response, "PHPSESSID").as_deref(), Some(""));
    }

    #[test]
    fn deleted_session_cookie_counts_as_cleared() {
        let response = ApiResponse::new(200, "").with_header(
            "set-cookie",
            "PHPSESSID=deleted; expires=Thu, 01-Jan-1970 00:00:01 GMT; Max-Age=0; path=/",
        );
        assert_eq!(session_cookie(&response, "PHPSESSID").as_deref(), Some(""));

        let response = ApiResponse::new(200, "")
            .with_header("set-cookie", "PHPSESSID=deleted; expires=Thu, 01-Jan-1970 00:00:01 GMT");
        assert_eq!(session_cookie(&response, "PHPSESSID").as_deref(), Some(""));
    }

    #[test]
    fn expiry_attributes() {
        let now = Utc::now();
        assert!(set_cookie_expired("PHPSESSID=x; Max-Age=0", now));
        assert!(set_cookie_expired("PHPSESSID=x; max-age=-1", now));
        assert!(!set_cookie_expired("PHPSESSID=x; Max-Age=3600", now));
        assert!(set_cookie_expired(
            "PHPSESSID=x; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            now
        ));
        assert!(!set_cookie_expired(
            "PHPSESSID=x; Expires=Fri, 01 Jan 2100 00:00:00 GMT",
            now
        ));
        // Max-Age wins over a past Expires
        assert!(!set_cookie_expired(
            "PHPSESSID=x; Expires=Thu, 01-Jan-1970 00:00:01 GMT; Max-Age=60",
            now
        ));
        assert!(!set_cookie_expired("PHPSESSID=x; Expires=someday", now));
        assert!(!set_cookie_expired("PHPSESSID=x; path=/; HttpOnly", now));
    }

    #[test]
    fn session_cookie_absent() {
        let response = ApiResponse::new(200, "<html></html>");
        assert_eq!(session_cookie(&response, "PHPSESSID"), None);
    }

    #[test]
    fn token_from_body_matches_window_token() {
        let pattern = Regex::new(DEFAULT_TOKEN_PATTERN).unwrap();
        let body = r#"<script>var x = 1; window.token = "e2287129f7a2"; </script>"#;
        assert_eq!(token_from_body(&pattern, body).as_deref(), Some("e2287129f7a2"));

        let single = "<script>window.token='abc'</script>";
        assert_eq!(token_from_body(&pattern, single).as_deref(), Some("abc"));
    }

    #[test]
    fn token_from_body_missing() {
        let pattern = Regex::new(DEFAULT_TOKEN_PATTERN).unwrap();
        assert_eq!(token_from_body(&pattern, "<html>no token here</html>"), None);
        assert_eq!(token_from_body(&pattern, "window.token = ''"), None);
    }

    #[test]
    fn token_from_header_trims_and_rejects_empty() {
        let response = ApiResponse::new(200, "")
            .with_header("x-csrf-token", " T1 ")
            .with_header("x-empty", "");
        assert_eq!(token_from_header(&response, "x-csrf-token").as_deref(), Some("T1"));
        assert_eq!(token_from_header(&response, "x-empty"), None);
        assert_eq!(token_from_header(&response, "x-absent"), None);
    }
}
