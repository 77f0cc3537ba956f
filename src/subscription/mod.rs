//! Subscription handling
//!
//! Downloading the feed, decoding `vmess://` lines into [`Endpoint`]s and
//! turning endpoints into engine outbounds.

pub mod codec;
pub mod fetcher;
pub mod outbound;

pub use codec::parse;
pub use fetcher::{fetch, fetch_with_retry};
pub use outbound::to_outbound;

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use tracing::warn;

use crate::error::{HelperError, Result};
use crate::models::Endpoint;

const LENIENT: GeneralPurposeConfig =
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent);

/// Standard alphabet, padding optional
const STANDARD_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::STANDARD, LENIENT);

/// URL-safe alphabet, padding optional
const URL_SAFE_LENIENT: GeneralPurpose = GeneralPurpose::new(&alphabet::URL_SAFE, LENIENT);

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_ascii_whitespace()).collect()
}

/// Decode base64 text trying the standard then the URL-safe alphabet.
///
/// Returns `None` unless one of them yields valid UTF-8.
pub(crate) fn decode_base64_text(s: &str) -> Option<String> {
    let compact = strip_whitespace(s);
    if compact.is_empty() {
        return None;
    }

    [STANDARD_LENIENT, URL_SAFE_LENIENT]
        .iter()
        .find_map(|engine| engine.decode(compact.as_bytes()).ok())
        .and_then(|bytes| String::from_utf8(bytes).ok())
}

/// Decode a subscription body, which uses the standard alphabet only
pub(crate) fn decode_standard(body: &str) -> Result<String> {
    let bytes = STANDARD_LENIENT
        .decode(strip_whitespace(body).as_bytes())
        .map_err(|e| HelperError::Decode(format!("invalid base64 subscription: {}", e)))?;

    String::from_utf8(bytes)
        .map_err(|e| HelperError::Decode(format!("subscription is not utf-8: {}", e)))
}

/// Parse every non-blank line of a decoded subscription.
///
/// The first malformed line aborts the whole batch.
pub fn parse_lines(text: &str) -> Result<Vec<Endpoint>> {
    let endpoints = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse)
        .collect::<Result<Vec<_>>>()?;

    if endpoints.is_empty() {
        warn!("subscription contained no endpoints");
    }

    Ok(endpoints)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};

    #[test]
    fn test_decode_base64_text_alphabets() {
        let text = "subjects?>>";
        assert_eq!(
            decode_base64_text(&STANDARD.encode(text)).as_deref(),
            Some(text)
        );
        assert_eq!(
            decode_base64_text(&URL_SAFE_NO_PAD.encode(text)).as_deref(),
            Some(text)
        );
    }

    #[test]
    fn test_decode_base64_text_rejects_garbage() {
        assert_eq!(decode_base64_text(""), None);
        assert_eq!(decode_base64_text("not base64 !!"), None);
        // valid base64, not utf-8
        assert_eq!(decode_base64_text(&STANDARD.encode([0xff, 0xfe])), None);
    }

    #[test]
    fn test_decode_standard_tolerates_missing_padding_and_newlines() {
        let body = STANDARD.encode("vmess://a\nvmess://b");
        let body = format!("{}\n", body.trim_end_matches('='));
        assert_eq!(decode_standard(&body).unwrap(), "vmess://a\nvmess://b");

        let err = decode_standard("%%%").unwrap_err();
        assert!(matches!(err, HelperError::Decode(_)));
    }

    #[test]
    fn test_parse_lines_skips_blanks() {
        let line = format!("vmess://{}?remarks=A", STANDARD.encode("auto:id@h:1"));
        let text = format!("\n{}\r\n\n  \n{}\n", line, line);

        let endpoints = parse_lines(&text).unwrap();

        assert_eq!(endpoints.len(), 2);
        assert_eq!(endpoints[0].name, "A");
    }

    #[test]
    fn test_parse_lines_aborts_on_bad_line() {
        let text = format!(
            "vmess://{}\ntrojan://x",
            STANDARD.encode("auto:id@h:1")
        );
        assert!(matches!(parse_lines(&text), Err(HelperError::Parse(_))));
    }
}
