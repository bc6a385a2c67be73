//! Character set handling for fetched feed bytes.
//!
//! Feeds arrive as raw bytes. The charset is taken from a byte-order mark,
//! then from the XML prolog (`<?xml ... encoding="..."?>`), then from the
//! transport (the HTTP `Content-Type` charset parameter), and finally
//! defaults to UTF-8. Only UTF-8 and the common single-byte Western and
//! Hebrew code pages are accepted; anything else is an error rather than a
//! silent lossy fallback.

use std::sync::OnceLock;

use encoding_rs::{Encoding, UTF_8, WINDOWS_1252, WINDOWS_1255};
use regex::bytes::Regex;
use tracing::debug;

use crate::error::{Error, Result};

/// How far into the document the prolog is searched for.
const PROLOG_SCAN_LIMIT: usize = 1024;

/// Feed text transcoded to UTF-8.
#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static Encoding,
    /// Charset label as the source declared it (prolog or transport).
    pub declared: Option<String>,
}

fn prolog_regex() -> &'static Regex {
    static PROLOG: OnceLock<Regex> = OnceLock::new();
    PROLOG.get_or_init(|| {
        Regex::new(r#"^\s*<\?xml[^>]*?\bencoding\s*=\s*["']([A-Za-z0-9._:\-]+)["']"#)
            .expect("prolog pattern is valid")
    })
}

/// Returns the `encoding` pseudo-attribute of the XML prolog, if any.
pub fn sniff_prolog(bytes: &[u8]) -> Option<String> {
    let head = &bytes[..bytes.len().min(PROLOG_SCAN_LIMIT)];
    prolog_regex()
        .captures(head)
        .and_then(|caps| caps.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned())
}

/// Extracts the `charset` parameter from a `Content-Type` header value.
pub fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// Maps a charset label to a supported decoder.
pub fn lookup(label: &str) -> Result<&'static Encoding> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| Error::Encoding(format!("Unknown charset: {}", label)))?;

    // ISO-8859-1 and US-ASCII labels resolve to windows-1252, a superset.
    if encoding == UTF_8 || encoding == WINDOWS_1252 || encoding == WINDOWS_1255 {
        Ok(encoding)
    } else {
        Err(Error::Encoding(format!("Unknown charset: {}", label)))
    }
}

/// Decodes raw feed bytes into UTF-8 text.
pub fn decode(bytes: &[u8], transport_charset: Option<&str>) -> Result<DecodedText> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        if encoding != UTF_8 {
            return Err(Error::Encoding(format!(
                "Unsupported byte-order mark for {}",
                encoding.name()
            )));
        }
        let (text, _) = UTF_8.decode_without_bom_handling(&bytes[bom_len..]);
        return Ok(DecodedText {
            text: text.into_owned(),
            encoding: UTF_8,
            declared: sniff_prolog(&bytes[bom_len..]),
        });
    }

    let declared = sniff_prolog(bytes).or_else(|| transport_charset.map(str::to_string));
    let encoding = match declared.as_deref() {
        Some(label) => lookup(label)?,
        None => UTF_8,
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        debug!("Replaced malformed {} sequences while decoding feed", encoding.name());
    }

    Ok(DecodedText {
        text: text.into_owned(),
        encoding,
        declared,
    })
}
