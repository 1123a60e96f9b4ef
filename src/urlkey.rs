//! URL validation and canonical storage-key derivation.
//!
//! Every fingerprint for a page lives under a reversed-domain key of the
//! form `com,example)/`, so that all captures of one host share a single
//! hash regardless of scheme, host case or trailing slashes.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

/// Strings shaped like an email address are never crawlable URLs.
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z0-9_.+\-]+@[a-zA-Z0-9\-]+\.[a-zA-Z0-9\-.]+$").expect("valid email regex")
});

/// Extracts the comma-separated host body out of a SURT-formatted URL.
static SURT_BODY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-zA-Z][a-zA-Z0-9+.-]*://\(([^)]+),\)$").expect("valid surt regex")
});

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cannot parse url {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("url {0} has no host")]
    NoHost(String),
    #[error("surt form {0} is not canonicalizable")]
    Unsupported(String),
}

/// Prefix `http://` when the input carries no explicit http(s) scheme.
/// The scheme check is case-insensitive so `HTTPS://host` is left alone.
pub fn with_scheme(raw: &str) -> String {
    let trimmed = raw.trim();
    let has_scheme = trimmed
        .get(..7)
        .is_some_and(|p| p.eq_ignore_ascii_case("http://"))
        || trimmed
            .get(..8)
            .is_some_and(|p| p.eq_ignore_ascii_case("https://"));
    if has_scheme {
        trimmed.to_string()
    } else {
        format!("http://{}", trimmed)
    }
}

/// Check whether a raw user-supplied string is a usable page URL.
///
/// Rejects empty strings, email addresses, anything that fails to parse
/// after an implicit `http://` prefix, and hosts without at least a
/// second-level label and a TLD (`http://roblox` is not a page).
pub fn url_is_valid(raw: &str) -> bool {
    if raw.is_empty() || EMAIL_RE.is_match(raw) {
        return false;
    }

    let parsed = match Url::parse(&with_scheme(raw)) {
        Ok(parsed) => parsed,
        Err(_) => return false,
    };
    let host = match parsed.host_str() {
        Some(host) => host,
        None => return false,
    };

    let labels: Vec<&str> = host.split('.').collect();
    labels.len() >= 2
        && !labels[labels.len() - 1].is_empty()
        && !labels[labels.len() - 2].is_empty()
}

/// Derive the canonical storage key for a raw URL.
///
/// `https://example.com/` becomes `com,example)/`. The host labels are
/// reversed into a SURT form `scheme://(com,example,)` and the
/// comma-separated body is extracted; a SURT form that does not match the
/// expected shape is an error rather than a silent fall-through.
pub fn canonical_key(raw: &str) -> Result<String, KeyError> {
    let with_scheme = with_scheme(raw);
    let parsed = Url::parse(&with_scheme).map_err(|source| KeyError::Parse {
        url: with_scheme.clone(),
        source,
    })?;
    let host = parsed
        .host_str()
        .ok_or_else(|| KeyError::NoHost(with_scheme.clone()))?;

    let mut labels: Vec<&str> = host.split('.').collect();
    labels.reverse();
    let surt = format!(
        "{}://({},)",
        parsed.scheme().to_ascii_lowercase(),
        labels.join(",")
    );

    let captures = SURT_BODY_RE
        .captures(&surt)
        .ok_or(KeyError::Unsupported(surt.clone()))?;
    Ok(format!("{})/", &captures[1]))
}
