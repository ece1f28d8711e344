//! `WWW-Authenticate: Digest ...` parsing.

use crate::error::DigestError;

/// Algorithm assumed when the challenge omits the directive (RFC 2617 §3.2.1).
const DEFAULT_ALGORITHM: &str = "MD5";

/// The parts of a Digest challenge needed to answer it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub realm: String,
    pub nonce: String,
    /// Algorithm as advertised by the device (e.g. `MD5`, `SHA-256`).
    pub algorithm: String,
}

/// Extracts realm, nonce and algorithm from one or more challenge header values.
///
/// Values for other schemes (e.g. `Basic`) are skipped. Unknown directives
/// are ignored. When several Digest values are present, later directives
/// override earlier ones.
pub fn parse_challenge<I, S>(values: I) -> Result<Challenge, DigestError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = false;
    let mut realm = None;
    let mut nonce = None;
    let mut algorithm = None;

    for value in values {
        let Some(params) = strip_digest_scheme(value.as_ref()) else {
            continue;
        };
        seen = true;

        for (name, value) in split_directives(params) {
            if name.eq_ignore_ascii_case("realm") {
                realm = Some(value);
            } else if name.eq_ignore_ascii_case("nonce") {
                nonce = Some(value);
            } else if name.eq_ignore_ascii_case("algorithm") {
                algorithm = Some(value);
            }
        }
    }

    if !seen {
        return Err(DigestError::MissingChallenge);
    }

    Ok(Challenge {
        realm: realm.unwrap_or_default(),
        nonce: nonce.ok_or(DigestError::MissingDirective("nonce"))?,
        algorithm: algorithm
            .filter(|a| !a.is_empty())
            .unwrap_or_else(|| DEFAULT_ALGORITHM.to_string()),
    })
}

/// Returns the directive list if `value` is a Digest challenge.
fn strip_digest_scheme(value: &str) -> Option<&str> {
    let value = value.trim();
    let scheme = value.get(..6)?;
    if !scheme.eq_ignore_ascii_case("digest") {
        return None;
    }
    let rest = &value[6..];
    if rest.is_empty() || rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        Some(rest)
    } else {
        None
    }
}

/// Splits `name=value, name="quoted, value"` into pairs.
///
/// Quoted values may contain commas, `=` and backslash escapes.
fn split_directives(input: &str) -> Vec<(&str, String)> {
    let mut out = Vec::new();
    let mut rest = input;

    loop {
        rest = rest.trim_start_matches(|c: char| c == ',' || c.is_ascii_whitespace());
        if rest.is_empty() {
            return out;
        }

        let name_end = rest.find(['=', ',']).unwrap_or(rest.len());
        let name = rest[..name_end].trim();
        rest = &rest[name_end..];

        // Bare token without a value.
        let Some(after_eq) = rest.strip_prefix('=') else {
            continue;
        };
        rest = after_eq.trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut buf = String::new();
            let mut end = quoted.len();
            let mut chars = quoted.char_indices();
            while let Some((i, c)) = chars.next() {
                match c {
                    '\\' => {
                        if let Some((_, escaped)) = chars.next() {
                            buf.push(escaped);
                        }
                    }
                    '"' => {
                        end = i + 1;
                        break;
                    }
                    _ => buf.push(c),
                }
            }
            rest = &quoted[end..];
            buf
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let token = rest[..end].trim().to_string();
            rest = &rest[end..];
            token
        };

        out.push((name, value));
    }
}
