//! Field escaping for the external module protocol.
//!
//! Every field of a protocol line is escaped independently so that the
//! encoded text never contains a raw `:` (the field separator), a raw `=`
//! (the key/value separator) or a line break.
//!
//! | Input character            | Encoded as                  |
//! |----------------------------|-----------------------------|
//! | `%`                        | `%%`                        |
//! | code points `0..=31`       | `%` followed by `char(c + 64)` |
//! | `=`                        | `%}`                        |
//! | `:`                        | `%z`                        |
//! | anything else              | unchanged                   |

use crate::{ClientError, Result};

/// Escape character that introduces every encoded sequence.
const ESCAPE: char = '%';

/// Offset added to an escaped code point.
const SHIFT: u32 = 64;

/// Whether `c` must be escaped on the wire.
fn needs_escape(c: char) -> bool {
    u32::from(c) < 32 || matches!(c, '%' | '=' | ':')
}

/// Encode a single field.
///
/// # Examples
///
/// ```
/// use yate_extmodule::wire::escape::encode;
///
/// assert_eq!(encode("test%test"), "test%%test");
/// assert_eq!(encode("test\n"), "test%J");
/// ```
#[must_use]
pub fn encode(text: &str) -> String {
    if !text.chars().any(needs_escape) {
        return text.to_owned();
    }

    let mut out = String::with_capacity(text.len() + 8);
    for c in text.chars() {
        if c == ESCAPE {
            out.push_str("%%");
        } else if needs_escape(c) {
            out.push(ESCAPE);
            // c < 128 here, so the shifted value is always a valid char.
            out.push(char::from_u32(u32::from(c) + SHIFT).unwrap_or(c));
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode a single field.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] carrying the offending text when a `%`
/// is the last character, or when it is followed by a character whose code
/// is `<= 64` other than `%`.
pub fn decode(text: &str) -> Result<String> {
    if !text.contains(ESCAPE) {
        return Ok(text.to_owned());
    }

    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != ESCAPE {
            out.push(c);
            continue;
        }
        match chars.next() {
            None => {
                return Err(ClientError::Decode(format!(
                    "trailing escape character in '{text}'"
                )))
            }
            Some(ESCAPE) => out.push(ESCAPE),
            Some(next) if u32::from(next) <= SHIFT => {
                return Err(ClientError::Decode(format!(
                    "invalid escape sequence '%{next}' in '{text}'"
                )))
            }
            Some(next) => {
                let decoded = char::from_u32(u32::from(next) - SHIFT).ok_or_else(|| {
                    ClientError::Decode(format!("invalid escape sequence '%{next}' in '{text}'"))
                })?;
                out.push(decoded);
            }
        }
    }
    Ok(out)
}

/// Encode a `key=value` message parameter.
///
/// Both halves go through [`encode`], which never leaves a raw `=`, so the
/// joining `=` is the only one in the result.
#[must_use]
pub fn encode_parameter(key: &str, value: &str) -> String {
    format!("{}={}", encode(key), encode(value))
}

/// Decode a `key=value` message parameter.
///
/// The text is split at the first raw `=`; a parameter without `=` decodes
/// to an empty value.
///
/// # Errors
///
/// Returns [`ClientError::Decode`] when either half is malformed.
pub fn decode_parameter(text: &str) -> Result<(String, String)> {
    let (key, value) = text.split_once('=').unwrap_or((text, ""));
    Ok((decode(key)?, decode(value)?))
}
