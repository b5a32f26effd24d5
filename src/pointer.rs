// src/pointer.rs

//! RFC 6901 JSON Pointer subset
//!
//! Configuration operations address values inside a JSON document with a
//! pointer. The engine supports the escape sequences `~1` (for `/`) and
//! `~0` (for `~`). The empty pointer and the bare `/` pointer both address
//! the document root; root-level `set`/`unset` are treated as no-ops by the
//! executor and surfaced as plan warnings.

use crate::error::{Error, Result};
use serde_json::Value;

/// Decode a JSON pointer into its reference tokens
///
/// The empty string and `"/"` decode to no tokens (the document root).
/// Any other pointer must start with `/`.
///
/// ```
/// use setforge::pointer::decode;
///
/// assert_eq!(decode("").unwrap(), Vec::<String>::new());
/// assert_eq!(decode("/plugins/demo").unwrap(), vec!["plugins", "demo"]);
/// assert_eq!(decode("/a~1b/c~0d").unwrap(), vec!["a/b", "c~d"]);
/// assert!(decode("plugins").is_err());
/// ```
pub fn decode(pointer: &str) -> Result<Vec<String>> {
    if pointer.is_empty() || pointer == "/" {
        return Ok(Vec::new());
    }
    if !pointer.starts_with('/') {
        return Err(Error::InvalidPointer(pointer.to_string()));
    }

    Ok(pointer
        .split('/')
        .skip(1)
        .map(unescape_token)
        .collect())
}

/// Encode reference tokens back into a JSON pointer
///
/// The inverse of [`decode`]: `decode(&encode(tokens)) == tokens` for any
/// token list, and `encode(&[])` is the empty (root) pointer.
pub fn encode<S: AsRef<str>>(tokens: &[S]) -> String {
    let mut pointer = String::new();
    for token in tokens {
        pointer.push('/');
        pointer.push_str(&escape_token(token.as_ref()));
    }
    pointer
}

/// Look up the value a pointer addresses, if any
///
/// Objects are traversed by key; arrays by decimal index. Returns `None`
/// when any token fails to match.
pub fn resolve<'a>(doc: &'a Value, tokens: &[String]) -> Option<&'a Value> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map.get(token)?,
            Value::Array(items) => items.get(token.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}
