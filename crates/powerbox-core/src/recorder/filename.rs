//! Session file naming.

use alloc::format;
use alloc::string::String;

use super::{Format, RecorderError};
use crate::config::{MAX_FILE_INDEX, SCRIPT_NAME_MAX};
use crate::storage::Volume;

/// Keep `[A-Za-z0-9_-]`, map spaces to `_`, drop everything else, clip to
/// the script name limit. An empty result becomes `script`.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            c if c.is_ascii_alphanumeric() || c == '_' || c == '-' => Some(c),
            _ => None,
        })
        .take(SCRIPT_NAME_MAX)
        .collect();
    if out.is_empty() {
        out.push_str("script");
    }
    out
}

/// First free path for a new session.
///
/// Manual sessions use `power_data`, `power_data1`, ...; script sessions use
/// the sanitized script name, then `<name>_1`, ....
pub fn next_available<V: Volume>(
    volume: &mut V,
    script_name: Option<&str>,
    format: Format,
) -> Result<String, RecorderError> {
    let ext = format.extension();
    let (stem, separator) = match script_name {
        Some(name) => (sanitize(name), "_"),
        None => (String::from("power_data"), ""),
    };

    for index in 0..=MAX_FILE_INDEX {
        let path = if index == 0 {
            format!("/{}.{}", stem, ext)
        } else {
            format!("/{}{}{}.{}", stem, separator, index, ext)
        };
        if !volume.exists(&path) {
            return Ok(path);
        }
    }
    Err(RecorderError::NamesExhausted)
}
