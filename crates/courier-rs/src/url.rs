//! URL template composition.
//!
//! Templates use `{{name}}` placeholders. Composition substitutes path
//! parameters, then appends query parameters in insertion order. Relative
//! templates stay relative: they are resolved against a throwaway origin so
//! the `url` crate can normalize them, and the origin is stripped again.

use crate::config::QueryValue;
use crate::error::{Error, Result};
use ::url::Url;

const SCRATCH_ORIGIN: &str = "http://courier.invalid";

/// Substitute path parameters and append query parameters to `template`.
///
/// Placeholders without a matching parameter are left verbatim.
pub fn compose_url(
    template: &str,
    path_params: &[(String, String)],
    query_params: &[(String, QueryValue)],
) -> Result<String> {
    let mut path = template.to_string();
    for (name, value) in path_params {
        path = path.replace(&format!("{{{{{name}}}}}"), value);
    }

    let absolute = is_absolute(&path);
    let parsed = if absolute {
        Url::parse(&path)
    } else {
        Url::parse(SCRATCH_ORIGIN).and_then(|origin| origin.join(&path))
    };
    let mut url = parsed.map_err(|e| Error::InvalidUrl {
        url: path.clone(),
        reason: e.to_string(),
    })?;

    let pairs: Vec<(&str, &str)> = query_params
        .iter()
        .flat_map(|(name, value)| -> Vec<(&str, &str)> {
            match value {
                QueryValue::One(v) => vec![(name.as_str(), v.as_str())],
                QueryValue::Many(vs) => vs.iter().map(|v| (name.as_str(), v.as_str())).collect(),
                QueryValue::Absent => Vec::new(),
            }
        })
        .collect();
    if !pairs.is_empty() {
        url.query_pairs_mut().extend_pairs(pairs);
    }

    let composed = url.to_string();
    let composed = if absolute {
        composed
    } else {
        composed
            .strip_prefix(SCRATCH_ORIGIN)
            .map(str::to_string)
            .unwrap_or(composed)
    };
    Ok(restore_placeholders(&composed))
}

/// Join a base URL and an input path with exactly one slash between them.
///
/// An absolute input ignores the base.
pub fn join_url(base: Option<&str>, input: &str) -> String {
    match base {
        Some(base) if !base.is_empty() && !is_absolute(input) => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            input.trim_start_matches('/')
        ),
        _ => input.to_string(),
    }
}

/// Whether `url` carries its own scheme and host.
pub fn is_absolute(url: &str) -> bool {
    Url::parse(url).is_ok_and(|u| !u.cannot_be_a_base())
}

fn restore_placeholders(url: &str) -> String {
    url.replace("%7B%7B", "{{")
        .replace("%7D%7D", "}}")
        .replace("%7b%7b", "{{")
        .replace("%7d%7d", "}}")
}
