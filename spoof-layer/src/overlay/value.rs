use std::borrow::Cow;
use std::fmt::Display;
use std::str::FromStr;

use ash::vk;
use serde_json::{Map, Value};
use tracing::warn;

/// Finds `key` in a description section. Keys of the form `name[i]` fall back to element
/// `i` of an array stored under `name`.
pub(crate) fn lookup<'a>(section: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    match section.get(key) {
        Some(value) => Some(value),
        None => {
            let (base, index) = split_index(key)?;
            section.get(base)?.as_array()?.get(index)
        }
    }
}

fn split_index(key: &str) -> Option<(&str, usize)> {
    let (base, index) = key.strip_suffix(']')?.split_once('[')?;
    Some((base, index.parse().ok()?))
}

/// Textual form of a scalar description value. `null` and nested values yield nothing.
pub(crate) fn text(value: &Value) -> Option<Cow<'_, str>> {
    match value {
        Value::String(s) => Some(Cow::Borrowed(s.as_str())),
        Value::Number(n) => Some(Cow::Owned(n.to_string())),
        Value::Bool(b) => Some(Cow::Borrowed(if *b { "1" } else { "0" })),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

pub(crate) fn lookup_text<'a>(section: &'a Map<String, Value>, key: &str) -> Option<Cow<'a, str>> {
    lookup(section, key).and_then(text)
}

pub(crate) fn parse<T>(key: &str, text: &str) -> Option<T>
where
    T: FromStr,
    T::Err: Display,
{
    match text.trim().parse() {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key, value = text, "ignoring unparseable override: {}", err);
            None
        }
    }
}

/// Parses a dotted `major.minor[.patch]` version into a packed Vulkan API version.
pub(crate) fn parse_api_version(text: &str) -> Option<u32> {
    let mut parts = text.trim().split('.').map(|part| part.parse::<u32>().ok());
    let major = parts.next()??;
    let minor = parts.next()??;
    let patch = parts.next().unwrap_or(Some(0))?;
    if parts.next().is_some() {
        return None;
    }
    Some(vk::make_api_version(0, major, minor, patch))
}
