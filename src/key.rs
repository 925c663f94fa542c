use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// How keys are compared.
///
/// Matching is literal by default. With [`KeyPolicy::CaseInsensitive`] every key
/// and prefix is lower-cased before it touches the tree, so `"Foo"` and `"foo"`
/// name the same entry and keys are reported in their lower-cased form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyPolicy {
    #[default]
    CaseSensitive,
    CaseInsensitive,
}

impl KeyPolicy {
    /// Maps a caller supplied key into the form stored in the tree.
    pub fn normalize<'a>(&self, key: &'a str) -> Cow<'a, str> {
        match self {
            KeyPolicy::CaseSensitive => Cow::Borrowed(key),
            KeyPolicy::CaseInsensitive
                if key.chars().any(|c| !c.to_lowercase().eq(std::iter::once(c))) =>
            {
                Cow::Owned(key.to_lowercase())
            }
            KeyPolicy::CaseInsensitive => Cow::Borrowed(key),
        }
    }
}

/// Length in bytes of the longest common prefix of `a` and `b`.
///
/// The result always falls on a `char` boundary of both strings, so it can be
/// used to slice either one.
pub(crate) fn shared_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, ca), cb)| ca != cb)
        .map(|((idx, _), _)| idx)
        .unwrap_or_else(|| a.len().min(b.len()))
}

pub(crate) fn first_char(s: &str) -> Option<char> {
    s.chars().next()
}
