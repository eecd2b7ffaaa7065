//! Key folding used to compare stored keys with queries.
//!
//! An archive's header decides how loosely keys match:
//! - `KeyCaseSensitive="No"` (the default) compares case-insensitively
//! - `StripKey="Yes"` ignores everything but letters and digits
//! - resource archives (`.mdd`) treat `\` and `/` as the same separator
//!
//! Folding is applied to both sides of every comparison, so the prefix index and
//! the queries always agree.
//!
//! # Examples
//!
//! ```
//! use mdict_archive::utils::key_fold::KeyFolding;
//!
//! let folding = KeyFolding { fold_case: true, alpha_and_digit_only: false, unify_separators: false };
//! assert_eq!(folding.fold("Apple"), "apple");
//! assert_eq!(folding.fold("apple"), "apple");
//! ```

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Normalisation applied to keys before comparison.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFolding {
    /// Compare case-insensitively
    pub fold_case: bool,
    /// Drop every character that is not alphanumeric
    pub alpha_and_digit_only: bool,
    /// Treat `\` as `/`
    pub unify_separators: bool,
}

impl KeyFolding {
    /// Exact comparison, no folding at all.
    pub const EXACT: KeyFolding = KeyFolding { fold_case: false, alpha_and_digit_only: false, unify_separators: false };

    fn is_identity_for(&self, key: &str) -> bool {
        key.chars().all(|c| {
            !(self.fold_case && c.is_uppercase())
                && !(self.alpha_and_digit_only && !c.is_alphanumeric())
                && !(self.unify_separators && c == '\\')
        })
    }

    /// Folds `key`. Borrows when the key is already in folded form.
    pub fn fold<'a>(&self, key: &'a str) -> Cow<'a, str> {
        if self.is_identity_for(key) {
            return Cow::Borrowed(key);
        }
        let mut folded = String::with_capacity(key.len());
        for c in key.chars() {
            if self.alpha_and_digit_only && !c.is_alphanumeric() {
                continue;
            }
            if self.unify_separators && c == '\\' {
                folded.push('/');
            } else if self.fold_case && c.is_uppercase() {
                folded.extend(c.to_lowercase());
            } else {
                folded.push(c);
            }
        }
        Cow::Owned(folded)
    }
}
