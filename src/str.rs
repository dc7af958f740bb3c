//! Some string type helpers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// `Str` is an immutable string that can be cloned cheaply.
///
/// Compiled flags hand out keys with every decision, so they're stored as `Str` instead of
/// `String`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Str(Arc<str>);

impl std::fmt::Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<T: Into<Arc<str>>> From<T> for Str {
    fn from(value: T) -> Str {
        Str(value.into())
    }
}

impl AsRef<str> for Str {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Str {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Str {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}
