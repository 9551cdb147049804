//! Identity types for translation jobs.
//!
//! A [`SessionKey`] names one document + target-language pair; at most one
//! task may run for it at a time. A [`TaskId`] names one in-flight attempt
//! at that session and is regenerated on every start.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::event::TaskKind;

macro_rules! typed_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from any string value.
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// View as string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

typed_id!(
    /// Identifier of the source document (for example a video id).
    ContentId
);
typed_id!(
    /// Identifier of one running job. Prefixed with the task kind.
    TaskId
);

impl TaskId {
    /// New random id such as `translate-0b6f...`.
    pub fn generate(kind: TaskKind) -> Self {
        Self(format!("{}-{}", kind.as_str(), uuid::Uuid::new_v4()))
    }
}

/// Logical identity of a translation job: content + target language.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionKey {
    pub content_id: ContentId,
    pub target_lang: String,
}

impl SessionKey {
    pub fn new(content_id: impl Into<ContentId>, target_lang: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            target_lang: target_lang.into(),
        }
    }

    /// Flat key used by stores, e.g. `abc123_Korean`.
    pub fn storage_key(&self) -> String {
        format!("{}_{}", self.content_id, self.target_lang)
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.content_id, self.target_lang)
    }
}
