//! Options controlling how an archive is opened and queried.
//!
//! Options can be built in code or loaded from JSON:
//!
//! ```
//! use mdict_archive::{ArchiveOptions, CacheCapacity};
//!
//! let options = ArchiveOptions::from_json(r#"{ "cache": { "bytes": 8388608 }, "follow_links": true }"#)?;
//! assert_eq!(options.cache, CacheCapacity::Bytes(8 << 20));
//! assert!(options.follow_links);
//! assert!(options.lazy_records);
//! # Ok::<(), mdict_archive::MdictError>(())
//! ```

use serde::{Deserialize, Serialize};

use crate::crypto::encryption::RegistrationKey;
use crate::storage::record_cache::CacheCapacity;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveOptions {
    /// Bound of the decoded record block cache
    pub cache: CacheCapacity,
    /// Decode record blocks on first use. When false, `open` decodes and verifies
    /// every record block up front.
    pub lazy_records: bool,
    /// Follow `@@@LINK=` redirects when resolving text records
    pub follow_links: bool,
    /// Needed for registered archives only
    pub registration: Option<RegistrationKey>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            cache: CacheCapacity::default(),
            lazy_records: true,
            follow_links: false,
            registration: None,
        }
    }
}

impl ArchiveOptions {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn with_cache(mut self, cache: CacheCapacity) -> Self {
        self.cache = cache;
        self
    }

    /// Verify every record block while opening.
    pub fn eager(mut self) -> Self {
        self.lazy_records = false;
        self
    }

    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }

    pub fn with_registration(mut self, registration: RegistrationKey) -> Self {
        self.registration = Some(registration);
        self
    }
}
