//! Backing-store key derivation.

use crate::device::DeviceClass;

pub const DEFAULT_PREFIX: &str = "wallpaper";

/// Names of the per-class lists, locks and channels under one namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(prefix: &str) -> Self {
        let prefix = Self::sanitize_prefix(prefix.trim());
        let prefix = if prefix.is_empty() {
            DEFAULT_PREFIX.to_string()
        } else {
            prefix
        };
        Self { prefix }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Authoritative item list mirrored from storage.
    pub fn source_list(&self, class: DeviceClass) -> String {
        format!("{}:{}", self.prefix, class)
    }

    /// Consumable pool drained by draws.
    pub fn draw_queue(&self, class: DeviceClass) -> String {
        format!("{}:cache:{}", self.prefix, class)
    }

    pub fn refill_lock(&self, class: DeviceClass) -> String {
        format!("lock:{}:{}", self.prefix, class)
    }

    pub fn refill_channel(&self, class: DeviceClass) -> String {
        format!("{}_channel:{}", self.prefix, class)
    }

    pub fn rescan_lock(&self, class: DeviceClass) -> String {
        format!("lock:{}:rescan:{}", self.prefix, class)
    }

    /// Sanitize a prefix so it is safe to embed in Redis keys
    pub fn sanitize_prefix(prefix: &str) -> String {
        prefix
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == ':' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}
