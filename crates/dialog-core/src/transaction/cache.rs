use std::collections::HashMap;

use bytes::Bytes;
use md5::{Digest, Md5};

use b2bua_sip_core::HostPort;

/// MD5 digest of a raw datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; 16]);

impl Checksum {
    pub fn of(data: &[u8]) -> Self {
        let digest = Md5::digest(data);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest);
        Checksum(out)
    }
}

/// What to do when a datagram is seen again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    /// Drop it
    Swallow,
    /// Send this datagram back
    Reply { data: Bytes, destination: HostPort },
}

/// Two generation duplicate cache.
///
/// Lookups consult both generations; [`RetransmitCache::rotate`] drops the
/// older one, so an entry lives between one and two rotation periods.
#[derive(Debug, Default)]
pub struct RetransmitCache {
    current: HashMap<Checksum, CacheEntry>,
    previous: HashMap<Checksum, CacheEntry>,
}

impl RetransmitCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, checksum: &Checksum) -> Option<&CacheEntry> {
        self.current
            .get(checksum)
            .or_else(|| self.previous.get(checksum))
    }

    pub fn insert(&mut self, checksum: Checksum, entry: CacheEntry) {
        self.current.insert(checksum, entry);
    }

    pub fn rotate(&mut self) {
        self.previous = std::mem::take(&mut self.current);
    }

    pub fn len(&self) -> usize {
        self.current.len() + self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.current.is_empty() && self.previous.is_empty()
    }
}
