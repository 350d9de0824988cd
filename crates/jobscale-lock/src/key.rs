//! Lock identity: the key, its numeric id, and the owner string.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

/// Native advisory lock ids are kept in the positive 31-bit range so they
/// fit any backend's integer lock space.
const LOCK_ID_MASK: u32 = 0x7fff_ffff;

static INSTANCE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Map a lock key onto a stable positive 31-bit id.
pub fn lock_id_for(key: &str) -> i64 {
    let digest = Sha256::digest(key.as_bytes());
    let head = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    i64::from(head & LOCK_ID_MASK)
}

/// Everything a strategy needs to know about one lock instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockIdentity {
    pub key: String,
    pub id: i64,
    /// `{hostname}:{pid}:{instance}`; unique per `AdvisoryLock` value.
    pub owner: String,
}

impl LockIdentity {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            id: lock_id_for(&key),
            owner: next_owner(),
            key,
        }
    }
}

fn next_owner() -> String {
    let seq = INSTANCE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}:{}:{seq}", hostname(), std::process::id())
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| {
            std::fs::read_to_string("/etc/hostname")
                .ok()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
        })
        .unwrap_or_else(|| "localhost".to_string())
}
