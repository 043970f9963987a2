//! In-memory mapping from script id to its public tunnel URL.
//!
//! [`MappingRegistry`] keeps two indices that always move together:
//!
//! - **forward**: `script_id → TunnelRecord`
//! - **reverse**: `routing_token → script_id`, used by the public `/run/{token}`
//!   dispatch path so URLs never expose the raw script id.
//!
//! ## Concurrency
//!
//! Both maps sit behind one `RwLock`. Every mutation takes the write lock once
//! and updates both indices before releasing it, so a concurrent reader never
//! sees a half-linked entry. No I/O happens under the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

/// Length of the routing token embedded in public URLs.
pub const TOKEN_LEN: usize = 12;

/// Path segment preceding the token in a public URL.
pub const RUN_PATH: &str = "/run";

/// One published script.
#[derive(Debug, Clone, Serialize)]
pub struct TunnelRecord {
    pub script_id: String,
    /// Base URL of the shared tunnel at creation time.
    #[serde(rename = "tunnel_url")]
    pub public_base_url: String,
    #[serde(skip)]
    pub routing_token: String,
    /// `public_base_url` + `/run/{routing_token}`.
    pub complete_url: String,
    /// Epoch milliseconds.
    pub created_at: u64,
    /// Epoch milliseconds, `None` when the record only goes away on delete.
    pub expires_at: Option<u64>,
    #[serde(skip)]
    deadline: Option<Instant>,
}

impl TunnelRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|d| now >= d)
    }

    pub fn has_ttl(&self) -> bool {
        self.deadline.is_some()
    }
}

/// Result of [`MappingRegistry::create`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(TunnelRecord),
    /// The script already had a live record; it is returned unchanged.
    Existing(TunnelRecord),
}

impl CreateOutcome {
    pub fn record(&self) -> &TunnelRecord {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }

    pub fn into_record(self) -> TunnelRecord {
        match self {
            Self::Created(r) | Self::Existing(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created(_))
    }
}

/// Result of a removal. `emptied` is true only for the call that took the
/// registry from non-empty to empty, so exactly one caller observes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Removal {
    pub removed: Vec<String>,
    pub emptied: bool,
}

type TokenSource = dyn Fn() -> String + Send + Sync;

#[derive(Default)]
struct Indices {
    forward: HashMap<String, TunnelRecord>,
    reverse: HashMap<String, String>,
}

impl Indices {
    fn unlink(&mut self, script_id: &str) -> bool {
        match self.forward.remove(script_id) {
            Some(record) => {
                self.reverse.remove(&record.routing_token);
                true
            }
            None => false,
        }
    }

    fn check(&self) {
        debug_assert_eq!(
            self.forward.len(),
            self.reverse.len(),
            "forward/reverse index size mismatch"
        );
    }
}

/// Bidirectional script-id / routing-token index.
///
/// Cloneable - all clones share the same inner `Arc<RwLock<...>>`.
#[derive(Clone)]
pub struct MappingRegistry {
    inner: Arc<RwLock<Indices>>,
    tokens: Arc<TokenSource>,
}

impl Default for MappingRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::with_token_source(generate_token)
    }

    /// Registry drawing routing tokens from `source` instead of the default
    /// random generator.
    pub fn with_token_source(source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Indices::default())),
            tokens: Arc::new(source),
        }
    }

    /// Register `script_id` under `public_base_url`, or return its existing
    /// record untouched (no token rotation, no TTL change).
    pub async fn create(
        &self,
        script_id: &str,
        public_base_url: &str,
        ttl: Option<Duration>,
    ) -> CreateOutcome {
        let mut idx = self.inner.write().await;

        if let Some(existing) = idx.forward.get(script_id) {
            return CreateOutcome::Existing(existing.clone());
        }

        let token = loop {
            let candidate = (*self.tokens)();
            if !idx.reverse.contains_key(&candidate) {
                break candidate;
            }
            debug!("Routing token collision, regenerating");
        };

        let base = public_base_url.trim_end_matches('/');
        let created_at = epoch_ms(SystemTime::now());
        // A TTL past the clock's range means the record never expires.
        let ttl = ttl.and_then(|t| Some((t, Instant::now().checked_add(t)?)));
        let record = TunnelRecord {
            script_id: script_id.to_string(),
            public_base_url: base.to_string(),
            complete_url: format!("{base}{RUN_PATH}/{token}"),
            routing_token: token.clone(),
            created_at,
            expires_at: ttl.map(|(t, _)| {
                created_at.saturating_add(u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            }),
            deadline: ttl.map(|(_, deadline)| deadline),
        };

        idx.reverse.insert(token, script_id.to_string());
        idx.forward.insert(script_id.to_string(), record.clone());
        idx.check();

        match ttl {
            Some((t, _)) => info!(
                "Mapped {script_id} (expires in {}m), total: {}",
                t.as_secs() / 60,
                idx.forward.len()
            ),
            None => info!("Mapped {script_id}, total: {}", idx.forward.len()),
        }
        CreateOutcome::Created(record)
    }

    pub async fn lookup_by_script_id(&self, script_id: &str) -> Option<TunnelRecord> {
        self.inner.read().await.forward.get(script_id).cloned()
    }

    pub async fn lookup_by_token(&self, token: &str) -> Option<String> {
        self.inner.read().await.reverse.get(token).cloned()
    }

    /// Remove one mapping. Returns whether anything was removed and whether
    /// this call emptied the registry.
    pub async fn remove(&self, script_id: &str) -> Removal {
        let mut idx = self.inner.write().await;
        if !idx.unlink(script_id) {
            return Removal::default();
        }
        idx.check();
        info!("Unmapped {script_id}, remaining: {}", idx.forward.len());
        Removal {
            removed: vec![script_id.to_string()],
            emptied: idx.forward.is_empty(),
        }
    }

    /// Remove every record whose TTL has elapsed at `now`.
    pub async fn remove_expired(&self, now: Instant) -> Removal {
        let mut idx = self.inner.write().await;
        let mut expired: Vec<String> = idx
            .forward
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.script_id.clone())
            .collect();
        if expired.is_empty() {
            return Removal::default();
        }
        expired.sort();
        for id in &expired {
            idx.unlink(id);
        }
        idx.check();
        Removal {
            emptied: idx.forward.is_empty(),
            removed: expired,
        }
    }

    /// Drop every mapping. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let mut idx = self.inner.write().await;
        let count = idx.forward.len();
        idx.forward.clear();
        idx.reverse.clear();
        if count > 0 {
            info!("Cleared {count} mapping(s)");
        }
        count
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.forward.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.forward.is_empty()
    }

    /// All live records, oldest first.
    pub async fn list(&self) -> Vec<TunnelRecord> {
        let idx = self.inner.read().await;
        let mut records: Vec<TunnelRecord> = idx.forward.values().cloned().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.script_id.cmp(&b.script_id))
        });
        records
    }
}

/// 12 lowercase hex characters of SHA-256 over a fresh v4 UUID.
pub fn generate_token() -> String {
    let digest = Sha256::digest(uuid::Uuid::new_v4().as_bytes());
    let mut token = hex::encode(digest);
    token.truncate(TOKEN_LEN);
    token
}

fn epoch_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
