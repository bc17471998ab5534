//! Short-lived single-use tokens for email verification.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

pub const DEFAULT_TTL_MINUTES: i64 = 60;
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempToken {
    pub email: String,
    pub parent_id: Option<Uuid>,
    pub expires: DateTime<Utc>,
}

impl TempToken {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires <= now
    }
}

pub struct TempTokenStore {
    tokens: Mutex<HashMap<String, TempToken>>,
    ttl: Duration,
}

impl TempTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            tokens: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TempToken>> {
        self.tokens.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn issue(&self, email: &str, parent_id: Option<Uuid>) -> String {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let entry = TempToken {
            email: email.trim().to_lowercase(),
            parent_id,
            expires: Utc::now() + self.ttl,
        };
        self.lock().insert(token.clone(), entry);
        debug!(parent_id = ?parent_id, "Temporary token issued");
        token
    }

    /// Removes and returns the entry for `token`. Expired tokens are
    /// removed and rejected.
    pub fn consume(&self, token: &str) -> Option<TempToken> {
        let entry = self.lock().remove(token.trim())?;
        if entry.is_expired(Utc::now()) {
            return None;
        }
        Some(entry)
    }

    /// Drops expired entries and returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut tokens = self.lock();
        let before = tokens.len();
        tokens.retain(|_, entry| !entry.is_expired(now));
        before - tokens.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs [`sweep`](Self::sweep) every `every` until the runtime shuts down.
    pub fn spawn_sweeper(self: Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                let removed = self.sweep();
                if removed > 0 {
                    info!(removed, remaining = self.len(), "Expired temporary tokens swept");
                }
            }
        })
    }
}

impl Default for TempTokenStore {
    fn default() -> Self {
        Self::new(Duration::minutes(DEFAULT_TTL_MINUTES))
    }
}
