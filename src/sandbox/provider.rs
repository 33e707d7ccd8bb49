//! Sandbox connection provisioning with TTL caching.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::SandboxConfig;

/// Number of random bytes behind each connection token.
const TOKEN_BYTES: usize = 24;

/// Upper bound on a connection TTL (ten years).
const MAX_TTL_SECONDS: u64 = 10 * 365 * 24 * 60 * 60;

/// An addressable sandbox endpoint, reusable until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConnection {
    pub slug: String,
    pub host: String,
    pub port: u16,
    pub token: String,
    pub ttl_seconds: u64,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub image: String,
    pub expires_at: DateTime<Utc>,
}

impl SandboxConnection {
    /// Whether the connection may still be handed out at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct ProviderState {
    cache: HashMap<String, SandboxConnection>,
    /// Connections provisioned so far; drives port allocation.
    provisioned: u32,
}

/// Allocates and caches sandbox connections keyed by slug.
///
/// Ports come from a monotonic counter so an expired entry never frees a port
/// that a still-live connection may hold.
pub struct SandboxProvider {
    config: SandboxConfig,
    state: Mutex<ProviderState>,
}

impl SandboxProvider {
    pub fn new(config: SandboxConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ProviderState::default()),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Returns the cached connection for `cache_key` (defaults to `slug`),
    /// provisioning a new one when absent or expired.
    pub fn ensure(&self, slug: &str, cache_key: Option<&str>) -> SandboxConnection {
        let key = cache_key.unwrap_or(slug);
        let now = Utc::now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(current) = state.cache.get(key) {
            if current.is_live_at(now) {
                return current.clone();
            }
        }

        state.cache.retain(|_, conn| conn.is_live_at(now));

        let port = self.allocate_port(&mut state);
        let connection = SandboxConnection {
            slug: self.format_slug(slug),
            host: self.config.host.clone(),
            port,
            token: generate_token(),
            ttl_seconds: self.config.ttl_seconds,
            cpu_limit: self.config.cpu_limit.clone(),
            memory_limit: self.config.memory_limit.clone(),
            image: self.config.image.clone(),
            expires_at: now + ttl_duration(self.config.ttl_seconds),
        };

        tracing::info!(
            cache_key = %key,
            slug = %connection.slug,
            port = connection.port,
            "provisioned sandbox connection"
        );

        state.cache.insert(key.to_string(), connection.clone());
        connection
    }

    /// Branch-scoped variant: cached under `slug#branch`, displayed as `slug-branch`.
    pub fn ensure_for_branch(&self, slug: &str, branch: &str) -> SandboxConnection {
        let cache_key = format!("{}#{}", slug, branch);
        let display = format!("{}-{}", slug, branch);
        self.ensure(&display, Some(&cache_key))
    }

    /// Number of cached entries, live or not.
    pub fn cached_len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache
            .len()
    }

    fn format_slug(&self, slug: &str) -> String {
        format!("{}{}{}", self.config.slug_prefix, slug, self.config.slug_suffix)
    }

    /// Next port from the counter. After the range `base_port..=u16::MAX` is
    /// used up the counter wraps, skipping ports held by live connections.
    fn allocate_port(&self, state: &mut ProviderState) -> u16 {
        let base = u32::from(self.config.base_port);
        let span = u32::from(u16::MAX) - base + 1;

        for _ in 0..span {
            let port = (base + state.provisioned % span) as u16;
            state.provisioned = state.provisioned.wrapping_add(1);
            if !state.cache.values().any(|conn| conn.port == port) {
                return port;
            }
        }

        tracing::warn!(base_port = base, "every sandbox port is held by a live connection");
        let port = (base + state.provisioned % span) as u16;
        state.provisioned = state.provisioned.wrapping_add(1);
        port
    }
}

fn ttl_duration(ttl_seconds: u64) -> ChronoDuration {
    ChronoDuration::seconds(ttl_seconds.min(MAX_TTL_SECONDS) as i64)
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
