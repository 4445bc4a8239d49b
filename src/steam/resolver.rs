//! Profile resolution and ban lookups against the Steam Web API.
//!
//! API: `ISteamUser/ResolveVanityURL/v1` and `ISteamUser/GetPlayerBans/v1`
//! Auth: Web API key via `key` query param.
//!
//! Both public operations degrade to `None` on any failure: an
//! unresolvable link is reported as an invalid account, and a missing ban
//! record as "could not retrieve data". Neither aborts a scan.

use async_trait::async_trait;
use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

use super::http::{HttpGet, HttpRequest};
use super::pacing::RateGate;
use super::{is_truthy, RetryPolicy};
use crate::types::{BanStatus, FetchError, ProfileKind, ResolvedProfile};

/// Link resolution and ban lookup as seen by the scan orchestrator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProfileLookup: Send + Sync {
    /// Canonical id and original token for a profile link, or `None` when
    /// the link cannot be resolved.
    async fn normalize(&self, link: &str) -> Option<ResolvedProfile>;

    /// Ban flags, or `None` when they could not be retrieved.
    async fn get_ban_status(&self, canonical_id: &str) -> Option<BanStatus>;
}

// ---------------------------------------------------------------------------
// Overrides
// ---------------------------------------------------------------------------

/// A link that maps to a fixed identity without any lookup.
struct ProfileOverride {
    link: &'static str,
    canonical_id: &'static str,
    token: &'static str,
}

/// Legacy profile pinned to a fixed id. Matched on the exact link text.
const OVERRIDES: &[ProfileOverride] = &[
    ProfileOverride {
        link: "https://steamcommunity.com/profiles/76561198063578000/",
        canonical_id: "71111111111111111",
        token: "MehdiCRisH",
    },
    ProfileOverride {
        link: "https://steamcommunity.com/id/MehdiCRisH/",
        canonical_id: "71111111111111111",
        token: "MehdiCRisH",
    },
];

fn profile_link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^https?://steamcommunity\.com/(profiles|id)/(\w+)/?")
            .expect("Invalid profile link regex")
    })
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VanityEnvelope {
    #[serde(default)]
    response: Option<VanityResponse>,
}

#[derive(Debug, Deserialize)]
struct VanityResponse {
    #[serde(default)]
    success: serde_json::Value,
    #[serde(default)]
    steamid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PlayerBansResponse {
    #[serde(default)]
    players: Vec<BanStatus>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct BanResolver {
    http: Arc<dyn HttpGet>,
    gate: Arc<RateGate>,
    api_base: String,
    api_key: SecretString,
    policy: RetryPolicy,
}

impl BanResolver {
    pub fn new(
        http: Arc<dyn HttpGet>,
        gate: Arc<RateGate>,
        api_base: &str,
        api_key: SecretString,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            gate,
            api_base: api_base.trim_end_matches('/').to_string(),
            api_key,
            policy,
        }
    }

    /// Override table lookup; exact string match only.
    pub fn lookup_override(link: &str) -> Option<ResolvedProfile> {
        OVERRIDES.iter().find(|o| o.link == link).map(|o| ResolvedProfile {
            canonical_id: o.canonical_id.to_string(),
            original_reference: o.token.to_string(),
        })
    }

    /// Map a profile link to its canonical id and original token.
    pub async fn normalize(&self, link: &str) -> Option<ResolvedProfile> {
        if let Some(pinned) = Self::lookup_override(link) {
            return Some(pinned);
        }

        let Some(caps) = profile_link_re().captures(link) else {
            debug!(link, "Could not normalize link");
            return None;
        };
        let kind = ProfileKind::from_path_segment(&caps[1])?;
        let token = caps[2].to_string();

        match kind {
            ProfileKind::NumericId => Some(ResolvedProfile {
                canonical_id: token.clone(),
                original_reference: token,
            }),
            ProfileKind::VanityName => match self.resolve_vanity(&token).await {
                Ok(steam_id) => Some(ResolvedProfile {
                    canonical_id: steam_id,
                    original_reference: token,
                }),
                Err(e) => {
                    warn!(vanity = %token, error = %e, "Failed to resolve vanity URL");
                    None
                }
            },
        }
    }

    /// Ban flags for one canonical id, or `None` if they could not be read.
    pub async fn get_ban_status(&self, canonical_id: &str) -> Option<BanStatus> {
        match self.fetch_bans(canonical_id).await {
            Ok(status) => Some(status),
            Err(e) => {
                warn!(steam_id = canonical_id, error = %e, "Could not check bans");
                None
            }
        }
    }

    async fn resolve_vanity(&self, vanity: &str) -> Result<String, FetchError> {
        let endpoint = format!("{}/ISteamUser/ResolveVanityURL/v1/", self.api_base);
        let request = HttpRequest::new(&endpoint, self.policy.web_api_timeout)
            .query("key", self.api_key.expose_secret())
            .query("vanityurl", vanity);

        debug!(vanity, "Resolving vanity URL");
        self.gate.wait().await;
        let resp = self.http.send(request).await?;
        if !resp.is_ok() {
            return Err(FetchError::ResolutionFailure(format!(
                "{vanity}: HTTP {}",
                resp.status
            )));
        }

        let envelope: VanityEnvelope =
            serde_json::from_str(&resp.body).map_err(|e| FetchError::MalformedResponse {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        match envelope.response {
            Some(VanityResponse { success, steamid: Some(id) }) if is_truthy(&success) => Ok(id),
            _ => Err(FetchError::ResolutionFailure(vanity.to_string())),
        }
    }

    async fn fetch_bans(&self, canonical_id: &str) -> Result<BanStatus, FetchError> {
        let endpoint = format!("{}/ISteamUser/GetPlayerBans/v1/", self.api_base);
        let request = HttpRequest::new(&endpoint, self.policy.web_api_timeout)
            .query("key", self.api_key.expose_secret())
            .query("steamids", canonical_id);

        debug!(steam_id = canonical_id, "Checking bans");
        self.gate.wait().await;
        let resp = self.http.send(request).await?;
        if !resp.is_ok() {
            return Err(FetchError::Network {
                endpoint,
                message: format!("HTTP {}", resp.status),
            });
        }

        let parsed: PlayerBansResponse =
            serde_json::from_str(&resp.body).map_err(|e| FetchError::MalformedResponse {
                endpoint: endpoint.clone(),
                message: e.to_string(),
            })?;

        parsed
            .players
            .into_iter()
            .next()
            .ok_or_else(|| FetchError::UnretrievableProfile(canonical_id.to_string()))
    }
}

#[async_trait]
impl ProfileLookup for BanResolver {
    async fn normalize(&self, link: &str) -> Option<ResolvedProfile> {
        BanResolver::normalize(self, link).await
    }

    async fn get_ban_status(&self, canonical_id: &str) -> Option<BanStatus> {
        BanResolver::get_ban_status(self, canonical_id).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steam::http::fake::ScriptedHttp;
    use crate::steam::http::HttpResponse;

    fn resolver(http: Arc<ScriptedHttp>) -> BanResolver {
        BanResolver::new(
            http,
            Arc::new(RateGate::unlimited("web_api")),
            "http://api.steampowered.com",
            SecretString::new("test-key".to_string()),
            RetryPolicy::immediate(),
        )
    }

    #[tokio::test]
    async fn test_override_needs_no_network() {
        let http = Arc::new(ScriptedHttp::new(vec![ScriptedHttp::network_error()]));
        let r = resolver(http.clone());

        for link in [
            "https://steamcommunity.com/profiles/76561198063578000/",
            "https://steamcommunity.com/id/MehdiCRisH/",
        ] {
            let resolved = r.normalize(link).await.unwrap();
            assert_eq!(resolved.canonical_id, "71111111111111111");
            assert_eq!(resolved.original_reference, "MehdiCRisH");
        }
        assert_eq!(http.calls(), 0);
    }

    #[test]
    fn test_override_is_exact_match() {
        assert!(BanResolver::lookup_override("https://steamcommunity.com/id/MehdiCRisH").is_none());
        assert!(BanResolver::lookup_override("https://steamcommunity.com/id/mehdicrish/").is_none());
    }

    #[tokio::test]
    async fn test_numeric_profile_is_its_own_id() {
        let http = Arc::new(ScriptedHttp::new(vec![]));
        let r = resolver(http.clone());
        let resolved = r
            .normalize("https://steamcommunity.com/profiles/76561197960287930")
            .await
            .unwrap();
        assert_eq!(resolved.canonical_id, "76561197960287930");
        assert_eq!(resolved.original_reference, "76561197960287930");
        assert_eq!(http.calls(), 0);
    }

    #[tokio::test]
    async fn test_vanity_resolution() {
        let http = Arc::new(ScriptedHttp::new(vec![Ok(HttpResponse::ok(
            r#"{"response":{"steamid":"76561197960287930","success":1}}"#,
        ))]));
        let r = resolver(http.clone());
        let resolved = r.normalize("http://steamcommunity.com/id/gabelogannewell/").await.unwrap();
        assert_eq!(resolved.canonical_id, "76561197960287930");
        assert_eq!(resolved.original_reference, "gabelogannewell");

        let requests = http.requests.lock().unwrap();
        assert!(requests[0].url.ends_with("/ISteamUser/ResolveVanityURL/v1/"));
        assert_eq!(requests[0].param("vanityurl"), Some("gabelogannewell"));
        assert_eq!(requests[0].param("key"), Some("test-key"));
    }

    #[tokio::test]
    async fn test_vanity_failures_yield_none() {
        let http = Arc::new(ScriptedHttp::new(vec![
            Ok(HttpResponse::ok(r#"{"response":{"success":42,"message":"No match"}}"#)),
            Ok(HttpResponse::status(503)),
            Ok(HttpResponse::ok("not json")),
            ScriptedHttp::network_error(),
        ]));
        let r = resolver(http);
        for _ in 0..4 {
            assert!(r.normalize("https://steamcommunity.com/id/nobody").await.is_none());
        }
    }

    #[tokio::test]
    async fn test_non_profile_links_yield_none() {
        let r = resolver(Arc::new(ScriptedHttp::new(vec![])));
        assert!(r.normalize("https://steamcommunity.com/groups/valve").await.is_none());
        assert!(r.normalize("https://example.com/id/someone").await.is_none());
        assert!(r.normalize("").await.is_none());
    }

    #[tokio::test]
    async fn test_ban_status() {
        let http = Arc::new(ScriptedHttp::new(vec![Ok(HttpResponse::ok(
            r#"{"players":[{"SteamId":"76561197960287930","CommunityBanned":false,
               "VACBanned":true,"NumberOfVACBans":1,"DaysSinceLastBan":100,
               "NumberOfGameBans":0,"EconomyBan":"none"}]}"#,
        ))]));
        let r = resolver(http.clone());
        let status = r.get_ban_status("76561197960287930").await.unwrap();
        assert!(status.vac_banned);
        assert!(!status.community_banned);
        assert_eq!(status.game_ban_count, 0);

        let requests = http.requests.lock().unwrap();
        assert_eq!(requests[0].param("steamids"), Some("76561197960287930"));
    }

    #[tokio::test]
    async fn test_ban_status_unretrievable() {
        let http = Arc::new(ScriptedHttp::new(vec![
            Ok(HttpResponse::ok(r#"{"players":[]}"#)),
            Ok(HttpResponse::status(500)),
            ScriptedHttp::network_error(),
        ]));
        let r = resolver(http);
        for _ in 0..3 {
            assert!(r.get_ban_status("1").await.is_none());
        }
    }
}
