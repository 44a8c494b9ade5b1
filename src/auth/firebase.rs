use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{parse_roles, AuthError, Identity, TokenVerifier};

const JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";
const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);
/// Unknown key ids refetch the key set at most this often.
const MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);
const CLOCK_SKEW_SECS: u64 = 60;

/// RSA public key as published in Google's JWK set.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
    iat: i64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    roles: Option<Value>,
}

struct KeyCache {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
    /// `None` for a pinned key set.
    expires_at: Option<Instant>,
}

#[derive(Debug)]
enum Lookup {
    Found(Jwk),
    Refetch,
    Reject,
}

impl KeyCache {
    fn lookup(&self, kid: &str, now: Instant) -> Lookup {
        let Some(expires_at) = self.expires_at else {
            return match self.keys.get(kid) {
                Some(key) => Lookup::Found(key.clone()),
                None => Lookup::Reject,
            };
        };

        if expires_at <= now {
            return Lookup::Refetch;
        }
        match self.keys.get(kid) {
            Some(key) => Lookup::Found(key.clone()),
            // Unknown kid: refetch only once the last fetch is old enough.
            None if now.saturating_duration_since(self.fetched_at) >= MIN_REFETCH_INTERVAL => {
                Lookup::Refetch
            }
            None => Lookup::Reject,
        }
    }
}

fn lookup(cache: &Option<KeyCache>, kid: &str) -> Lookup {
    cache
        .as_ref()
        .map_or(Lookup::Refetch, |cache| cache.lookup(kid, Instant::now()))
}

/// Verifies Firebase ID tokens (RS256 JWTs) against Google's published keys.
pub struct FirebaseVerifier {
    project_id: String,
    client: Client,
    jwks_url: String,
    cache: RwLock<Option<KeyCache>>,
}

impl FirebaseVerifier {
    pub fn new(project_id: impl Into<String>, client: Client) -> Self {
        Self {
            project_id: project_id.into(),
            client,
            jwks_url: JWKS_URL.to_string(),
            cache: RwLock::new(None),
        }
    }

    /// A verifier that never fetches and trusts exactly `keys`.
    pub fn with_keys(project_id: impl Into<String>, keys: Vec<Jwk>) -> Self {
        let verifier = Self::new(project_id, Client::new());
        let keys = keys.into_iter().map(|k| (k.kid.clone(), k)).collect();
        Self {
            cache: RwLock::new(Some(KeyCache {
                keys,
                fetched_at: Instant::now(),
                expires_at: None,
            })),
            ..verifier
        }
    }

    async fn key(&self, kid: &str) -> Result<Jwk, AuthError> {
        match lookup(&*self.cache.read().await, kid) {
            Lookup::Found(key) => return Ok(key),
            Lookup::Reject => return Err(unknown_key(kid)),
            Lookup::Refetch => {}
        }

        // Re-check under the write lock so concurrent misses share one fetch.
        let mut cache = self.cache.write().await;
        match lookup(&cache, kid) {
            Lookup::Found(key) => return Ok(key),
            Lookup::Reject => return Err(unknown_key(kid)),
            Lookup::Refetch => {}
        }

        let fresh = self.fetch_keys().await?;
        let key = fresh.keys.get(kid).cloned();
        *cache = Some(fresh);
        key.ok_or_else(|| unknown_key(kid))
    }

    async fn fetch_keys(&self) -> Result<KeyCache, AuthError> {
        let resp = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(AuthError::KeyFetch(format!(
                "key endpoint returned {}",
                resp.status()
            )));
        }

        let ttl = resp
            .headers()
            .get(reqwest::header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .and_then(max_age)
            .unwrap_or(DEFAULT_KEY_TTL);

        let set: JwkSet = resp
            .json()
            .await
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        tracing::debug!(keys = set.keys.len(), ttl_secs = ttl.as_secs(), "Fetched token signing keys");

        let now = Instant::now();
        Ok(KeyCache {
            keys: set.keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
            fetched_at: now,
            expires_at: Some(now + ttl),
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = CLOCK_SKEW_SECS;
        validation.set_audience(&[&self.project_id]);
        validation.set_issuer(&[format!("https://securetoken.google.com/{}", self.project_id)]);
        validation.set_required_spec_claims(&["exp", "iat", "aud", "iss", "sub"]);
        validation
    }
}

#[async_trait]
impl TokenVerifier for FirebaseVerifier {
    async fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(invalid)?;
        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "unsupported algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| AuthError::InvalidToken("missing key id".into()))?;

        let jwk = self.key(&kid).await?;
        let key = DecodingKey::from_rsa_components(&jwk.n, &jwk.e).map_err(invalid)?;
        let claims = decode::<Claims>(token, &key, &self.validation())
            .map_err(invalid)?
            .claims;

        if claims.iat - CLOCK_SKEW_SECS as i64 > chrono::Utc::now().timestamp() {
            return Err(AuthError::InvalidToken("issued in the future".into()));
        }
        if claims.sub.is_empty() || claims.sub.len() > 128 {
            return Err(AuthError::InvalidToken("invalid subject".into()));
        }

        Ok(Identity {
            uid: claims.sub,
            email: claims.email.unwrap_or_default(),
            name: claims.name,
            roles: parse_roles(claims.roles.as_ref()),
        })
    }
}

fn invalid(e: jsonwebtoken::errors::Error) -> AuthError {
    match e.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        _ => AuthError::InvalidToken(e.to_string()),
    }
}

fn unknown_key(kid: &str) -> AuthError {
    AuthError::InvalidToken(format!("unknown signing key {kid}"))
}

/// `max-age` from a Cache-Control header.
fn max_age(cache_control: &str) -> Option<Duration> {
    cache_control
        .split(',')
        .filter_map(|directive| directive.trim().strip_prefix("max-age="))
        .find_map(|secs| secs.parse().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use ring::rand::SystemRandom;
    use ring::signature::RsaKeyPair;
    use serde_json::json;

    const PROJECT: &str = "open-upload-test";
    const KID: &str = "test-key";

    fn test_key_pair() -> RsaKeyPair {
        let der = base64::engine::general_purpose::STANDARD
            .decode(include_str!("testdata/rsa_pkcs8.b64").trim())
            .unwrap();
        RsaKeyPair::from_pkcs8(&der).unwrap()
    }

    /// Nothing listens here; a fetch would fail with `KeyFetch`.
    const UNREACHABLE: &str = "http://127.0.0.1:9/keys";

    fn test_jwk() -> Jwk {
        Jwk {
            kid: KID.into(),
            n: include_str!("testdata/rsa_modulus.b64").trim().into(),
            e: "AQAB".into(),
        }
    }

    fn verifier() -> FirebaseVerifier {
        FirebaseVerifier::with_keys(PROJECT, vec![test_jwk()])
    }

    fn fetched_cache(fetched_at: Instant) -> KeyCache {
        KeyCache {
            keys: HashMap::from([(KID.to_string(), test_jwk())]),
            fetched_at,
            expires_at: Some(fetched_at + Duration::from_secs(3600)),
        }
    }

    fn sign(header: Value, claims: Value) -> String {
        let unsigned = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).unwrap()),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap()),
        );
        let key_pair = test_key_pair();
        let mut signature = vec![0u8; key_pair.public().modulus_len()];
        key_pair
            .sign(
                &ring::signature::RSA_PKCS1_SHA256,
                &SystemRandom::new(),
                unsigned.as_bytes(),
                &mut signature,
            )
            .unwrap();
        format!("{unsigned}.{}", URL_SAFE_NO_PAD.encode(signature))
    }

    fn claims(now: i64) -> Value {
        json!({
            "sub": "user-123",
            "aud": PROJECT,
            "iss": format!("https://securetoken.google.com/{PROJECT}"),
            "iat": now - 10,
            "exp": now + 3600,
            "email": "user@example.com",
            "roles": ["whitelisted"],
        })
    }

    fn header() -> Value {
        json!({"alg": "RS256", "kid": KID, "typ": "JWT"})
    }

    #[tokio::test]
    async fn accepts_valid_token() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(header(), claims(now));

        let identity = verifier().verify(&token).await.unwrap();
        assert_eq!(identity.uid, "user-123");
        assert_eq!(identity.email, "user@example.com");
        assert_eq!(identity.roles, vec!["whitelisted"]);
    }

    #[tokio::test]
    async fn rejects_tampered_claims() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(header(), claims(now));
        let parts: Vec<&str> = token.split('.').collect();
        let mut forged = claims(now);
        forged["roles"] = json!(["developer"]);
        let forged = format!(
            "{}.{}.{}",
            parts[0],
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged).unwrap()),
            parts[2]
        );

        assert!(matches!(
            verifier().verify(&forged).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn rejects_expired_token() {
        let now = chrono::Utc::now().timestamp();
        let mut expired = claims(now);
        expired["iat"] = json!(now - 7200);
        expired["exp"] = json!(now - 3600);

        assert!(matches!(
            verifier().verify(&sign(header(), expired)).await,
            Err(AuthError::Expired)
        ));
    }

    #[tokio::test]
    async fn rejects_wrong_audience() {
        let now = chrono::Utc::now().timestamp();
        let mut other = claims(now);
        other["aud"] = json!("another-project");

        assert!(matches!(
            verifier().verify(&sign(header(), other)).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn rejects_non_rs256() {
        let now = chrono::Utc::now().timestamp();
        let token = sign(json!({"alg": "HS256", "kid": KID}), claims(now));

        assert!(matches!(
            verifier().verify(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn rejects_garbage() {
        assert!(verifier().verify("not-a-token").await.is_err());
        assert!(verifier().verify("a.b.c.d").await.is_err());
    }

    #[test]
    fn unknown_kid_refetches_at_most_once_a_minute() {
        let now = Instant::now();
        let cache = fetched_cache(now);

        assert!(matches!(cache.lookup(KID, now + Duration::from_secs(10)), Lookup::Found(_)));
        assert!(matches!(
            cache.lookup("rotated", now + Duration::from_secs(10)),
            Lookup::Reject
        ));
        assert!(matches!(
            cache.lookup("rotated", now + Duration::from_secs(61)),
            Lookup::Refetch
        ));
        assert!(matches!(
            cache.lookup(KID, now + Duration::from_secs(3601)),
            Lookup::Refetch
        ));
    }

    #[test]
    fn pinned_keys_never_refetch() {
        let cache = KeyCache {
            keys: HashMap::from([(KID.to_string(), test_jwk())]),
            fetched_at: Instant::now(),
            expires_at: None,
        };
        let later = Instant::now() + Duration::from_secs(86_400);

        assert!(matches!(cache.lookup(KID, later), Lookup::Found(_)));
        assert!(matches!(cache.lookup("rotated", later), Lookup::Reject));
    }

    #[tokio::test]
    async fn pinned_verifier_rejects_unknown_kid_without_fetching() {
        let verifier = FirebaseVerifier {
            jwks_url: UNREACHABLE.into(),
            ..verifier()
        };
        let now = chrono::Utc::now().timestamp();
        let token = sign(json!({"alg": "RS256", "kid": "rotated"}), claims(now));

        assert!(matches!(
            verifier.verify(&token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn fresh_cache_rejects_unknown_kid_without_fetching() {
        let verifier = FirebaseVerifier {
            jwks_url: UNREACHABLE.into(),
            cache: RwLock::new(Some(fetched_cache(Instant::now()))),
            ..FirebaseVerifier::new(PROJECT, Client::new())
        };
        let now = chrono::Utc::now().timestamp();

        for attempt in 0..3 {
            let token = sign(
                json!({"alg": "RS256", "kid": format!("random-{attempt}")}),
                claims(now),
            );
            assert!(matches!(
                verifier.verify(&token).await,
                Err(AuthError::InvalidToken(_))
            ));
        }

        let token = sign(header(), claims(now));
        assert_eq!(verifier.verify(&token).await.unwrap().uid, "user-123");
    }

    #[tokio::test]
    async fn empty_cache_fetches_keys() {
        let verifier = FirebaseVerifier {
            jwks_url: UNREACHABLE.into(),
            ..FirebaseVerifier::new(PROJECT, Client::new())
        };
        let now = chrono::Utc::now().timestamp();

        assert!(matches!(
            verifier.verify(&sign(header(), claims(now))).await,
            Err(AuthError::KeyFetch(_))
        ));
    }

    #[test]
    fn reads_max_age() {
        assert_eq!(
            max_age("public, max-age=19967, must-revalidate, no-transform"),
            Some(Duration::from_secs(19967))
        );
        assert_eq!(max_age("no-cache"), None);
    }
}
