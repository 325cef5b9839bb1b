use axum::http::{self, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::sync::Cache;
use std::time::Duration;
use tracing::{debug, warn};

/// Who is behind a connection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub authenticated: bool,
    pub user_id: Option<String>,
    pub name: Option<String>,
}

impl Identity {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn user(user_id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            authenticated: true,
            user_id: Some(user_id.into()),
            name,
        }
    }

    /// Identity id when authenticated
    pub fn id(&self) -> Option<&str> {
        if self.authenticated {
            self.user_id.as_deref()
        } else {
            None
        }
    }

    pub fn is(&self, user_id: Option<&str>) -> bool {
        matches!((self.id(), user_id), (Some(a), Some(b)) if a == b)
    }
}

/// Decoded token, valid until its `exp` claim
#[derive(Clone, Debug)]
struct CachedIdentity {
    identity: Identity,
    expires_at: Option<i64>,
}

impl CachedIdentity {
    fn is_live(&self, now: i64) -> bool {
        self.expires_at.map_or(true, |exp| now < exp)
    }
}

/// Resolves connection identities from JWTs, caching decoded tokens until
/// they expire.
pub struct IdentityProvider {
    secret: Option<String>,
    cache: Cache<String, CachedIdentity>,
}

impl IdentityProvider {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret,
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_idle(Duration::from_secs(5 * 60))
                .build(),
        }
    }

    /// Identity for an upgrade request. Missing or invalid tokens yield an
    /// anonymous identity.
    pub fn resolve(&self, headers: &HeaderMap) -> Identity {
        let secret = match &self.secret {
            Some(secret) => secret,
            None => return Identity::anonymous(),
        };
        let token = match get_auth_token(headers) {
            Ok(token) => token,
            Err(reason) => {
                debug!("Connecting anonymously: {}", reason);
                return Identity::anonymous();
            }
        };

        if let Some(cached) = self.cache.get(&token) {
            if cached.is_live(chrono::Utc::now().timestamp()) {
                return cached.identity;
            }
            debug!("Cached token of {:?} expired, validating again", cached.identity.user_id);
            self.cache.invalidate(&token);
        }

        match validate_jwt(&token, secret) {
            Ok(token_data) => {
                let claims = token_data.claims;
                match claims.get("sub").and_then(|v| v.as_str()) {
                    Some(uid) => {
                        let name = claims.get("name").and_then(|v| v.as_str()).map(str::to_string);
                        let identity = Identity::user(uid, name);
                        let expires_at = claims.get("exp").and_then(|v| v.as_i64());
                        self.cache.insert(token, CachedIdentity { identity: identity.clone(), expires_at });
                        identity
                    }
                    None => {
                        warn!("JWT token does not contain 'sub' claim");
                        Identity::anonymous()
                    }
                }
            }
            Err(e) => {
                warn!("JWT validation failed: {}", e);
                Identity::anonymous()
            }
        }
    }
}

// Get the auth token from the request headers
pub fn get_auth_token(headers: &HeaderMap) -> Result<String, String> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string())
    }
    // 2. Try to get token from cookies
    else {
        let cookie_header = headers.get(http::header::COOKIE)
            .ok_or_else(|| "Missing Authorization header or Cookie".to_string())?
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;

        for c in cookie::Cookie::split_parse(cookie_header).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
        Err("auth_token cookie not found".to_string())
    }
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token(secret: &str, sub: &str) -> String {
        let claims = serde_json::json!({
            "sub": sub,
            "name": "Ada",
            "exp": chrono::Utc::now().timestamp() + 600,
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    #[test]
    fn reads_bearer_and_cookie_tokens() {
        let mut headers = HeaderMap::new();
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(get_auth_token(&headers).unwrap(), "abc");

        let mut headers = HeaderMap::new();
        headers.insert(http::header::COOKIE, HeaderValue::from_static("theme=dark; auth_token=xyz"));
        assert_eq!(get_auth_token(&headers).unwrap(), "xyz");

        assert!(get_auth_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn resolves_valid_tokens_and_falls_back_to_anonymous() {
        let provider = IdentityProvider::new(Some("secret".to_string()));

        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token("secret", "user-1"));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        let identity = provider.resolve(&headers);
        assert_eq!(identity, Identity::user("user-1", Some("Ada".to_string())));

        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", token("other-secret", "user-1"));
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        assert_eq!(provider.resolve(&headers), Identity::anonymous());

        assert_eq!(provider.resolve(&HeaderMap::new()), Identity::anonymous());
    }

    #[test]
    fn expired_cached_tokens_fall_back_to_anonymous() {
        let provider = IdentityProvider::new(Some("secret".to_string()));
        let expired_at = chrono::Utc::now().timestamp() - 120;
        let claims = serde_json::json!({ "sub": "user-1", "exp": expired_at });
        let stale = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();

        // decoded while it was still valid
        provider.cache.insert(
            stale.clone(),
            CachedIdentity { identity: Identity::user("user-1", None), expires_at: Some(expired_at) },
        );

        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", stale);
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        assert_eq!(provider.resolve(&headers), Identity::anonymous());
        assert!(provider.cache.get(&stale).is_none());
    }

    #[test]
    fn live_tokens_are_served_from_cache() {
        let provider = IdentityProvider::new(Some("secret".to_string()));
        let live = token("secret", "user-1");
        let mut headers = HeaderMap::new();
        let value = format!("Bearer {}", live);
        headers.insert(http::header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());

        let first = provider.resolve(&headers);
        let cached = provider.cache.get(&live).unwrap();
        assert_eq!(cached.identity, first);
        assert!(cached.is_live(chrono::Utc::now().timestamp()));
        assert_eq!(provider.resolve(&headers), first);
    }

    #[test]
    fn identity_matching_requires_authentication() {
        let user = Identity::user("u1", None);
        assert!(user.is(Some("u1")));
        assert!(!user.is(Some("u2")));
        assert!(!user.is(None));

        let spoofed = Identity { authenticated: false, user_id: Some("u1".into()), name: None };
        assert!(!spoofed.is(Some("u1")));
    }
}
