//! OpenID Connect identity provider: discovery, code exchange, refresh and
//! ID-token verification.
//!
//! Discovery and the JWKS are fetched once when the provider is built and cached
//! for the lifetime of the process. An ID token signed with an unknown `kid`
//! triggers exactly one JWKS re-fetch (key rotation).
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use parking_lot::RwLock;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("discovery failed: {0}")]
    Discovery(String),
    #[error("identity provider transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("identity provider answered with status {status}")]
    Status { status: u16 },
    #[error("id token rejected: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
    #[error("unsupported id token algorithm {0:?}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("missing key id")]
    MissingKeyId,
    #[error("signing key not found")]
    UnknownKey,
}

/// Parameters of one authorization redirect.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub state: String,
    pub nonce: String,
    pub code_challenge: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenSet {
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub nonce: Option<String>,
}

/// Login capability the OAuth2 flow is built on.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    fn issuer(&self) -> &str;

    fn authorization_url(&self, request: &AuthorizationRequest) -> Url;

    async fn exchange_code(&self, code: &str, pkce_verifier: &str)
    -> Result<TokenSet, ProviderError>;

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError>;

    /// Verify signature, issuer, audience and expiry.
    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct OidcSettings {
    pub issuer: Url,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: Url,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: Url,
    pub token_endpoint: Url,
    pub jwks_uri: Url,
}

pub struct OidcProvider {
    client: reqwest::Client,
    settings: OidcSettings,
    metadata: ProviderMetadata,
    jwks: RwLock<JwkSet>,
}

impl std::fmt::Debug for OidcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Do not print the client secret
        f.debug_struct("OidcProvider")
            .field("issuer", &self.metadata.issuer)
            .field("client_id", &self.settings.client_id)
            .finish_non_exhaustive()
    }
}

fn discovery_url(issuer: &Url) -> Result<Url, ProviderError> {
    let base = format!("{}/", issuer.as_str().trim_end_matches('/'));
    Url::parse(&base)
        .and_then(|u| u.join(".well-known/openid-configuration"))
        .map_err(|e| ProviderError::Discovery(e.to_string()))
}

fn is_algorithm_allowed(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

impl OidcProvider {
    /// Fetch discovery metadata and the JWKS.
    pub async fn discover(settings: OidcSettings, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        let url = discovery_url(&settings.issuer)?;
        let res = client.get(url).send().await?;
        if !res.status().is_success() {
            return Err(ProviderError::Status {
                status: res.status().as_u16(),
            });
        }
        let metadata: ProviderMetadata = res.json().await?;

        let expected = settings.issuer.as_str().trim_end_matches('/');
        if metadata.issuer.trim_end_matches('/') != expected {
            return Err(ProviderError::Discovery(format!(
                "issuer mismatch: discovered {}",
                metadata.issuer
            )));
        }

        let jwks = fetch_jwks(&client, &metadata.jwks_uri).await?;
        tracing::info!(
            issuer = %metadata.issuer,
            keys = jwks.keys.len(),
            "oidc provider discovered"
        );

        Ok(Self::from_parts(client, settings, metadata, jwks))
    }

    pub fn from_parts(
        client: reqwest::Client,
        settings: OidcSettings,
        metadata: ProviderMetadata,
        jwks: JwkSet,
    ) -> Self {
        Self {
            client,
            settings,
            metadata,
            jwks: RwLock::new(jwks),
        }
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, ProviderError> {
        let res = self
            .client
            .post(self.metadata.token_endpoint.clone())
            .basic_auth(&self.settings.client_id, Some(&self.settings.client_secret))
            .form(form)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                status: status.as_u16(),
            });
        }
        Ok(res.json().await?)
    }

    async fn decoding_key(&self, kid: &str) -> Result<DecodingKey, ProviderError> {
        let cached = self.jwks.read().find(kid).map(DecodingKey::from_jwk);
        if let Some(key) = cached {
            return Ok(key?);
        }

        tracing::info!(kid, "unknown signing key, refreshing jwks");
        let fresh = fetch_jwks(&self.client, &self.metadata.jwks_uri).await?;
        let key = fresh
            .find(kid)
            .map(DecodingKey::from_jwk)
            .ok_or(ProviderError::UnknownKey)??;
        *self.jwks.write() = fresh;
        Ok(key)
    }
}

async fn fetch_jwks(client: &reqwest::Client, url: &Url) -> Result<JwkSet, ProviderError> {
    let res = client.get(url.clone()).send().await?;
    if !res.status().is_success() {
        return Err(ProviderError::Status {
            status: res.status().as_u16(),
        });
    }
    Ok(res.json().await?)
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn issuer(&self) -> &str {
        &self.metadata.issuer
    }

    fn authorization_url(&self, request: &AuthorizationRequest) -> Url {
        let mut url = self.metadata.authorization_endpoint.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", self.settings.redirect_uri.as_str())
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", &request.state)
            .append_pair("nonce", &request.nonce)
            .append_pair("code_challenge", &request.code_challenge)
            .append_pair("code_challenge_method", "S256");
        url
    }

    async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.settings.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, ProviderError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn verify_id_token(&self, id_token: &str) -> Result<IdTokenClaims, ProviderError> {
        let header = decode_header(id_token)?;
        if !is_algorithm_allowed(header.alg) {
            return Err(ProviderError::UnsupportedAlgorithm(header.alg));
        }
        let kid = header.kid.as_deref().ok_or(ProviderError::MissingKeyId)?;
        let key = self.decoding_key(kid).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.metadata.issuer.as_str()]);
        validation.set_audience(&[self.settings.client_id.as_str()]);
        validation.leeway = 30;

        let data = decode::<IdTokenClaims>(id_token, &key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn provider() -> OidcProvider {
        let settings = OidcSettings {
            issuer: Url::parse("https://idp.example").expect("url"),
            client_id: "gateway".into(),
            client_secret: "s3cret".into(),
            redirect_uri: Url::parse("https://gw.example/api/v0/auth/callback").expect("url"),
            scopes: vec!["openid".into(), "offline_access".into()],
        };
        let metadata = ProviderMetadata {
            issuer: "https://idp.example".into(),
            authorization_endpoint: Url::parse("https://idp.example/oauth2/auth").expect("url"),
            token_endpoint: Url::parse("https://idp.example/oauth2/token").expect("url"),
            jwks_uri: Url::parse("https://idp.example/.well-known/jwks.json").expect("url"),
        };
        OidcProvider::from_parts(
            reqwest::Client::new(),
            settings,
            metadata,
            JwkSet { keys: Vec::new() },
        )
    }

    #[test]
    fn discovery_url_is_under_the_issuer() {
        let issuer = Url::parse("https://idp.example/realms/main/").expect("url");
        assert_eq!(
            discovery_url(&issuer).expect("url").as_str(),
            "https://idp.example/realms/main/.well-known/openid-configuration"
        );
    }

    #[test]
    fn authorization_url_carries_pkce_and_nonce() {
        let url = provider().authorization_url(&AuthorizationRequest {
            state: "st".into(),
            nonce: "nn".into(),
            code_challenge: "cc".into(),
        });

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |k: &str| {
            pairs
                .iter()
                .find(|(key, _)| key == k)
                .map(|(_, v)| v.as_str())
        };

        assert_eq!(url.path(), "/oauth2/auth");
        assert_eq!(get("response_type"), Some("code"));
        assert_eq!(get("scope"), Some("openid offline_access"));
        assert_eq!(get("state"), Some("st"));
        assert_eq!(get("nonce"), Some("nn"));
        assert_eq!(get("code_challenge_method"), Some("S256"));
        assert!(!url.as_str().contains("s3cret"));
    }

    #[tokio::test]
    async fn symmetric_id_tokens_are_rejected() {
        let claims = serde_json::json!({
            "iss": "https://idp.example",
            "sub": "alice",
            "aud": "gateway",
            "exp": chrono::Utc::now().timestamp() + 60,
        });
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"shared"),
        )
        .expect("encode");

        let err = provider()
            .verify_id_token(&token)
            .await
            .expect_err("must reject");
        assert!(matches!(
            err,
            ProviderError::UnsupportedAlgorithm(Algorithm::HS256)
        ));
    }
}
