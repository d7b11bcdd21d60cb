//! Bearer token codec
//!
//! Tokens are three dot-separated base64url segments (header, payload,
//! signature). The payload carries at least `exp`; identity-bearing tokens
//! also carry `user_id` (or `sub`) and `role`.

use crate::config::JwtConfig;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Coarse privilege tag carried in a token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Unknown role: {}", s)),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token decode failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("no token supplied")]
    MissingToken,
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("token signature is invalid")]
    InvalidSignature,
    #[error("token has expired")]
    Expired,
    #[error("token could not be signed: {0}")]
    Signing(String),
}

/// Decoded, typed contents of a bearer token
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimSet {
    /// Calling principal; empty when the token names none
    pub subject: String,
    /// `None` when the claim is absent or unrecognised; never matches admin
    pub role: Option<Role>,
    /// Expiry as a unix timestamp (seconds)
    pub expiry: i64,
    pub issued_at: Option<i64>,
    /// Claims without a typed field
    pub extra: HashMap<String, serde_json::Value>,
}

impl ClaimSet {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.expiry, 0)
    }

    pub fn is_admin(&self) -> bool {
        self.role == Some(Role::Admin)
    }
}

/// Wire shape of the payload segment
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TokenPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(deserialize_with = "deserialize_timestamp")]
    exp: i64,
    #[serde(
        default,
        deserialize_with = "deserialize_optional_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    iat: Option<i64>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl From<TokenPayload> for ClaimSet {
    fn from(payload: TokenPayload) -> Self {
        let role = payload
            .role
            .as_deref()
            .and_then(|r| r.parse::<Role>().ok());
        ClaimSet {
            subject: payload.user_id.or(payload.sub).unwrap_or_default(),
            role,
            expiry: payload.exp,
            issued_at: payload.iat,
            extra: payload.extra,
        }
    }
}

/// Numeric unix timestamps arrive as integers or floats depending on the issuer
fn deserialize_timestamp<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let number = serde_json::Number::deserialize(deserializer)?;
    number
        .as_i64()
        .or_else(|| number.as_f64().map(|f| f as i64))
        .ok_or_else(|| serde::de::Error::custom("timestamp out of range"))
}

fn deserialize_optional_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_timestamp(deserializer).map(Some)
}

/// Parses and verifies bearer tokens against a shared HMAC secret
#[derive(Clone)]
pub struct TokenCodec {
    config: JwtConfig,
    encoding_key: Option<EncodingKey>,
    decoding_key: Option<DecodingKey>,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.config.issuer)
            .field("verifies_signatures", &self.verifies_signatures())
            .finish()
    }
}

impl TokenCodec {
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = config
            .secret
            .as_ref()
            .map(|s| EncodingKey::from_secret(s.as_bytes()));
        let decoding_key = config
            .secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));
        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    /// Whether a secret is configured, i.e. `decode` can be authoritative
    pub fn verifies_signatures(&self) -> bool {
        self.decoding_key.is_some()
    }

    /// Verify and decode a token at the current time
    pub fn decode(&self, token: &str) -> Result<ClaimSet, TokenError> {
        self.decode_at(token, Utc::now().timestamp())
    }

    /// Structural and expiry checks only, without the signature
    pub fn inspect(&self, token: &str) -> Result<ClaimSet, TokenError> {
        self.inspect_at(token, Utc::now().timestamp())
    }

    /// Structural and expiry checks against `now` (unix seconds).
    ///
    /// This is a non-authoritative pre-filter: claim content returned from
    /// here must not drive authorization decisions.
    pub fn inspect_at(&self, token: &str, now: i64) -> Result<ClaimSet, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::MissingToken);
        }

        let segments: Vec<&str> = token.split('.').collect();
        if segments.len() != 3 {
            return Err(TokenError::MalformedToken(format!(
                "expected 3 segments, found {}",
                segments.len()
            )));
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(segments[1].trim_end_matches('='))
            .map_err(|e| TokenError::MalformedToken(format!("payload is not base64url: {}", e)))?;
        let payload: TokenPayload = serde_json::from_slice(&payload_bytes)
            .map_err(|e| TokenError::MalformedToken(format!("payload is not a claim map: {}", e)))?;

        if payload.exp <= now {
            return Err(TokenError::Expired);
        }

        Ok(payload.into())
    }

    /// Verify and decode a token against `now` (unix seconds).
    ///
    /// Expiry is evaluated before the signature, so an expired token is
    /// reported as `Expired` whether or not it is correctly signed.
    pub fn decode_at(&self, token: &str, now: i64) -> Result<ClaimSet, TokenError> {
        self.inspect_at(token, now)?;

        let decoding_key = self.decoding_key.as_ref().ok_or(TokenError::InvalidSignature)?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation.leeway = 0;

        // The signing input is the unpadded form; padding added in transit is ignored
        let unpadded = strip_padding(token.trim());
        let data =
            decode::<TokenPayload>(&unpadded, decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::InvalidSignature
                    | ErrorKind::InvalidAlgorithm
                    | ErrorKind::InvalidAlgorithmName => TokenError::InvalidSignature,
                    other => TokenError::MalformedToken(format!("{:?}", other)),
                }
            })?;

        Ok(data.claims.into())
    }

    /// Issue a signed token for `subject`
    pub fn issue(&self, subject: &str, role: Role) -> Result<String, TokenError> {
        let expiry = Utc::now() + Duration::seconds(self.config.access_token_ttl_secs);
        self.issue_with_expiry(subject, Some(role), expiry.timestamp())
    }

    /// Issue a signed token with an explicit expiry (unix seconds)
    pub fn issue_with_expiry(
        &self,
        subject: &str,
        role: Option<Role>,
        expiry: i64,
    ) -> Result<String, TokenError> {
        let encoding_key = self
            .encoding_key
            .as_ref()
            .ok_or_else(|| TokenError::Signing("no signing secret configured".to_string()))?;

        let mut extra = HashMap::new();
        extra.insert(
            "iss".to_string(),
            serde_json::Value::String(self.config.issuer.clone()),
        );

        let payload = TokenPayload {
            user_id: Some(subject.to_string()),
            sub: Some(subject.to_string()),
            role: role.map(|r| r.as_str().to_string()),
            exp: expiry,
            iat: Some(Utc::now().timestamp()),
            extra,
        };

        encode(&Header::new(Algorithm::HS256), &payload, encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    /// Get token expiration TTL in seconds
    pub fn access_token_ttl(&self) -> i64 {
        self.config.access_token_ttl_secs
    }
}

/// Drop `=` padding from every segment
fn strip_padding(token: &str) -> String {
    token
        .split('.')
        .map(|segment| segment.trim_end_matches('='))
        .collect::<Vec<_>>()
        .join(".")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const NOW: i64 = 1_700_000_000;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: Some("test-secret-key-for-testing-purposes-only".to_string()),
            issuer: "https://taskgate.test".to_string(),
            access_token_ttl_secs: 3600,
        }
    }

    fn unsigned(payload: &str) -> String {
        format!(
            "eyJhbGciOiJIUzI1NiJ9.{}.{}",
            URL_SAFE_NO_PAD.encode(payload),
            URL_SAFE_NO_PAD.encode("not-a-real-hmac-sha256-signature")
        )
    }

    #[test]
    fn test_issue_and_decode() {
        let codec = TokenCodec::new(test_config());
        let token = codec.issue("user-123", Role::Admin).unwrap();

        let claims = codec.decode(&token).unwrap();
        assert_eq!(claims.subject, "user-123");
        assert_eq!(claims.role, Some(Role::Admin));
        assert!(claims.is_admin());
        assert_eq!(
            claims.extra.get("iss").and_then(|v| v.as_str()),
            Some("https://taskgate.test")
        );
    }

    #[test]
    fn test_padded_segments_verify() {
        let codec = TokenCodec::new(test_config());
        let token = codec.issue("user-123", Role::User).unwrap();
        let padded = token
            .split('.')
            .map(|segment| format!("{}==", segment))
            .collect::<Vec<_>>()
            .join(".");

        let claims = codec.decode(&padded).unwrap();
        assert_eq!(claims.subject, "user-123");
        assert_eq!(codec.inspect(&padded).unwrap().subject, "user-123");
    }

    #[test]
    fn test_zero_expiry_is_expired_even_unsigned() {
        let codec = TokenCodec::new(test_config());
        // header.payload.signature with payload {"exp":0}
        let token = "eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjB9.signature";
        assert_eq!(codec.decode_at(token, 1), Err(TokenError::Expired));
        assert_eq!(codec.decode_at(token, NOW), Err(TokenError::Expired));
        assert_eq!(codec.inspect_at(token, NOW), Err(TokenError::Expired));
    }

    #[test]
    fn test_expiry_at_now_is_expired() {
        let codec = TokenCodec::new(test_config());
        let token = codec.issue_with_expiry("u", Some(Role::User), NOW).unwrap();
        assert_eq!(codec.decode_at(&token, NOW), Err(TokenError::Expired));
        assert!(codec.decode_at(&token, NOW - 1).is_ok());
    }

    #[rstest]
    #[case("onlyonesegment")]
    #[case("two.segments")]
    #[case("a.b.c.d")]
    #[case("eyJhbGciOiJIUzI1NiJ9.eyJleHAiOjB9.sig.extra")]
    #[case("....")]
    fn test_wrong_segment_count_is_malformed(#[case] token: &str) {
        let codec = TokenCodec::new(test_config());
        assert!(matches!(
            codec.decode_at(token, NOW),
            Err(TokenError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_empty_token_is_missing() {
        let codec = TokenCodec::new(test_config());
        assert_eq!(codec.decode_at("", NOW), Err(TokenError::MissingToken));
        assert_eq!(codec.decode_at("   ", NOW), Err(TokenError::MissingToken));
    }

    #[test]
    fn test_undecodable_payload_is_malformed() {
        let codec = TokenCodec::new(test_config());
        assert!(matches!(
            codec.decode_at("header.!!!notbase64!!!.sig", NOW),
            Err(TokenError::MalformedToken(_))
        ));
        // valid base64 but not a JSON object
        let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode("[1,2,3]"));
        assert!(matches!(
            codec.decode_at(&token, NOW),
            Err(TokenError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_missing_exp_is_malformed() {
        let codec = TokenCodec::new(test_config());
        let token = unsigned(r#"{"user_id":"u1"}"#);
        assert!(matches!(
            codec.inspect_at(&token, NOW),
            Err(TokenError::MalformedToken(_))
        ));
    }

    #[test]
    fn test_bad_signature() {
        let codec = TokenCodec::new(test_config());
        let token = unsigned(&format!(r#"{{"user_id":"u1","exp":{}}}"#, NOW + 60));
        assert_eq!(codec.decode_at(&token, NOW), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_token_signed_with_other_secret() {
        let codec = TokenCodec::new(test_config());
        let other = TokenCodec::new(JwtConfig {
            secret: Some("a-completely-different-secret".to_string()),
            ..test_config()
        });
        let token = other.issue("user-1", Role::User).unwrap();
        assert_eq!(codec.decode(&token), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_codec_without_secret_cannot_verify() {
        let codec = TokenCodec::new(JwtConfig {
            secret: None,
            ..test_config()
        });
        assert!(!codec.verifies_signatures());
        let token = unsigned(&format!(r#"{{"user_id":"u1","exp":{}}}"#, NOW + 60));
        assert_eq!(codec.decode_at(&token, NOW), Err(TokenError::InvalidSignature));

        let claims = codec.inspect_at(&token, NOW).unwrap();
        assert_eq!(claims.subject, "u1");
        assert!(matches!(
            codec.issue("u1", Role::User),
            Err(TokenError::Signing(_))
        ));
    }

    #[test]
    fn test_missing_role_defaults_to_none() {
        let codec = TokenCodec::new(test_config());
        let token = codec.issue_with_expiry("user-9", None, NOW + 60).unwrap();
        let claims = codec.decode_at(&token, NOW).unwrap();
        assert_eq!(claims.role, None);
        assert!(!claims.is_admin());
    }

    #[test]
    fn test_unknown_role_is_dropped_and_extra_claims_kept() {
        let codec = TokenCodec::new(test_config());
        let token = unsigned(&format!(
            r#"{{"sub":"u2","role":"superuser","exp":{},"tenant":"acme"}}"#,
            NOW + 60
        ));
        let claims = codec.inspect_at(&token, NOW).unwrap();
        assert_eq!(claims.subject, "u2");
        assert_eq!(claims.role, None);
        assert_eq!(
            claims.extra.get("tenant").and_then(|v| v.as_str()),
            Some("acme")
        );
    }

    #[test]
    fn test_float_expiry_is_accepted() {
        let codec = TokenCodec::new(test_config());
        let token = unsigned(&format!(r#"{{"user_id":"u3","exp":{}.0}}"#, NOW + 60));
        let claims = codec.inspect_at(&token, NOW).unwrap();
        assert_eq!(claims.expiry, NOW + 60);
        assert!(claims.expires_at().is_some());
    }

    #[test]
    fn test_user_id_takes_precedence_over_sub() {
        let codec = TokenCodec::new(test_config());
        let token = unsigned(&format!(
            r#"{{"user_id":"primary","sub":"secondary","exp":{}}}"#,
            NOW + 60
        ));
        assert_eq!(codec.inspect_at(&token, NOW).unwrap().subject, "primary");
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("Admin".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_access_token_ttl() {
        let codec = TokenCodec::new(test_config());
        assert_eq!(codec.access_token_ttl(), 3600);
    }
}
