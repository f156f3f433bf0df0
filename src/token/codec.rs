use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// The verified claims of an access token.
///
/// Instances only come out of [`verify`], i.e. the signature has been checked
/// and `exp` is in the future. These claims may be trusted for access
/// decisions, subject to the revocation-store check.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Unique token id, the revocation key.
    pub jti: String,
    /// Subject id of the authenticated principal.
    pub sub: String,
    /// Issued at (seconds since epoch).
    pub iat: i64,
    /// Expiration time (seconds since epoch).
    pub exp: i64,
}

/// Claims decoded without signature verification.
///
/// Every field is optional: this type exists only to pull a `jti` out of a
/// token for store lookups and revocation. Unverified claims must never be
/// the sole basis for granting access.
#[derive(Debug, Default, Deserialize)]
pub struct RawClaims {
    /// Unique token id, if present.
    pub jti: Option<String>,
    /// Subject id, if present.
    pub sub: Option<String>,
    /// Expiration time, if present.
    pub exp: Option<i64>,
}

/// Mints a signed three-part access token (RS256).
pub fn mint(
    subject_id: Uuid,
    token_id: Uuid,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    key: &EncodingKey,
) -> Result<String> {
    let claims = TokenClaims {
        jti: token_id.to_string(),
        sub: subject_id.to_string(),
        iat: issued_at.timestamp(),
        exp: expires_at.timestamp(),
    };

    jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, key)
        .map_err(|e| AppError::Internal(format!("Token signing failed: {}", e)))
}

/// Verifies a token's signature and expiry, returning its claims.
///
/// An expired signature maps to `ExpiredToken`; every other failure (wrong
/// algorithm, bad signature, missing claims, garbage input) collapses to
/// `MalformedToken`.
pub fn verify(token: &str, key: &DecodingKey) -> Result<TokenClaims> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = 0;
    validation.validate_aud = false;

    match jsonwebtoken::decode::<TokenClaims>(token, key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(e) => match e.kind() {
            ErrorKind::ExpiredSignature => Err(AppError::ExpiredToken),
            _ => Err(AppError::MalformedToken),
        },
    }
}

/// Decodes the claims segment without verifying the signature.
///
/// Requires exactly three dot-separated segments; the middle segment is
/// re-padded to a multiple of four, base64url-decoded and parsed as a JSON
/// object. Any malformed input yields `None`, never an error.
pub fn decode_claims(token: &str) -> Option<RawClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let mut payload = parts[1].to_string();
    let remainder = payload.len() % 4;
    if remainder != 0 {
        payload.push_str(&"=".repeat(4 - remainder));
    }

    let bytes = general_purpose::URL_SAFE.decode(payload).ok()?;
    sonic_rs::from_slice::<RawClaims>(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;
    use chrono::Duration;

    fn keypair() -> crate::keys::KeyMaterial {
        testutil::test_keys()
    }

    #[test]
    fn mint_then_decode_round_trips_sub_and_jti() {
        let keys = keypair();
        let subject_id = Uuid::new_v4();
        let token_id = Uuid::new_v4();
        let now = Utc::now();

        let token = mint(
            subject_id,
            token_id,
            now,
            now + Duration::minutes(30),
            keys.encoding().unwrap(),
        )
        .unwrap();

        let claims = decode_claims(&token).unwrap();
        assert_eq!(claims.sub.as_deref(), Some(subject_id.to_string().as_str()));
        assert_eq!(claims.jti.as_deref(), Some(token_id.to_string().as_str()));
        assert!(claims.exp.unwrap() > now.timestamp());
    }

    #[test]
    fn verify_accepts_freshly_minted_token() {
        let keys = keypair();
        let subject_id = Uuid::new_v4();
        let token_id = Uuid::new_v4();
        let now = Utc::now();

        let token = mint(
            subject_id,
            token_id,
            now,
            now + Duration::minutes(30),
            keys.encoding().unwrap(),
        )
        .unwrap();

        let claims = verify(&token, keys.decoding()).unwrap();
        assert_eq!(claims.sub, subject_id.to_string());
        assert_eq!(claims.jti, token_id.to_string());
    }

    #[test]
    fn verify_rejects_expired_token() {
        let keys = keypair();
        let now = Utc::now();

        let token = mint(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now - Duration::minutes(60),
            now - Duration::minutes(30),
            keys.encoding().unwrap(),
        )
        .unwrap();

        assert!(matches!(
            verify(&token, keys.decoding()),
            Err(AppError::ExpiredToken)
        ));
    }

    #[test]
    fn verify_rejects_tampered_claims_segment() {
        let keys = keypair();
        let now = Utc::now();

        let token = mint(
            Uuid::new_v4(),
            Uuid::new_v4(),
            now,
            now + Duration::minutes(30),
            keys.encoding().unwrap(),
        )
        .unwrap();

        // Forge the claims segment while keeping the original signature.
        let parts: Vec<&str> = token.split('.').collect();
        let forged_claims = general_purpose::URL_SAFE_NO_PAD.encode(
            format!(
                r#"{{"jti":"{}","sub":"{}","iat":0,"exp":{}}}"#,
                Uuid::new_v4(),
                Uuid::new_v4(),
                (now + Duration::minutes(30)).timestamp()
            )
            .as_bytes(),
        );
        let forged = format!("{}.{}.{}", parts[0], forged_claims, parts[2]);

        assert!(matches!(
            verify(&forged, keys.decoding()),
            Err(AppError::MalformedToken)
        ));
        // The lenient decoder still reads the forged segment: that is exactly
        // why it must never authorize access on its own.
        assert!(decode_claims(&forged).is_some());
    }

    #[test]
    fn decode_claims_rejects_wrong_segment_counts() {
        assert!(decode_claims("").is_none());
        assert!(decode_claims("one").is_none());
        assert!(decode_claims("a.b").is_none());
        assert!(decode_claims("a.b.c.d").is_none());
    }

    #[test]
    fn decode_claims_rejects_bad_base64_and_non_object_json() {
        assert!(decode_claims("a.!!not-base64!!.c").is_none());

        let number = general_purpose::URL_SAFE_NO_PAD.encode(b"42");
        assert!(decode_claims(&format!("a.{}.c", number)).is_none());

        let array = general_purpose::URL_SAFE_NO_PAD.encode(b"[1,2,3]");
        assert!(decode_claims(&format!("a.{}.c", array)).is_none());
    }

    #[test]
    fn decode_claims_accepts_object_with_missing_fields() {
        let payload = general_purpose::URL_SAFE_NO_PAD.encode(b"{\"foo\":\"bar\"}");
        let claims = decode_claims(&format!("a.{}.c", payload)).unwrap();
        assert!(claims.jti.is_none());
        assert!(claims.sub.is_none());
        assert!(claims.exp.is_none());
    }
}
