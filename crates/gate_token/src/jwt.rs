use crate::error::Error;
use crate::jwks::{decode_private_key, Jwks};
use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const ALG_HS256: &str = "HS256";
pub const ALG_RS256: &str = "RS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub alg: String,
    pub typ: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl Header {
    fn hs256(kid: Option<&str>) -> Self {
        Self {
            alg: ALG_HS256.to_string(),
            typ: "JWT".to_string(),
            kid: kid.map(str::to_string),
        }
    }

    fn rs256(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_RS256.to_string(),
            typ: "JWT".to_string(),
            kid: Some(kid.into()),
        }
    }
}

/// Registered claims checked by the verification functions. Everything else
/// in the payload is application-defined and deserialized by the caller.
#[derive(Debug, Deserialize)]
struct RegisteredClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn split_token(token: &str) -> Result<(&str, &str, &str), Error> {
    let mut parts = token.split('.');
    let header = parts.next().ok_or(Error::TokenFormat)?;
    let claims = parts.next().ok_or(Error::TokenFormat)?;
    let signature = parts.next().ok_or(Error::TokenFormat)?;
    if parts.next().is_some() {
        return Err(Error::TokenFormat);
    }
    Ok((header, claims, signature))
}

/// Serialize claims and stamp `iat`/`exp` into the payload.
fn stamped_payload<T: Serialize>(
    claims: &T,
    ttl_seconds: i64,
    now_unix_seconds: i64,
) -> Result<String, Error> {
    let mut payload = match serde_json::to_value(claims)? {
        Value::Object(map) => map,
        _ => return Err(Error::ClaimsFormat),
    };
    payload.insert("iat".to_string(), Value::from(now_unix_seconds));
    payload.insert(
        "exp".to_string(),
        Value::from(now_unix_seconds.saturating_add(ttl_seconds)),
    );
    let json = serde_json::to_vec(&Value::Object(payload))?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn check_expiry(exp: Option<i64>, now_unix_seconds: i64) -> Result<(), Error> {
    match exp {
        None => Err(Error::MissingExpiry),
        Some(exp) if exp <= now_unix_seconds => Err(Error::Expired),
        Some(_) => Ok(()),
    }
}

/// Create an HS256 signed token.
///
/// `iat` and `exp` are derived from `now_unix_seconds` and `ttl_seconds` and
/// overwrite any same-named fields in `claims`. `kid` is embedded in the
/// header as an unauthenticated rotation hint, never as a trust input.
///
/// # Errors
///
/// Returns an error if `claims` does not serialize to a JSON object or the
/// secret is unusable as an HMAC key.
pub fn sign_hs256<T: Serialize>(
    claims: &T,
    secret: &[u8],
    ttl_seconds: i64,
    kid: Option<&str>,
    now_unix_seconds: i64,
) -> Result<String, Error> {
    let header_b64 = b64e_json(&Header::hs256(kid))?;
    let claims_b64 = stamped_payload(claims, ttl_seconds, now_unix_seconds)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::HmacKey)?;
    mac.update(signing_input.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an HS256 token and return its decoded claims.
///
/// The algorithm is pinned to exactly `HS256`: a token whose header declares
/// any other algorithm (including `none`) is rejected before the signature is
/// looked at. The MAC comparison is constant-time.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header algorithm is not `HS256`,
/// - the signature does not match,
/// - the payload has no `exp` or `exp` has passed.
pub fn verify_hs256<T: for<'de> Deserialize<'de>>(
    token: &str,
    secret: &[u8],
    now_unix_seconds: i64,
) -> Result<T, Error> {
    let (header_b64, claims_b64, sig_b64) = split_token(token)?;

    let header: Header = b64d_json(header_b64)?;
    if header.alg != ALG_HS256 {
        return Err(Error::UnsupportedAlg(header.alg));
    }

    let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| Error::HmacKey)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(claims_b64.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| Error::InvalidSignature)?;

    let registered: RegisteredClaims = b64d_json(claims_b64)?;
    check_expiry(registered.exp, now_unix_seconds)?;

    b64d_json(claims_b64)
}

/// Create an RS256 signed token. This is the issuer side of the
/// upstream-response contract; the gateway itself only verifies.
///
/// # Errors
///
/// Returns an error if the private key cannot be parsed, the claims cannot be
/// encoded, or signing fails.
pub fn sign_rs256<T: Serialize>(
    private_key_pem_or_der: &[u8],
    kid: impl Into<String>,
    claims: &T,
    ttl_seconds: i64,
    now_unix_seconds: i64,
) -> Result<String, Error> {
    let header_b64 = b64e_json(&Header::rs256(kid))?;
    let claims_b64 = stamped_payload(claims, ttl_seconds, now_unix_seconds)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let private_key = decode_private_key(private_key_pem_or_der)?;
    let signing_key = SigningKey::<Sha256>::new(private_key);
    let signature: Signature = signing_key.sign(signing_input.as_bytes());
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an RS256 token against a JWKS and return its decoded claims.
///
/// The verification key is selected by the header `kid`; an unknown `kid`
/// surfaces as [`Error::UnknownKid`] so callers can refresh their cached
/// keyset and retry once.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header algorithm is not `RS256` or has no `kid`,
/// - the `kid` is unknown for the provided JWKS,
/// - the signature is invalid,
/// - `iss` does not equal `expected_issuer`,
/// - the payload has no `exp` or `exp` has passed.
pub fn verify_rs256<T: for<'de> Deserialize<'de>>(
    token: &str,
    jwks: &Jwks,
    expected_issuer: &str,
    now_unix_seconds: i64,
) -> Result<T, Error> {
    let (header_b64, claims_b64, sig_b64) = split_token(token)?;

    let header: Header = b64d_json(header_b64)?;
    if header.alg != ALG_RS256 {
        return Err(Error::UnsupportedAlg(header.alg));
    }
    let kid = header.kid.ok_or(Error::MissingKid)?;

    let jwk = jwks
        .find_by_kid(&kid)
        .ok_or_else(|| Error::UnknownKid(kid.clone()))?;

    let public_key = jwk.to_rsa_public_key()?;
    let verifying_key = VerifyingKey::<Sha256>::new(public_key);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| Error::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| Error::InvalidSignature)?;

    let registered: RegisteredClaims = b64d_json(claims_b64)?;
    if registered.iss.as_deref() != Some(expected_issuer) {
        return Err(Error::InvalidIssuer);
    }
    check_expiry(registered.exp, now_unix_seconds)?;

    b64d_json(claims_b64)
}

/// Decode a token header without verifying anything. Diagnostic use only.
///
/// # Errors
///
/// Returns an error if the token is malformed.
pub fn decode_header(token: &str) -> Result<Header, Error> {
    let (header_b64, _, _) = split_token(token)?;
    b64d_json(header_b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::TEST_RSA_PRIVATE_KEY_PEM;

    // Fixed clock for deterministic tokens.
    const NOW: i64 = 1_700_000_000;
    const SECRET: &[u8] = b"cookie-secret-for-tests";

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    struct SessionPayload {
        sub: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        roles: Option<Vec<String>>,
    }

    fn payload() -> SessionPayload {
        SessionPayload {
            sub: "u1".to_string(),
            roles: Some(vec!["user".to_string()]),
        }
    }

    #[test]
    fn hs256_round_trip() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, None, NOW)?;
        let verified: SessionPayload = verify_hs256(&token, SECRET, NOW + 299)?;
        assert_eq!(verified, payload());
        Ok(())
    }

    #[test]
    fn hs256_rejects_wrong_secret() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, None, NOW)?;
        let result = verify_hs256::<SessionPayload>(&token, b"another-secret", NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn hs256_rejects_expired_token() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, None, NOW)?;
        let result = verify_hs256::<SessionPayload>(&token, SECRET, NOW + 300);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn hs256_rejects_tampered_payload() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, None, NOW)?;
        let (header, _, signature) = split_token(&token)?;
        let forged = serde_json::json!({"sub": "u2", "iat": NOW, "exp": NOW + 300});
        let forged_b64 = Base64UrlUnpadded::encode_string(&serde_json::to_vec(&forged)?);
        let tampered = format!("{header}.{forged_b64}.{signature}");
        let result = verify_hs256::<SessionPayload>(&tampered, SECRET, NOW);
        assert!(matches!(result, Err(Error::InvalidSignature)));
        Ok(())
    }

    #[test]
    fn hs256_pins_algorithm() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, None, NOW)?;
        let (_, claims, signature) = split_token(&token)?;
        for alg in ["none", "RS256", "hs256"] {
            let header = b64e_json(&serde_json::json!({"alg": alg, "typ": "JWT"}))?;
            let confused = format!("{header}.{claims}.{signature}");
            let result = verify_hs256::<SessionPayload>(&confused, SECRET, NOW);
            assert!(
                matches!(result, Err(Error::UnsupportedAlg(_))),
                "alg {alg} must be rejected"
            );
        }
        Ok(())
    }

    #[test]
    fn hs256_requires_expiry_claim() -> Result<(), Error> {
        // Hand-build a token whose payload has no exp, signed correctly.
        let header_b64 = b64e_json(&Header::hs256(None))?;
        let claims_b64 = b64e_json(&serde_json::json!({"sub": "u1", "iat": NOW}))?;
        let signing_input = format!("{header_b64}.{claims_b64}");
        let mut mac = HmacSha256::new_from_slice(SECRET).map_err(|_| Error::HmacKey)?;
        mac.update(signing_input.as_bytes());
        let sig_b64 = Base64UrlUnpadded::encode_string(&mac.finalize().into_bytes());
        let token = format!("{signing_input}.{sig_b64}");

        let result = verify_hs256::<SessionPayload>(&token, SECRET, NOW);
        assert!(matches!(result, Err(Error::MissingExpiry)));
        Ok(())
    }

    #[test]
    fn header_carries_kid_hint() -> Result<(), Error> {
        let token = sign_hs256(&payload(), SECRET, 300, Some("k7"), NOW)?;
        let header = decode_header(&token)?;
        assert_eq!(header.alg, ALG_HS256);
        assert_eq!(header.kid.as_deref(), Some("k7"));
        Ok(())
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        for garbage in ["", "a", "a.b", "a.b.c.d", "!!!.###.$$$"] {
            let result = verify_hs256::<SessionPayload>(garbage, SECRET, NOW);
            assert!(result.is_err(), "token {garbage:?} must be rejected");
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct SignedResponse {
        iss: String,
        sub: String,
    }

    fn signed_response(issuer: &str) -> SignedResponse {
        SignedResponse {
            iss: issuer.to_string(),
            sub: "u1".to_string(),
        }
    }

    const ISSUER: &str = "https://auth.example.test";

    #[test]
    fn rs256_round_trip() -> Result<(), Error> {
        let jwks =
            Jwks::from_rsa_private_key_pem_or_der(TEST_RSA_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_rs256(
            TEST_RSA_PRIVATE_KEY_PEM.as_bytes(),
            "k1",
            &signed_response(ISSUER),
            120,
            NOW,
        )?;
        let verified: SignedResponse = verify_rs256(&token, &jwks, ISSUER, NOW)?;
        assert_eq!(verified.sub, "u1");
        Ok(())
    }

    #[test]
    fn rs256_rejects_wrong_issuer_and_expiry() -> Result<(), Error> {
        let jwks =
            Jwks::from_rsa_private_key_pem_or_der(TEST_RSA_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_rs256(
            TEST_RSA_PRIVATE_KEY_PEM.as_bytes(),
            "k1",
            &signed_response(ISSUER),
            120,
            NOW,
        )?;

        let result = verify_rs256::<SignedResponse>(&token, &jwks, "https://evil.example", NOW);
        assert!(matches!(result, Err(Error::InvalidIssuer)));

        let result = verify_rs256::<SignedResponse>(&token, &jwks, ISSUER, NOW + 9999);
        assert!(matches!(result, Err(Error::Expired)));
        Ok(())
    }

    #[test]
    fn rs256_rejects_unknown_kid() -> Result<(), Error> {
        let jwks =
            Jwks::from_rsa_private_key_pem_or_der(TEST_RSA_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_rs256(
            TEST_RSA_PRIVATE_KEY_PEM.as_bytes(),
            "k2",
            &signed_response(ISSUER),
            120,
            NOW,
        )?;
        let result = verify_rs256::<SignedResponse>(&token, &jwks, ISSUER, NOW);
        assert!(matches!(result, Err(Error::UnknownKid(kid)) if kid == "k2"));
        Ok(())
    }

    #[test]
    fn rs256_rejects_symmetric_tokens() -> Result<(), Error> {
        let jwks =
            Jwks::from_rsa_private_key_pem_or_der(TEST_RSA_PRIVATE_KEY_PEM.as_bytes(), "k1")?;
        let token = sign_hs256(&payload(), SECRET, 300, Some("k1"), NOW)?;
        let result = verify_rs256::<SessionPayload>(&token, &jwks, ISSUER, NOW);
        assert!(matches!(result, Err(Error::UnsupportedAlg(_))));
        Ok(())
    }
}
