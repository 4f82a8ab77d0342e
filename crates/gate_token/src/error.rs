use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("claims must serialize to a json object")]
    ClaimsFormat,
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("missing key id")]
    MissingKid,
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] rsa::errors::Error),
    #[error("invalid hmac key")]
    HmacKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token has no expiry")]
    MissingExpiry,
    #[error("token expired")]
    Expired,
    #[error("invalid issuer")]
    InvalidIssuer,
}
