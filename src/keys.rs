use std::path::Path;

use anyhow::Context;
use jsonwebtoken::{DecodingKey, EncodingKey};

use crate::error::{AppError, Result};

/// The authority's asymmetric key material.
///
/// Only the authority holds the private (encoding) half; relying parties that
/// verify locally load just the public PEM, which construction always
/// requires. The raw public PEM is kept around so it can be served over
/// `/api/auth/public-key`.
pub struct KeyMaterial {
    encoding: Option<EncodingKey>,
    decoding: DecodingKey,
    public_pem: String,
}

impl KeyMaterial {
    /// Builds key material from PEM strings. The private half is optional.
    pub fn from_pems(private_pem: Option<&str>, public_pem: &str) -> anyhow::Result<Self> {
        let encoding = private_pem
            .map(|pem| {
                EncodingKey::from_rsa_pem(pem.as_bytes())
                    .context("Invalid RSA private key PEM")
            })
            .transpose()?;

        let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
            .context("Invalid RSA public key PEM")?;

        Ok(Self {
            encoding,
            decoding,
            public_pem: public_pem.to_string(),
        })
    }

    /// Loads key material from PEM files.
    pub fn from_files(private_path: Option<&Path>, public_path: &Path) -> anyhow::Result<Self> {
        let private_pem = private_path
            .map(|p| {
                std::fs::read_to_string(p)
                    .with_context(|| format!("Failed to read private key {}", p.display()))
            })
            .transpose()?;

        let public_pem = std::fs::read_to_string(public_path)
            .with_context(|| format!("Failed to read public key {}", public_path.display()))?;

        Self::from_pems(private_pem.as_deref(), &public_pem)
    }

    /// The signing key. Errors when this instance only holds the public half.
    pub fn encoding(&self) -> Result<&EncodingKey> {
        self.encoding
            .as_ref()
            .ok_or_else(|| AppError::Internal("No signing key loaded".to_string()))
    }

    /// The verification key.
    pub fn decoding(&self) -> &DecodingKey {
        &self.decoding
    }

    /// The raw public PEM.
    pub fn public_pem(&self) -> &str {
        &self.public_pem
    }
}
