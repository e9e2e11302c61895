//! Key material for signing, verifying, and sealing magic tokens.
//!
//! The service owns exactly one key bundle for its whole lifetime: a private
//! signing key and an X.509 certificate loaded from PEM files at startup.
//! The certificate's public key verifies token signatures; its PEM bytes
//! identify the signer on the info endpoint. The bundle is immutable and is
//! shared read-only (`Arc<Keys>`) between issuance and authorization.
//!
//! # Credential sealing
//!
//! Issued tokens are signed, not encrypted, so the upstream credential they
//! embed would otherwise be readable by anyone holding a token. When sealing
//! is enabled the credential is encrypted with AES-256-GCM under a key
//! derived from the private signing key (HMAC-SHA256 with a fixed
//! domain-separation label). Only the holder of the private key can derive
//! the sealing key, so only this service can recover the credential. The
//! aws-lc-rs AEAD is used directly rather than RSA-OAEP via the `rsa` crate,
//! which carries RUSTSEC-2023-0071 (Marvin Attack).

use std::fmt;
use std::path::Path;

use aws_lc_rs::aead::{AES_256_GCM, Aad, LessSafeKey, Nonce, UnboundKey};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, KeyInit, Mac};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::RngExt;
use sha2::Sha256;
use x509_parser::public_key::PublicKey;

use crate::{Error, Result};

/// Domain-separation label for deriving the sealing key from the private key.
const SEALING_KEY_LABEL: &[u8] = b"magicproxy credential sealing v1";

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Immutable key bundle loaded once at startup.
pub struct Keys {
    /// JWS algorithm implied by the private key type
    algorithm: Algorithm,
    /// Private signing key handle
    encoding_key: EncodingKey,
    /// Verification key extracted from the certificate
    decoding_key: DecodingKey,
    /// Raw certificate PEM bytes (identifies the signer)
    certificate_pem: Vec<u8>,
    /// AEAD key for sealing the embedded upstream credential
    sealing_key: LessSafeKey,
}

impl fmt::Debug for Keys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Key handles are deliberately opaque
        f.debug_struct("Keys")
            .field("algorithm", &self.algorithm)
            .field("certificate_pem", &self.certificate_pem.len())
            .finish_non_exhaustive()
    }
}

impl Keys {
    /// Load the key bundle from a PEM private key file and a PEM certificate
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyLoad`] if either file is unreadable or malformed,
    /// or if the certificate's key type does not match the private key.
    pub fn from_files(private_key_path: &Path, certificate_path: &Path) -> Result<Self> {
        let private_pem = std::fs::read(private_key_path).map_err(|e| {
            Error::KeyLoad(format!(
                "cannot read private key {}: {e}",
                private_key_path.display()
            ))
        })?;
        let certificate_pem = std::fs::read(certificate_path).map_err(|e| {
            Error::KeyLoad(format!(
                "cannot read certificate {}: {e}",
                certificate_path.display()
            ))
        })?;
        Self::from_pem(&private_pem, &certificate_pem)
    }

    /// Build the key bundle from in-memory PEM bytes.
    ///
    /// RSA private keys sign RS256; EC P-256 keys sign ES256.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyLoad`] on malformed PEM or a key-type mismatch
    /// between the private key and the certificate.
    pub fn from_pem(private_pem: &[u8], certificate_pem: &[u8]) -> Result<Self> {
        let (encoding_key, algorithm) = load_signing_key(private_pem)?;
        let (decoding_key, cert_algorithm) = load_verification_key(certificate_pem)?;

        if algorithm != cert_algorithm {
            return Err(Error::KeyLoad(format!(
                "private key algorithm {algorithm:?} does not match certificate key type {cert_algorithm:?}"
            )));
        }

        let sealing_key = derive_sealing_key(private_pem)?;

        Ok(Self {
            algorithm,
            encoding_key,
            decoding_key,
            certificate_pem: certificate_pem.to_vec(),
            sealing_key,
        })
    }

    /// JWS algorithm for tokens signed by this bundle
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Private signing key handle
    #[must_use]
    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    /// Verification key handle
    #[must_use]
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// Raw certificate PEM bytes
    #[must_use]
    pub fn certificate_pem(&self) -> &[u8] {
        &self.certificate_pem
    }

    /// Seal a credential: returns base64url(nonce || ciphertext || tag).
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] if the AEAD operation fails.
    pub fn seal(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::rng().random();
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut in_out = plaintext.as_bytes().to_vec();
        self.sealing_key
            .seal_in_place_append_tag(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::Internal("credential sealing failed".to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&in_out);
        Ok(URL_SAFE_NO_PAD.encode(sealed))
    }

    /// Open a sealed credential produced by [`Keys::seal`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedToken`] if the blob cannot be decoded or
    /// fails authentication.
    pub fn open(&self, sealed: &str) -> Result<String> {
        let bytes = URL_SAFE_NO_PAD
            .decode(sealed)
            .map_err(|_| Error::MalformedToken)?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::MalformedToken);
        }

        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce_arr: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| Error::MalformedToken)?;
        let nonce = Nonce::assume_unique_for_key(nonce_arr);

        let mut in_out = ciphertext.to_vec();
        let plaintext = self
            .sealing_key
            .open_in_place(nonce, Aad::empty(), &mut in_out)
            .map_err(|_| Error::MalformedToken)?;

        String::from_utf8(plaintext.to_vec()).map_err(|_| Error::MalformedToken)
    }
}

/// Load the private signing key, detecting RSA vs EC from the PEM contents.
fn load_signing_key(private_pem: &[u8]) -> Result<(EncodingKey, Algorithm)> {
    if let Ok(key) = EncodingKey::from_rsa_pem(private_pem) {
        return Ok((key, Algorithm::RS256));
    }
    match EncodingKey::from_ec_pem(private_pem) {
        Ok(key) => Ok((key, Algorithm::ES256)),
        Err(e) => Err(Error::KeyLoad(format!(
            "private key is neither a valid RSA nor EC PEM key: {e}"
        ))),
    }
}

/// Extract the verification key from the certificate's SubjectPublicKeyInfo.
fn load_verification_key(certificate_pem: &[u8]) -> Result<(DecodingKey, Algorithm)> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(certificate_pem)
        .map_err(|e| Error::KeyLoad(format!("certificate is not valid PEM: {e}")))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| Error::KeyLoad(format!("certificate is not valid X.509: {e}")))?;

    match cert
        .public_key()
        .parsed()
        .map_err(|e| Error::KeyLoad(format!("cannot parse certificate public key: {e}")))?
    {
        PublicKey::RSA(rsa) => {
            let n = URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.modulus));
            let e = URL_SAFE_NO_PAD.encode(strip_leading_zeros(rsa.exponent));
            let key = DecodingKey::from_rsa_components(&n, &e)
                .map_err(|e| Error::KeyLoad(format!("invalid RSA public key: {e}")))?;
            Ok((key, Algorithm::RS256))
        }
        PublicKey::EC(point) => {
            let data = point.data();
            // Uncompressed P-256 point: 0x04 || x (32 bytes) || y (32 bytes)
            if data.len() != 65 || data[0] != 0x04 {
                return Err(Error::KeyLoad(
                    "certificate EC key is not an uncompressed P-256 point".to_string(),
                ));
            }
            let x = URL_SAFE_NO_PAD.encode(&data[1..33]);
            let y = URL_SAFE_NO_PAD.encode(&data[33..65]);
            let key = DecodingKey::from_ec_components(&x, &y)
                .map_err(|e| Error::KeyLoad(format!("invalid EC public key: {e}")))?;
            Ok((key, Algorithm::ES256))
        }
        other => Err(Error::KeyLoad(format!(
            "unsupported certificate key type: {other:?}"
        ))),
    }
}

/// Derive the AES-256-GCM sealing key from the private key PEM bytes.
fn derive_sealing_key(private_pem: &[u8]) -> Result<LessSafeKey> {
    let mut mac = Hmac::<Sha256>::new_from_slice(private_pem)
        .map_err(|e| Error::KeyLoad(format!("sealing key derivation failed: {e}")))?;
    mac.update(SEALING_KEY_LABEL);
    let key_bytes = mac.finalize().into_bytes();

    let unbound = UnboundKey::new(&AES_256_GCM, &key_bytes)
        .map_err(|_| Error::KeyLoad("sealing key derivation failed".to_string()))?;
    Ok(LessSafeKey::new(unbound))
}

/// Big-endian integers from DER may carry a sign-padding zero byte.
fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[start..]
}
