use std::fmt;

use der::{Decode, Encode};
use ecdsa::signature::{SignatureEncoding, Signer, Verifier};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rand_core::{OsRng, RngCore};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use spki::{DecodePublicKey, SubjectPublicKeyInfoOwned};
use tracing::debug;

use crate::cert::SignatureAlgorithm;
use crate::error::{Error, Result};
use crate::pem_utils;

/// Smallest RSA modulus accepted by [`KeyPair::generate`].
pub const MIN_RSA_BITS: usize = 2048;
/// Largest RSA modulus accepted by [`KeyPair::generate`] and by certificate
/// decoding.
pub const MAX_RSA_BITS: usize = 16384;

/// Named curves available for ECDSA keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EcdsaCurve {
    P256,
    P384,
}

/// The algorithm and strength of a key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Rsa { bits: usize },
    Ecdsa(EcdsaCurve),
    Ed25519,
}

impl KeyType {
    /// Maps a configured `(algorithm, bits)` pair onto a key type.
    ///
    /// `bits` selects the modulus size for RSA and the curve for ECDSA
    /// (256 or 384). It is ignored for Ed25519.
    ///
    /// `ecdsa` with 521 is refused: `p521` 0.13 wraps its signing and
    /// verifying keys in types of its own rather than the generic `ecdsa`
    /// ones the other curves share, so P-521 has no [`KeyPair`] variant.
    pub fn from_parts(algorithm: &str, bits: usize) -> Result<Self> {
        let key_type = match algorithm.to_ascii_lowercase().as_str() {
            "rsa" => KeyType::Rsa { bits },
            "ecdsa" | "ec" => match bits {
                256 => KeyType::Ecdsa(EcdsaCurve::P256),
                384 => KeyType::Ecdsa(EcdsaCurve::P384),
                other => {
                    return Err(Error::KeyGeneration(format!(
                        "unsupported ECDSA curve size {other}, expected 256 or 384"
                    )));
                }
            },
            "ed25519" => KeyType::Ed25519,
            other => {
                return Err(Error::KeyGeneration(format!(
                    "unknown key algorithm {other:?}, expected rsa, ecdsa or ed25519"
                )));
            }
        };
        key_type.validate()?;
        Ok(key_type)
    }

    /// Checks that the parameters are usable before any randomness is spent.
    pub fn validate(&self) -> Result<()> {
        if let KeyType::Rsa { bits } = *self {
            if !(MIN_RSA_BITS..=MAX_RSA_BITS).contains(&bits) || bits % 8 != 0 {
                return Err(Error::KeyGeneration(format!(
                    "invalid RSA key size {bits}, expected a multiple of 8 between {MIN_RSA_BITS} and {MAX_RSA_BITS}"
                )));
            }
        }
        Ok(())
    }

    /// The signature algorithm used by certificates signed with this key type.
    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            KeyType::Rsa { .. } => SignatureAlgorithm::Sha256WithRSA,
            KeyType::Ecdsa(EcdsaCurve::P256) => SignatureAlgorithm::Sha256WithECDSA,
            KeyType::Ecdsa(EcdsaCurve::P384) => SignatureAlgorithm::Sha384WithECDSA,
            KeyType::Ed25519 => SignatureAlgorithm::Ed25519,
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyType::Rsa { bits } => write!(f, "rsa-{bits}"),
            KeyType::Ecdsa(EcdsaCurve::P256) => f.write_str("ecdsa-p256"),
            KeyType::Ecdsa(EcdsaCurve::P384) => f.write_str("ecdsa-p384"),
            KeyType::Ed25519 => f.write_str("ed25519"),
        }
    }
}

/// Supported key types for certificate operations.
#[derive(Clone)]
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
        verifying_key: P256VerifyingKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
        verifying_key: P384VerifyingKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("key_type", &self.key_type())
            .finish_non_exhaustive()
    }
}

fn fill_random(buf: &mut [u8]) -> Result<()> {
    OsRng
        .try_fill_bytes(buf)
        .map_err(|e| Error::KeyGeneration(format!("entropy source unavailable: {e}")))
}

impl KeyPair {
    /// Generate a fresh key pair of the requested type.
    ///
    /// Every call draws new randomness from the operating system; two calls
    /// never return the same key.
    pub fn generate(key_type: KeyType) -> Result<Self> {
        key_type.validate()?;
        debug!(%key_type, "generating key pair");
        match key_type {
            KeyType::Rsa { bits } => Self::generate_rsa(bits),
            KeyType::Ecdsa(EcdsaCurve::P256) => Self::generate_ecdsa_p256(),
            KeyType::Ecdsa(EcdsaCurve::P384) => Self::generate_ecdsa_p384(),
            KeyType::Ed25519 => Self::generate_ed25519(),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        KeyType::Rsa { bits }.validate()?;
        let mut rng = OsRng;
        let private = RsaPrivateKey::new(&mut rng, bits)?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Result<Self> {
        // A uniformly random 32-byte string is a valid scalar unless it is zero
        // or above the group order, which practically never happens.
        loop {
            let mut bytes = [0u8; 32];
            fill_random(&mut bytes)?;
            if let Ok(signing_key) = P256SigningKey::from_slice(&bytes) {
                let verifying_key = signing_key.verifying_key().to_owned();
                return Ok(KeyPair::EcdsaP256 {
                    signing_key,
                    verifying_key,
                });
            }
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Result<Self> {
        loop {
            let mut bytes = [0u8; 48];
            fill_random(&mut bytes)?;
            if let Ok(signing_key) = P384SigningKey::from_slice(&bytes) {
                let verifying_key = signing_key.verifying_key().to_owned();
                return Ok(KeyPair::EcdsaP384 {
                    signing_key,
                    verifying_key,
                });
            }
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Result<Self> {
        let mut secret = [0u8; 32];
        fill_random(&mut secret)?;
        Ok(KeyPair::Ed25519 {
            signing_key: Ed25519SigningKey::from_bytes(&secret),
        })
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            KeyPair::Rsa { public, .. } => {
                use rsa::traits::PublicKeyParts;
                KeyType::Rsa {
                    bits: public.size() * 8,
                }
            }
            KeyPair::EcdsaP256 { .. } => KeyType::Ecdsa(EcdsaCurve::P256),
            KeyPair::EcdsaP384 { .. } => KeyType::Ecdsa(EcdsaCurve::P384),
            KeyPair::Ed25519 { .. } => KeyType::Ed25519,
        }
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_key_pair(self)
    }

    /// The subject public key info of this key pair, as embedded in certificates.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        self.public_key().to_spki()
    }

    /// Signs `data` with the algorithm reported by [`KeyType::signature_algorithm`].
    ///
    /// ECDSA signatures are returned DER-encoded, as X.509 requires.
    pub fn sign_data(&self, data: &[u8]) -> Result<Vec<u8>> {
        let signed = match self {
            KeyPair::Rsa { private, .. } => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new((**private).clone());
                signing_key.try_sign(data).map(|sig| sig.to_vec())
            }
            KeyPair::EcdsaP256 { signing_key, .. } => {
                Signer::<p256::ecdsa::Signature>::try_sign(signing_key, data)
                    .map(|sig| sig.to_der().as_bytes().to_vec())
            }
            KeyPair::EcdsaP384 { signing_key, .. } => {
                Signer::<p384::ecdsa::Signature>::try_sign(signing_key, data)
                    .map(|sig| sig.to_der().as_bytes().to_vec())
            }
            KeyPair::Ed25519 { signing_key } => signing_key
                .try_sign(data)
                .map(|sig| sig.to_bytes().to_vec()),
        };
        signed.map_err(|e| Error::Issuance(format!("signing failed: {e}")))
    }

    /// Encodes the private key as PKCS#8 PEM (`PRIVATE KEY`).
    pub fn to_pkcs8_pem(&self) -> Result<String> {
        let pem = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_pem(LineEnding::LF),
            KeyPair::EcdsaP256 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF),
            KeyPair::EcdsaP384 { signing_key, .. } => signing_key.to_pkcs8_pem(LineEnding::LF),
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_pem(LineEnding::LF),
        }
        .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok(pem.as_str().to_owned())
    }

    /// Decodes a PKCS#8 PEM private key produced by [`KeyPair::to_pkcs8_pem`].
    pub fn from_pkcs8_pem(pem: &str) -> Result<Self> {
        let der = pem_utils::pem_to_der(pem, "PRIVATE KEY")?;
        let info = pkcs8::PrivateKeyInfo::try_from(der.as_slice())?;

        match info.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => {
                let private = RsaPrivateKey::from_pkcs8_der(&der)?;
                let public = RsaPublicKey::from(&private);
                Ok(KeyPair::Rsa {
                    private: Box::new(private),
                    public,
                })
            }
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                match info.algorithm.parameters_oid()? {
                    const_oid::db::rfc5912::SECP_256_R_1 => {
                        let signing_key = P256SigningKey::from_pkcs8_der(&der)?;
                        let verifying_key = signing_key.verifying_key().to_owned();
                        Ok(KeyPair::EcdsaP256 {
                            signing_key,
                            verifying_key,
                        })
                    }
                    const_oid::db::rfc5912::SECP_384_R_1 => {
                        let signing_key = P384SigningKey::from_pkcs8_der(&der)?;
                        let verifying_key = signing_key.verifying_key().to_owned();
                        Ok(KeyPair::EcdsaP384 {
                            signing_key,
                            verifying_key,
                        })
                    }
                    curve => Err(Error::Decoding(format!("unsupported EC curve {curve}"))),
                }
            }
            const_oid::db::rfc8410::ID_ED_25519 => Ok(KeyPair::Ed25519 {
                signing_key: Ed25519SigningKey::from_pkcs8_der(&der)?,
            }),
            other => Err(Error::Decoding(format!(
                "unsupported private key algorithm {other}"
            ))),
        }
    }
}

/// The public half of a [`KeyPair`].
#[derive(Clone, Debug, PartialEq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        match key_pair {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { verifying_key, .. } => PublicKey::EcdsaP256(verifying_key.to_owned()),
            KeyPair::EcdsaP384 { verifying_key, .. } => PublicKey::EcdsaP384(verifying_key.to_owned()),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Converts the key into its X.509 `SubjectPublicKeyInfo`.
    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            PublicKey::Rsa(public) => SubjectPublicKeyInfoOwned::from_key(public.clone())?,
            PublicKey::EcdsaP256(verifying_key) => SubjectPublicKeyInfoOwned::from_key(verifying_key.to_owned())?,
            PublicKey::EcdsaP384(verifying_key) => SubjectPublicKeyInfoOwned::from_key(verifying_key.to_owned())?,
            PublicKey::Ed25519(verifying_key) => SubjectPublicKeyInfoOwned {
                algorithm: spki::AlgorithmIdentifierOwned {
                    oid: const_oid::db::rfc8410::ID_ED_25519,
                    parameters: None,
                },
                subject_public_key: der::asn1::BitString::from_bytes(verifying_key.as_bytes())?,
            },
        };
        Ok(spki)
    }

    /// Parses the public key out of a certificate's `SubjectPublicKeyInfo`.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let der = spki.to_der()?;
        match spki.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => {
                // `from_public_key_der` stops at 4096-bit moduli.
                let key = rsa::pkcs1::RsaPublicKey::from_der(spki.subject_public_key.raw_bytes())?;
                let public = RsaPublicKey::new_with_max_size(
                    rsa::BigUint::from_bytes_be(key.modulus.as_bytes()),
                    rsa::BigUint::from_bytes_be(key.public_exponent.as_bytes()),
                    MAX_RSA_BITS,
                )?;
                Ok(PublicKey::Rsa(public))
            }
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .ok_or_else(|| Error::Decoding("EC key without curve parameter".to_string()))?
                    .decode_as::<const_oid::ObjectIdentifier>()?;
                match curve {
                    const_oid::db::rfc5912::SECP_256_R_1 => Ok(PublicKey::EcdsaP256(
                        P256VerifyingKey::from_public_key_der(&der)?,
                    )),
                    const_oid::db::rfc5912::SECP_384_R_1 => Ok(PublicKey::EcdsaP384(
                        P384VerifyingKey::from_public_key_der(&der)?,
                    )),
                    other => Err(Error::Decoding(format!("unsupported EC curve {other}"))),
                }
            }
            const_oid::db::rfc8410::ID_ED_25519 => {
                let bytes: [u8; 32] = spki
                    .subject_public_key
                    .raw_bytes()
                    .try_into()
                    .map_err(|_| Error::Decoding("Ed25519 key must be 32 bytes".to_string()))?;
                Ed25519VerifyingKey::from_bytes(&bytes)
                    .map(PublicKey::Ed25519)
                    .map_err(|e| Error::Decoding(e.to_string()))
            }
            other => Err(Error::Decoding(format!(
                "unsupported public key algorithm {other}"
            ))),
        }
    }

    /// Verifies a signature produced by [`KeyPair::sign_data`] over `data`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
        let invalid = |e: ecdsa::signature::Error| Error::InvalidInput(format!("bad signature: {e}"));
        match self {
            PublicKey::Rsa(public) => {
                let verifying_key = rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone());
                let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(invalid)?;
                verifying_key.verify(data, &signature).map_err(invalid)
            }
            PublicKey::EcdsaP256(verifying_key) => {
                let signature = p256::ecdsa::Signature::from_der(signature).map_err(invalid)?;
                verifying_key.verify(data, &signature).map_err(invalid)
            }
            PublicKey::EcdsaP384(verifying_key) => {
                let signature = p384::ecdsa::Signature::from_der(signature).map_err(invalid)?;
                verifying_key.verify(data, &signature).map_err(invalid)
            }
            PublicKey::Ed25519(verifying_key) => {
                let signature = ed25519_dalek::Signature::from_slice(signature).map_err(invalid)?;
                verifying_key.verify(data, &signature).map_err(invalid)
            }
        }
    }
}
