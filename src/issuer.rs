use std::fmt;
use std::sync::Arc;

use rand::TryRngCore;
use sha1::{Digest, Sha1};
use tracing::info;
use x509_cert::certificate::CertificateInner;

use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, FlagSet,
    KeyUsage, KeyUsages, SubjectAltName, SubjectKeyIdentifier,
};
use crate::cert::params::{CertificationRequestInfo, DistinguishedName, ExtensionParam, Validity};
use crate::cert::{Certificate, CertificateWithPrivateKey};
use crate::error::{Error, Result};
use crate::key::{KeyPair, KeyType};
use crate::tbs_certificate::TbsCertificate;

/// Lifetime of every provisioned certificate, CA and leaf alike.
pub const CERTIFICATE_VALIDITY: time::Duration = time::Duration::days(3650);

const SERIAL_NUMBER_LEN: usize = 16;

/// Represents an entity capable of issuing certificates.
///
/// This trait provides methods to retrieve issuer details and issue certificates.
pub trait Issuer {
    /// Returns the encoded name placed in the issuer field of issued certificates.
    fn issuer_name(&self) -> x509_cert::name::Name;

    /// Returns the signing key of the issuer.
    fn signing_key(&self) -> &KeyPair;

    /// Issues a certificate based on the provided certification request information.
    ///
    /// CA requests get `keyCertSign | cRLSign` and a zero path length; all
    /// other requests get `digitalSignature | keyEncipherment` plus the
    /// requested extended key usages. Every certificate carries a fresh random
    /// serial number and subject/authority key identifiers.
    fn issue(&self, cert_request: &CertificationRequestInfo, validity: Validity) -> Result<Certificate> {
        let signing_key = self.signing_key();
        let signature_algorithm = signing_key.key_type().signature_algorithm();

        let authority_key_id = AuthorityKeyIdentifier(key_identifier(&signing_key.as_spki()?));
        let subject_key_id =
            SubjectKeyIdentifier(key_identifier(&cert_request.subject_public_key.to_spki()?));

        let basic_constraints = BasicConstraints {
            is_ca: cert_request.is_ca,
            max_path_length: cert_request.is_ca.then_some(0),
        };

        let mut key_usage_flags: FlagSet<KeyUsages> = FlagSet::default();
        if cert_request.is_ca {
            key_usage_flags |= KeyUsages::KeyCertSign;
            key_usage_flags |= KeyUsages::CRLSign;
        } else {
            key_usage_flags |= KeyUsages::DigitalSignature;
            key_usage_flags |= KeyUsages::KeyEncipherment;
        }

        let mut extensions: Vec<ExtensionParam> = vec![
            ExtensionParam::from_extension(basic_constraints, true)?,
            ExtensionParam::from_extension(KeyUsage(key_usage_flags), true)?,
            ExtensionParam::from_extension(subject_key_id, false)?,
            ExtensionParam::from_extension(authority_key_id, false)?,
        ];

        if !cert_request.usages.is_empty() {
            let extended_key_usage = ExtendedKeyUsage {
                usage: cert_request.usages.clone(),
            };
            extensions.push(ExtensionParam::from_extension(extended_key_usage, false)?);
        }

        let combined_extensions = extensions
            .into_iter()
            .chain(cert_request.extensions.iter().cloned())
            .collect();

        let tbs_cert = TbsCertificate {
            serial_number: random_serial_number()?,
            signature_algorithm,
            issuer: self.issuer_name(),
            not_before: validity.not_before,
            not_after: validity.not_after,
            subject: cert_request.subject.as_x509_name()?,
            subject_public_key: cert_request.subject_public_key.clone(),
            extensions: combined_extensions,
        };

        let tbs_cert_inner = tbs_cert.to_tbs_certificate_inner()?;
        let signature = signing_key.sign_data(&der::Encode::to_der(&tbs_cert_inner)?)?;

        let cert_inner = CertificateInner {
            tbs_certificate: tbs_cert_inner,
            signature_algorithm: signature_algorithm.into(),
            signature: der::asn1::BitString::from_bytes(&signature)?,
        };

        Ok(Certificate { inner: cert_inner })
    }
}

/// SHA-1 over the subject public key bit string.
fn key_identifier(spki: &x509_cert::spki::SubjectPublicKeyInfoOwned) -> Vec<u8> {
    Sha1::digest(spki.subject_public_key.raw_bytes()).to_vec()
}

/// A positive, non-zero, 128-bit serial number from the OS RNG.
fn random_serial_number() -> Result<Vec<u8>> {
    let mut serial = [0u8; SERIAL_NUMBER_LEN];
    rand::rngs::OsRng
        .try_fill_bytes(&mut serial)
        .map_err(|e| Error::Issuance(format!("cannot draw a serial number: {e}")))?;
    // Clear the sign bit, and keep the leading byte non-zero so the INTEGER
    // encoding stays minimal.
    serial[0] &= 0x7f;
    if serial[0] == 0 {
        serial[0] = 1;
    }
    Ok(serial.to_vec())
}

/// Who a certificate is issued to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    common_name: String,
    sans: Vec<String>,
    is_ca: bool,
    usages: Vec<ExtendedKeyUsageOption>,
}

impl Identity {
    /// A root CA identity. CAs carry no subject alternative names.
    pub fn ca(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
            sans: Vec::new(),
            is_ca: true,
            usages: Vec::new(),
        }
    }

    /// A leaf identity valid for `sans` and the given extended key usages.
    pub fn leaf(
        common_name: impl Into<String>,
        sans: Vec<String>,
        usages: Vec<ExtendedKeyUsageOption>,
    ) -> Self {
        Self {
            common_name: common_name.into(),
            sans,
            is_ca: false,
            usages,
        }
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn sans(&self) -> &[String] {
        &self.sans
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn usages(&self) -> &[ExtendedKeyUsageOption] {
        &self.usages
    }
}

/// The output of one issuance: PEM-encoded certificate and PKCS#8 private key.
///
/// Leaves keep a reference to the CA that signed them.
pub struct IssuedCertificate {
    certificate: String,
    private_key: String,
    identity: Identity,
    parent: Option<Arc<IssuedCertificate>>,
}

impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("identity", &self.identity)
            .field(
                "parent",
                &self.parent.as_ref().map(|p| p.identity.common_name()),
            )
            .finish_non_exhaustive()
    }
}

impl IssuedCertificate {
    pub fn certificate_pem(&self) -> &str {
        &self.certificate
    }

    pub fn private_key_pem(&self) -> &str {
        &self.private_key
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn parent(&self) -> Option<&Arc<IssuedCertificate>> {
        self.parent.as_ref()
    }

    /// Decodes the certificate for inspection.
    pub fn certificate(&self) -> Result<Certificate> {
        Certificate::from_pem(&self.certificate)
    }

    /// Decodes the certificate and key back into something that can sign.
    fn as_issuer(&self) -> Result<CertificateWithPrivateKey> {
        let name = self.identity.common_name();
        let cert = self
            .certificate()
            .map_err(|e| Error::Issuance(format!("parent {name:?} has an unreadable certificate: {e}")))?;
        let key = KeyPair::from_pkcs8_pem(&self.private_key)
            .map_err(|e| Error::Issuance(format!("parent {name:?} has an unreadable private key: {e}")))?;

        if !cert.is_ca() {
            return Err(Error::Issuance(format!("parent {name:?} is not a CA")));
        }
        if cert.public_key().ok() != Some(key.public_key()) {
            return Err(Error::Issuance(format!(
                "parent {name:?} private key does not match its certificate"
            )));
        }
        Ok(CertificateWithPrivateKey { cert, key })
    }
}

/// Issues a certificate for `identity` with a freshly generated key.
///
/// Without `signing_parent` the certificate is a self-signed root. With a
/// parent, the parent's key signs it and the issuer field is the parent's
/// subject. Nothing is cached: identical calls produce different keys and
/// serial numbers.
pub fn issue(
    key_type: KeyType,
    identity: &Identity,
    signing_parent: Option<Arc<IssuedCertificate>>,
) -> Result<IssuedCertificate> {
    if identity.common_name.trim().is_empty() {
        return Err(Error::InvalidInput("common name must not be empty".to_string()));
    }

    let key = KeyPair::generate(key_type)?;

    let mut extensions = Vec::new();
    if !identity.is_ca && !identity.sans.is_empty() {
        let san = SubjectAltName {
            names: identity.sans.clone(),
        };
        extensions.push(ExtensionParam::from_extension(san, false)?);
    }

    let request = CertificationRequestInfo::builder()
        .subject(DistinguishedName::from_common_name(identity.common_name.as_str()))
        .subject_public_key(key.public_key())
        .usages(identity.usages.clone())
        .is_ca(identity.is_ca)
        .extensions(extensions)
        .build();

    let validity = Validity::starting_now(CERTIFICATE_VALIDITY);
    let certificate = match &signing_parent {
        None => Certificate::new_self_signed(&request, &key, validity)?,
        Some(parent) => parent.as_issuer()?.issue(&request, validity)?,
    };

    info!(
        common_name = identity.common_name(),
        %key_type,
        serial = hex::encode(certificate.serial_number()),
        signer = signing_parent
            .as_ref()
            .map_or("self", |p| p.identity.common_name()),
        "issued certificate"
    );

    Ok(IssuedCertificate {
        certificate: certificate.to_pem()?,
        private_key: key.to_pkcs8_pem()?,
        identity: identity.clone(),
        parent: signing_parent,
    })
}
