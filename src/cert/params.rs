use bon::Builder;
use const_oid::ObjectIdentifier;
use der::asn1::{Ia5StringRef, PrintableStringRef, SetOfVec, Utf8StringRef};
use time::Duration;
use time::OffsetDateTime;
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{RdnSequence, RelativeDistinguishedName};

use super::extensions::ToAndFromX509Extension;
pub use crate::cert::extensions::ExtendedKeyUsage;
pub use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::error::{Error, Result};
use crate::key::PublicKey;

/// Parameters for building an X.509 certificate.
///
/// This struct contains the subject, public key, and optional extensions for the certificate.
///
/// # Fields
/// * `subject` - The distinguished name of the certificate subject.
/// * `subject_public_key` - The public key of the certificate subject.
/// * `usages` - A list of extended key usage options.
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `extensions` - Additional X.509 extensions.
#[derive(Clone, Debug, Builder)]
pub struct CertificationRequestInfo {
    pub subject: DistinguishedName,
    pub subject_public_key: PublicKey,
    #[builder(default)]
    pub usages: Vec<ExtendedKeyUsageOption>,
    #[builder(default)]
    pub is_ca: bool,
    #[builder(default)]
    pub extensions: Vec<ExtensionParam>,
}

/// The subject or issuer name of a certificate.
///
/// Provisioned certificates carry a bare common name, so that is the only
/// attribute kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DistinguishedName {
    pub common_name: String,
}

impl DistinguishedName {
    pub fn from_common_name(common_name: impl Into<String>) -> Self {
        Self {
            common_name: common_name.into(),
        }
    }

    /// Encodes the name as a single `CN` RDN holding a UTF8String.
    pub fn as_x509_name(&self) -> Result<x509_cert::name::DistinguishedName> {
        let value = der::Any::encode_from(&Utf8StringRef::new(&self.common_name)?)?;
        let set = SetOfVec::try_from(vec![AttributeTypeAndValue {
            oid: const_oid::db::rfc4519::CN,
            value,
        }])?;
        Ok(RdnSequence(vec![RelativeDistinguishedName(set)]))
    }

    /// Reads the common name out of an encoded name.
    ///
    /// Other attributes are ignored, as are CN values with string types other
    /// than UTF8String, PrintableString and IA5String.
    pub fn from_x509_name(x509dn: &x509_cert::name::DistinguishedName) -> Self {
        let common_name = x509dn
            .0
            .iter()
            .flat_map(|rdn| rdn.0.iter())
            .filter(|attr| attr.oid == const_oid::db::rfc4519::CN)
            .find_map(attribute_string)
            .unwrap_or_default();
        Self { common_name }
    }
}

fn attribute_string(attr: &AttributeTypeAndValue) -> Option<String> {
    if let Ok(s) = attr.value.decode_as::<String>() {
        return Some(s);
    }
    if let Ok(s) = attr.value.decode_as::<PrintableStringRef<'_>>() {
        return Some(s.as_str().to_owned());
    }
    attr.value
        .decode_as::<Ia5StringRef<'_>>()
        .ok()
        .map(|s| s.as_str().to_owned())
}

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period starting now and lasting `lifetime`.
    pub fn starting_now(lifetime: Duration) -> Self {
        // X.509 times have second precision.
        let now = OffsetDateTime::now_utc()
            .replace_nanosecond(0)
            .unwrap_or_else(|_| OffsetDateTime::now_utc());
        Self {
            not_before: now,
            not_after: now + lifetime,
        }
    }
}

/// Represents an X.509 extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    pub fn from_extension<E: ToAndFromX509Extension>(extension: E, critical: bool) -> Result<Self> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E> {
        if self.oid != E::OID {
            return Err(Error::InvalidInput(format!(
                "extension {} is not {}",
                self.oid,
                E::OID
            )));
        }
        E::from_x509_extension_value(&self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_name_only_name() {
        let dn = DistinguishedName::from_common_name("Root grpc ca");
        let name = dn.as_x509_name().unwrap();
        assert_eq!(name.0.len(), 1);
        assert_eq!(DistinguishedName::from_x509_name(&name), dn);
    }

    #[test]
    fn test_special_characters_survive_encoding() {
        let dn = DistinguishedName::from_common_name("svc, \"internal\"+1");
        let decoded = DistinguishedName::from_x509_name(&dn.as_x509_name().unwrap());
        assert_eq!(decoded, dn);
    }

    #[test]
    fn test_other_attributes_are_ignored() {
        let organization = AttributeTypeAndValue {
            oid: const_oid::db::rfc4519::O,
            value: der::Any::encode_from(&Utf8StringRef::new("Example Corp").unwrap()).unwrap(),
        };
        let mut name = DistinguishedName::from_common_name("server").as_x509_name().unwrap();
        name.0
            .insert(0, RelativeDistinguishedName(SetOfVec::try_from(vec![organization]).unwrap()));

        assert_eq!(
            DistinguishedName::from_x509_name(&name),
            DistinguishedName::from_common_name("server")
        );
    }

    #[test]
    fn test_validity_has_second_precision() {
        let validity = Validity::starting_now(Duration::days(1));
        assert_eq!(validity.not_before.nanosecond(), 0);
        assert_eq!(validity.not_after - validity.not_before, Duration::days(1));
    }
}
