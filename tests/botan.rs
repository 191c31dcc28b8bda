mod util;

use botan::Certificate as BotanCertificate;

use ntun_certificate::key::{EcdsaCurve, KeyType};

fn check_cert(pem: &str) {
    let der = ntun_certificate::pem_utils::pem_to_der(pem, "CERTIFICATE").unwrap();
    // Use botan crate to parse the DER and assert it succeeds
    BotanCertificate::load(&der).expect("Botan failed to parse certificate");
}

fn check_chain(key_type: KeyType) {
    let chain = util::issue_chain(key_type, "crabs.crabs");
    check_cert(chain.ca.certificate_pem());
    check_cert(chain.server.certificate_pem());
    check_cert(chain.client.certificate_pem());
}

#[test]
#[ignore]
fn test_botan_ecdsa_p256() {
    check_chain(KeyType::Ecdsa(EcdsaCurve::P256));
}

#[test]
#[ignore]
fn test_botan_ed25519() {
    check_chain(KeyType::Ed25519);
}

#[test]
#[ignore]
fn test_botan_ecdsa_p384() {
    check_chain(KeyType::Ecdsa(EcdsaCurve::P384));
}

#[test]
#[ignore]
fn test_botan_rsa() {
    check_chain(KeyType::Rsa { bits: 2048 });
}
