mod util;

use std::process::Command;

use ntun_certificate::key::{EcdsaCurve, KeyType};
use ntun_certificate::plan::{ProvisioningProfile, Topology};
use ntun_certificate::provision;
use openssl::nid::Nid;
use openssl::stack::Stack;
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509, X509StoreContext};
use regex::Regex;

const KEY_TYPES: [KeyType; 4] = [
    KeyType::Rsa { bits: 2048 },
    KeyType::Ecdsa(EcdsaCurve::P256),
    KeyType::Ecdsa(EcdsaCurve::P384),
    KeyType::Ed25519,
];

fn common_name(name: &openssl::x509::X509NameRef) -> String {
    name.entries_by_nid(Nid::COMMONNAME)
        .next()
        .unwrap()
        .data()
        .as_utf8()
        .unwrap()
        .to_string()
}

/// Runs OpenSSL's own path validation with `ca` as the only trust anchor.
fn openssl_verify(ca: &X509, leaf: &X509) -> Result<(), String> {
    let mut builder = X509StoreBuilder::new().unwrap();
    builder.add_cert(ca.clone()).unwrap();
    let store = builder.build();

    let chain: Stack<X509> = Stack::new().unwrap();
    let mut context = X509StoreContext::new().unwrap();
    context
        .init(&store, leaf, &chain, |c| {
            let ok = c.verify_cert()?;
            Ok(if ok { Ok(()) } else { Err(c.error().to_string()) })
        })
        .unwrap()
}

#[test]
fn test_openssl_crate_validate_chain() {
    for key_type in KEY_TYPES {
        let chain = util::issue_chain(key_type, "server.myca.local");
        let ca = X509::from_pem(chain.ca.certificate_pem().as_bytes()).expect("Failed to parse PEM");
        let server =
            X509::from_pem(chain.server.certificate_pem().as_bytes()).expect("Failed to parse PEM");
        let client =
            X509::from_pem(chain.client.certificate_pem().as_bytes()).expect("Failed to parse PEM");

        assert_eq!(common_name(server.subject_name()), "server.myca.local");
        assert_eq!(common_name(server.issuer_name()), "myca.local");
        assert_eq!(common_name(ca.issuer_name()), "myca.local");
        assert_eq!(server.version(), 2, "X509 version should be 3 (0-based index)");

        assert!(ca.verify(&ca.public_key().unwrap()).unwrap(), "{key_type}");
        assert!(server.verify(&ca.public_key().unwrap()).unwrap(), "{key_type}");
        assert!(!server.verify(&client.public_key().unwrap()).unwrap_or(false), "{key_type}");

        openssl_verify(&ca, &server).unwrap_or_else(|e| panic!("{key_type}: {e}"));
        openssl_verify(&ca, &client).unwrap_or_else(|e| panic!("{key_type}: {e}"));

        // A different CA with the same name must not validate the leaf.
        let other = util::issue_chain(key_type, "server.myca.local");
        let other_ca = X509::from_pem(other.ca.certificate_pem().as_bytes()).unwrap();
        assert!(openssl_verify(&other_ca, &server).is_err(), "{key_type}");
    }
}

#[test]
fn test_openssl_crate_fields() {
    let chain = util::issue_chain(KeyType::Ecdsa(EcdsaCurve::P256), "svc.local");
    let server = X509::from_pem(chain.server.certificate_pem().as_bytes()).unwrap();

    let names: Vec<String> = server
        .subject_alt_names()
        .unwrap()
        .iter()
        .filter_map(|name| name.dnsname().map(str::to_string))
        .collect();
    assert_eq!(names, vec!["svc.local".to_string()]);
    assert!(chain.ca.certificate().unwrap().subject_alt_names().unwrap().is_empty());

    let serial = server.serial_number().to_bn().unwrap();
    assert!(!serial.is_negative());
    assert!(serial.num_bits() > 64 && serial.num_bits() <= 127);

    assert_eq!(server.signature_algorithm().object().nid(), Nid::ECDSA_WITH_SHA256);

    let rsa = util::issue_chain(KeyType::Rsa { bits: 2048 }, "svc.local");
    let rsa_server = X509::from_pem(rsa.server.certificate_pem().as_bytes()).unwrap();
    assert_eq!(
        rsa_server.signature_algorithm().object().nid(),
        Nid::SHA256WITHRSAENCRYPTION
    );
}

#[test]
fn test_openssl_validate_provisioned_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let profile = ProvisioningProfile::standard(
        Topology::Split,
        KeyType::Ecdsa(EcdsaCurve::P384),
        "svc.local",
        KeyType::Ecdsa(EcdsaCurve::P256),
    );
    provision::run(&profile, root).unwrap();

    let read = |path: &str| X509::from_pem(&std::fs::read(root.join(path)).unwrap()).unwrap();
    let client_ca = read("client/grpc/ca.crt");
    openssl_verify(&client_ca, &read("client/grpc/client.crt")).unwrap();
    openssl_verify(&client_ca, &read("server/grpc/server.crt")).unwrap();
    openssl_verify(&read("server/http/ca.crt"), &read("server/http/server.crt")).unwrap();
    assert!(openssl_verify(&client_ca, &read("server/http/server.crt")).is_err());

    let key = openssl::pkey::PKey::private_key_from_pem(
        &std::fs::read(root.join("client/grpc/client.key")).unwrap(),
    )
    .unwrap();
    assert!(read("client/grpc/client.crt").public_key().unwrap().public_eq(&key));
}

#[test]
fn test_openssl_cli_text() {
    let dir = tempfile::tempdir().unwrap();
    let chain = util::issue_chain(KeyType::Ecdsa(EcdsaCurve::P256), "server.myca.local");

    let cert_path = dir.path().join("server.crt");
    std::fs::write(&cert_path, chain.server.certificate_pem()).unwrap();
    let ca_path = dir.path().join("ca.crt");
    std::fs::write(&ca_path, chain.ca.certificate_pem()).unwrap();

    let Ok(output) = Command::new("openssl")
        .args(["x509", "-noout", "-text", "-in"])
        .arg(&cert_path)
        .output()
    else {
        eprintln!("openssl CLI not available, skipping");
        return;
    };
    assert!(
        output.status.success(),
        "OpenSSL command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let output_text = String::from_utf8_lossy(&output.stdout);

    assert!(output_text.contains("CN=myca.local") || output_text.contains("CN = myca.local"));
    assert!(output_text.contains("Version: 3 (0x2)"), "Version field is incorrect");
    assert!(output_text.contains("Signature Algorithm: ecdsa-with-SHA256"));
    assert!(output_text.contains("DNS:server.myca.local"));
    assert!(output_text.contains("CA:FALSE"));
    assert!(output_text.contains("TLS Web Server Authentication"));

    let not_before_regex = Regex::new(r"Not Before: .+").unwrap();
    let not_after_regex = Regex::new(r"Not After : .+").unwrap();
    assert!(not_before_regex.is_match(&output_text), "Missing Not Before field");
    assert!(not_after_regex.is_match(&output_text), "Missing Not After field");

    let ca_output = Command::new("openssl")
        .args(["x509", "-noout", "-text", "-in"])
        .arg(&ca_path)
        .output()
        .unwrap();
    let ca_text = String::from_utf8_lossy(&ca_output.stdout);
    assert!(ca_text.contains("CA:TRUE, pathlen:0"));
    assert!(ca_text.contains("Certificate Sign, CRL Sign"));

    let verify = Command::new("openssl")
        .arg("verify")
        .arg("-CAfile")
        .arg(&ca_path)
        .arg(&cert_path)
        .output()
        .unwrap();
    assert!(
        verify.status.success(),
        "openssl verify failed: {}",
        String::from_utf8_lossy(&verify.stdout)
    );
}
