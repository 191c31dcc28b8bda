mod util;

use std::path::Path;
use std::process::Command;

use ntun_certificate::config::Settings;
use ntun_certificate::error::Error;
use ntun_certificate::key::{KeyPair, KeyType};
use ntun_certificate::plan::{ProvisioningProfile, Topology};
use ntun_certificate::provision;

const COMBINED_FILES: [&str; 10] = [
    "grpc/ca.crt",
    "grpc/ca.key",
    "grpc/client.crt",
    "grpc/client.key",
    "grpc/server.crt",
    "grpc/server.key",
    "http/ca.crt",
    "http/ca.key",
    "http/server.crt",
    "http/server.key",
];

fn settings(host: &str, key_type: &str, bits: usize, topology: Topology) -> Settings {
    let mut settings = Settings::default();
    settings.http.host = host.to_string();
    settings.http.key_type = key_type.to_string();
    settings.http.bits = bits;
    settings.grpc.key_type = key_type.to_string();
    settings.grpc.bits = bits;
    settings.topology = topology;
    settings
}

/// Provisions the standard profile with 2048-bit RSA and checks the chains on disk.
#[test]
fn provision_combined_rsa() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let profile =
        ProvisioningProfile::try_from(&settings("svc.local", "rsa", 2048, Topology::Combined))
            .unwrap();

    provision::run(&profile, root).unwrap();
    assert_eq!(util::files_under(root), COMBINED_FILES);

    let http_ca = util::read_certificate(&root.join("http/ca.crt"));
    let http_server = util::read_certificate(&root.join("http/server.crt"));
    assert_eq!(http_server.subject_alt_names().unwrap(), vec!["svc.local".to_string()]);
    assert_eq!(http_server.subject().common_name, "svc.local");
    assert_eq!(http_server.issuer().common_name, "Root http ca");
    http_server
        .verify_signed_by(&http_ca.public_key().unwrap())
        .unwrap();
    assert!(http_server.matches_hostname("svc.local"));

    let grpc_ca = util::read_certificate(&root.join("grpc/ca.crt"));
    assert!(grpc_ca.is_ca());
    assert_eq!(grpc_ca.subject().common_name, "Root grpc ca");
    for (stem, cn) in [("server", "server"), ("client", "client")] {
        let leaf = util::read_certificate(&root.join(format!("grpc/{stem}.crt")));
        assert_eq!(leaf.subject().common_name, cn);
        assert!(!leaf.is_ca());
        leaf.verify_signed_by(&grpc_ca.public_key().unwrap()).unwrap();
        // Channels have separate roots.
        assert!(leaf.verify_signed_by(&http_ca.public_key().unwrap()).is_err());
    }

    // Each key file holds the key of the certificate next to it.
    for stem in ["http/ca", "http/server", "grpc/ca", "grpc/server", "grpc/client"] {
        let key = std::fs::read_to_string(root.join(format!("{stem}.key"))).unwrap();
        let key = KeyPair::from_pkcs8_pem(&key).unwrap();
        assert_eq!(key.key_type(), KeyType::Rsa { bits: 2048 });
        let cert = util::read_certificate(&root.join(format!("{stem}.crt")));
        assert_eq!(cert.public_key().unwrap(), key.public_key(), "{stem}");
    }
}

#[test]
fn provision_split_ed25519() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    let profile =
        ProvisioningProfile::try_from(&settings("10.1.2.3", "ed25519", 0, Topology::Split)).unwrap();

    let report = provision::run(&profile, root).unwrap();
    assert_eq!(report.paths().count(), 13);

    let mut expected: Vec<String> = COMBINED_FILES.iter().map(|f| format!("server/{f}")).collect();
    expected.extend(
        ["client/grpc/ca.crt", "client/grpc/client.crt", "client/grpc/client.key"]
            .into_iter()
            .map(String::from),
    );
    expected.sort();
    assert_eq!(util::files_under(root), expected);

    // The client group republishes the same bytes.
    for file in ["grpc/ca.crt", "grpc/client.crt", "grpc/client.key"] {
        assert_eq!(
            std::fs::read(root.join("server").join(file)).unwrap(),
            std::fs::read(root.join("client").join(file)).unwrap()
        );
    }

    let http_server = util::read_certificate(&root.join("server/http/server.crt"));
    assert!(http_server.matches_hostname("10.1.2.3"));
    assert!(!http_server.matches_hostname("10.1.2.4"));
}

/// 8192-bit RSA keys take a while to generate.
#[test]
#[ignore]
fn issue_chain_rsa_8192() {
    let key_type = KeyType::from_parts("rsa", 8192).unwrap();
    let chain = util::issue_chain(key_type, "svc.local");

    let ca = chain.ca.certificate().unwrap();
    let ca_key = KeyPair::from_pkcs8_pem(chain.ca.private_key_pem()).unwrap();
    assert_eq!(ca.public_key().unwrap(), ca_key.public_key());
    for leaf in [&chain.server, &chain.client] {
        let cert = leaf.certificate().unwrap();
        cert.verify_signed_by(&ca.public_key().unwrap()).unwrap();
        let key = KeyPair::from_pkcs8_pem(leaf.private_key_pem()).unwrap();
        assert_eq!(key.key_type(), key_type);
    }
}

#[test]
fn provision_refuses_to_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("grpc")).unwrap();
    std::fs::write(root.join("grpc/server.key"), "keep me").unwrap();

    let profile =
        ProvisioningProfile::try_from(&settings("svc.local", "ecdsa", 256, Topology::Combined))
            .unwrap();
    match provision::run(&profile, root) {
        Err(Error::AlreadyExists { paths }) => {
            assert_eq!(paths, vec![root.join("grpc/server.key")]);
        }
        other => panic!("expected a conflict, got {other:?}"),
    }

    assert_eq!(util::files_under(root), vec!["grpc/server.key".to_string()]);
    assert_eq!(
        std::fs::read_to_string(root.join("grpc/server.key")).unwrap(),
        "keep me"
    );
}

fn cli(output: &Path) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_ntun-certificate"));
    for (key, _) in std::env::vars_os() {
        if key.to_string_lossy().starts_with("NTUN_CERTIFICATE_") {
            command.env_remove(key);
        }
    }
    command.env_remove("RUST_LOG").arg("--output").arg(output);
    command
}

// RSA 4096 is the default and too slow for tests.
const FAST_KEYS: [&str; 6] = [
    "--http-type",
    "ecdsa",
    "--http-bits",
    "256",
    "--grpc-type",
    "ed25519",
];

#[test]
fn cli_provisions_then_reports_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pki");

    let first = cli(&root)
        .args(FAST_KEYS)
        .args(["--http-host", "svc.local"])
        .output()
        .unwrap();
    assert!(first.status.success(), "{}", String::from_utf8_lossy(&first.stderr));
    let stdout = String::from_utf8_lossy(&first.stdout);
    assert!(stdout.contains(&root.join("http/server.key").display().to_string()));
    assert_eq!(util::files_under(&root), COMBINED_FILES);

    // A second run finds every file and exits cleanly without writing.
    let second = cli(&root).args(FAST_KEYS).output().unwrap();
    assert!(second.status.success());
    let stdout = String::from_utf8_lossy(&second.stdout);
    assert_eq!(stdout.matches("already exists").count(), 10);
}

#[test]
fn cli_environment_and_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pki");
    let config = dir.path().join("ntun.toml");
    std::fs::write(&config, "topology = \"split\"\n\n[http]\nhost = \"from-file.local\"\n").unwrap();

    let output = cli(&root)
        .args(FAST_KEYS)
        .env("NTUN_CERTIFICATE_CONFIG", &config)
        .env("NTUN_CERTIFICATE_HTTP_HOST", "from-env.local")
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let server = util::read_certificate(&root.join("server/http/server.crt"));
    assert_eq!(server.subject_alt_names().unwrap(), vec!["from-env.local".to_string()]);
    assert!(root.join("client/grpc/client.key").is_file());
}

#[test]
fn cli_rejects_invalid_settings() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("pki");
    let output = cli(&root)
        .args(["--http-type", "ed25519", "--grpc-type", "dsa"])
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(!root.exists());
}

#[test]
fn cli_print_defaults() {
    let output = Command::new(env!("CARGO_BIN_EXE_ntun-certificate"))
        .arg("--print-defaults")
        .output()
        .unwrap();
    assert!(output.status.success());
    let defaults: Settings = toml::from_str(&String::from_utf8_lossy(&output.stdout)).unwrap();
    assert_eq!(defaults.http.key_type, "rsa");
    assert_eq!(defaults.http.bits, 4096);
    assert_eq!(defaults.http.host, "localhost");
    assert_eq!(defaults.topology, Topology::Combined);
}
