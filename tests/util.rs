#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use ntun_certificate::cert::Certificate;
use ntun_certificate::cert::extensions::ExtendedKeyUsageOption;
use ntun_certificate::issuer::{Identity, IssuedCertificate, issue};
use ntun_certificate::key::KeyType;

/// A CA with one server and one client certificate under it.
pub struct Chain {
    pub ca: Arc<IssuedCertificate>,
    pub server: IssuedCertificate,
    pub client: IssuedCertificate,
}

pub fn issue_chain(key_type: KeyType, host: &str) -> Chain {
    let ca = Arc::new(issue(key_type, &Identity::ca("myca.local"), None).unwrap());

    let server = issue(
        key_type,
        &Identity::leaf(
            host,
            vec![host.to_string()],
            vec![ExtendedKeyUsageOption::ServerAuth],
        ),
        Some(ca.clone()),
    )
    .unwrap();

    let client = issue(
        key_type,
        &Identity::leaf(
            "client",
            vec!["client".to_string()],
            vec![ExtendedKeyUsageOption::ClientAuth],
        ),
        Some(ca.clone()),
    )
    .unwrap();

    Chain { ca, server, client }
}

pub fn read_certificate(path: &Path) -> Certificate {
    let pem = std::fs::read_to_string(path)
        .unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()));
    Certificate::from_pem(&pem).unwrap()
}

/// Relative paths of every regular file under `root`, with `/` separators.
pub fn files_under(root: &Path) -> Vec<String> {
    fn walk(dir: &Path, root: &Path, out: &mut Vec<String>) {
        for entry in std::fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(&path, root, out);
            } else {
                let relative = path.strip_prefix(root).unwrap();
                out.push(relative.to_string_lossy().replace('\\', "/"));
            }
        }
    }
    let mut out = Vec::new();
    walk(root, root, &mut out);
    out.sort();
    out
}
