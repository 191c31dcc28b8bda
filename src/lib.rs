//! # ntun-certificate - PKI Bootstrapping for ntun
//!
//! ntun-certificate generates everything an ntun deployment needs to start its TLS
//! listeners without an external CA: one root CA per channel and the leaf certificates it
//! signs, written to a deterministic output tree that is never overwritten. It is built
//! entirely with rustcrypto libraries (openssl is only used in tests).
//!
//! ## Supported Key Types
//!
//! - **RSA**: 2048 to 16384-bit keys, signed with SHA-256
//! - **ECDSA**: P-256 and P-384 curves
//! - **Ed25519**: Edwards curve digital signature algorithm
//!
//! ## Channels and Layouts
//!
//! The standard profile has two channels:
//!
//! - **http**: `Root http ca` and a server certificate for the configured host
//! - **grpc**: `Root grpc ca`, a `server` certificate and a `client` certificate for mutual TLS
//!
//! The `combined` layout writes `<output>/<channel>/<name>.{crt,key}`. The `split` layout
//! writes the same files under `<output>/server/` and republishes what a gRPC client needs
//! (the CA certificate and the client certificate and key) under `<output>/client/`.
//!
//! ## Quick Start
//!
//! ### Provisioning the Standard Profile
//!
//! ```rust,no_run
//! use ntun_certificate::{
//!     key::KeyType,
//!     plan::{ProvisioningProfile, Topology},
//!     provision,
//! };
//!
//! # fn main() -> Result<(), ntun_certificate::error::Error> {
//! let profile = ProvisioningProfile::standard(
//!     Topology::Combined,
//!     KeyType::Rsa { bits: 4096 },
//!     "svc.local",
//!     KeyType::Rsa { bits: 4096 },
//! );
//!
//! let report = provision::run(&profile, std::path::Path::new("/etc/ntun"))?;
//! println!("{report}");
//! # Ok(())
//! # }
//! ```
//!
//! ### Issuing a Single Chain
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use ntun_certificate::{
//!     cert::extensions::ExtendedKeyUsageOption,
//!     issuer::{Identity, issue},
//!     key::{EcdsaCurve, KeyType},
//! };
//!
//! # fn main() -> Result<(), ntun_certificate::error::Error> {
//! let key_type = KeyType::Ecdsa(EcdsaCurve::P256);
//!
//! let ca = Arc::new(issue(key_type, &Identity::ca("Example CA"), None)?);
//! let server = issue(
//!     key_type,
//!     &Identity::leaf(
//!         "server.example.com",
//!         vec!["server.example.com".to_string()],
//!         vec![ExtendedKeyUsageOption::ServerAuth],
//!     ),
//!     Some(ca.clone()),
//! )?;
//!
//! let ca_key = ca.certificate()?.public_key()?;
//! server.certificate()?.verify_signed_by(&ca_key)?;
//! println!("{}", server.certificate_pem());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Existing output files are reported together, so the caller can list every conflict:
//!
//! ```rust,no_run
//! use ntun_certificate::{error::Error, plan::ProvisioningProfile, provision};
//!
//! # fn example(profile: &ProvisioningProfile) {
//! match provision::run(profile, std::path::Path::new(".")) {
//!     Ok(report) => println!("{report}"),
//!     Err(Error::AlreadyExists { paths }) => {
//!         for path in paths {
//!             println!("File {} already exists", path.display());
//!         }
//!     }
//!     Err(e) => eprintln!("Other error: {e}"),
//! }
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`key`]: Key generation, PKCS#8 import/export, signing and verification
//! - [`cert`]: Certificate encoding/decoding, inspection and X.509 extensions
//! - [`issuer`]: Issuing CA and leaf certificates
//! - [`plan`]: Provisioning profiles and the ordered issuance plan
//! - [`layout`]: Output paths, pre-flight conflict checks and non-destructive writes
//! - [`provision`]: The end-to-end run and its report
//! - [`config`]: Settings as read from defaults and TOML files
//! - [`error`]: Error types
//! - [`tbs_certificate`]: Low-level certificate structure manipulation

pub mod cert;
pub mod config;
pub mod error;
pub mod issuer;
pub mod key;
pub mod layout;
pub mod pem_utils;
pub mod plan;
pub mod provision;
pub mod tbs_certificate;
