//! `ntun-certificate`: bootstraps the HTTP and gRPC PKI for ntun.
//!
//! Settings come from built-in defaults, an optional TOML file, environment
//! variables and flags, in increasing order of precedence.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use ntun_certificate::config::Settings;
use ntun_certificate::error::Error;
use ntun_certificate::plan::{ProvisioningProfile, Topology};
use ntun_certificate::provision;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ntun-certificate")]
#[command(version, about = "Generate the CA, server and client certificates for ntun", long_about = None)]
struct Args {
    /// TOML file with the same keys as --print-defaults shows
    #[arg(long, env = "NTUN_CERTIFICATE_CONFIG")]
    config: Option<PathBuf>,

    /// Key algorithm for the HTTP channel (rsa, ecdsa, ed25519)
    #[arg(long, env = "NTUN_CERTIFICATE_HTTP_TYPE")]
    http_type: Option<String>,

    /// Key size for the HTTP channel (RSA modulus bits, or 256/384 for ecdsa)
    #[arg(long, env = "NTUN_CERTIFICATE_HTTP_BITS")]
    http_bits: Option<usize>,

    /// Hostname or IP address of the HTTP server
    #[arg(long, env = "NTUN_CERTIFICATE_HTTP_HOST")]
    http_host: Option<String>,

    /// Key algorithm for the gRPC channel (rsa, ecdsa, ed25519)
    #[arg(long, env = "NTUN_CERTIFICATE_GRPC_TYPE")]
    grpc_type: Option<String>,

    /// Key size for the gRPC channel
    #[arg(long, env = "NTUN_CERTIFICATE_GRPC_BITS")]
    grpc_bits: Option<usize>,

    /// Output directory (empty for the current directory)
    #[arg(long, env = "NTUN_CERTIFICATE_OUTPUT")]
    output: Option<PathBuf>,

    /// Output layout
    #[arg(long, value_enum, env = "NTUN_CERTIFICATE_TOPOLOGY")]
    topology: Option<Topology>,

    /// Print the default configuration as TOML and exit
    #[arg(long)]
    print_defaults: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn")]
    log_level: String,
}

impl Args {
    fn resolve(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_toml_file(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => Settings::default(),
        };

        if let Some(key_type) = &self.http_type {
            settings.http.key_type = key_type.clone();
        }
        if let Some(bits) = self.http_bits {
            settings.http.bits = bits;
        }
        if let Some(host) = &self.http_host {
            settings.http.host = host.clone();
        }
        if let Some(key_type) = &self.grpc_type {
            settings.grpc.key_type = key_type.clone();
        }
        if let Some(bits) = self.grpc_bits {
            settings.grpc.bits = bits;
        }
        if let Some(output) = &self.output {
            settings.output = output.clone();
        }
        if let Some(topology) = self.topology {
            settings.topology = topology;
        }

        settings.validate().context("invalid settings")?;
        Ok(settings)
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    if args.print_defaults {
        print!("{}", Settings::default().to_toml()?);
        return Ok(());
    }

    let settings = args.resolve()?;
    let output = settings.resolve_output_dir()?;
    let profile = ProvisioningProfile::try_from(&settings)?;

    match provision::run(&profile, &output) {
        Ok(report) => {
            println!("{report}");
            Ok(())
        }
        Err(Error::AlreadyExists { paths }) => {
            for path in &paths {
                println!("File {} already exists", path.display());
            }
            println!("Nothing was written.");
            Ok(())
        }
        Err(err) => Err(err).context("provisioning failed"),
    }
}
