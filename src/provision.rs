use std::fmt;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::Result;
use crate::layout::{self, Artifact, Group, OutputLayout, PlannedOutput};
use crate::plan::{IssuedSet, ProvisioningPlan, ProvisioningProfile, Topology};

/// Builds, issues and writes everything `profile` describes under `output_root`.
///
/// Nothing is generated unless every planned path is free, and nothing is
/// written unless every certificate was issued.
pub fn run(profile: &ProvisioningProfile, output_root: &Path) -> Result<Report> {
    let plan = ProvisioningPlan::build(profile)?;
    let layout = OutputLayout::new(output_root, plan.topology());
    let planned = layout.plan(&plan);

    layout::preflight(&planned)?;
    info!(
        root = %output_root.display(),
        topology = %plan.topology(),
        tasks = plan.tasks().len(),
        files = planned.len(),
        "provisioning"
    );

    let issued = plan.issue_all()?;
    let targets = layout::materialize(&planned, &issued)?;
    layout::commit(&targets)?;

    Report::new(output_root, &plan, &planned, &issued)
}

/// What a provisioning run produced, grouped by channel and identity.
#[derive(Debug, Clone)]
pub struct Report {
    pub root: PathBuf,
    pub topology: Topology,
    pub entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub channel: String,
    pub stem: String,
    pub common_name: String,
    pub is_ca: bool,
    /// Lowercase hex.
    pub serial: String,
    pub outputs: Vec<PlannedOutput>,
}

impl Report {
    fn new(
        root: &Path,
        plan: &ProvisioningPlan,
        planned: &[PlannedOutput],
        issued: &IssuedSet,
    ) -> Result<Self> {
        let mut entries = Vec::with_capacity(plan.tasks().len());
        for task in plan.tasks() {
            let serial = match issued.get(task.id) {
                Some(cert) => hex::encode(cert.certificate()?.serial_number()),
                None => String::new(),
            };
            entries.push(ReportEntry {
                channel: task.channel.clone(),
                stem: task.stem.clone(),
                common_name: task.identity.common_name().to_string(),
                is_ca: task.identity.is_ca(),
                serial,
                outputs: planned.iter().filter(|o| o.task == task.id).cloned().collect(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
            topology: plan.topology(),
            entries,
        })
    }

    /// Every written path, in write order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.entries
            .iter()
            .flat_map(|e| e.outputs.iter().map(|o| o.path.as_path()))
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Provisioned {} files under {} ({} layout)",
            self.paths().count(),
            self.root.display(),
            self.topology
        )?;

        let mut channel: Option<&str> = None;
        for entry in &self.entries {
            if channel != Some(entry.channel.as_str()) {
                writeln!(f)?;
                writeln!(f, "[{}]", entry.channel)?;
                channel = Some(entry.channel.as_str());
            }
            let kind = if entry.is_ca { "CA" } else { entry.stem.as_str() };
            writeln!(f, "  {kind}: CN={} serial={}", entry.common_name, entry.serial)?;

            // Keys first, as operators usually look for them.
            let mut outputs: Vec<&PlannedOutput> = entry.outputs.iter().collect();
            outputs.sort_by_key(|o| (o.group == Some(Group::Client), o.artifact == Artifact::Certificate));
            for output in outputs {
                let label = match output.artifact {
                    Artifact::PrivateKey => "private key",
                    Artifact::Certificate => "certificate",
                };
                match output.group {
                    Some(group) => writeln!(
                        f,
                        "    {label:<12} {} ({})",
                        output.path.display(),
                        group.dir_name()
                    )?,
                    None => writeln!(f, "    {label:<12} {}", output.path.display())?,
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::key::KeyType;

    fn profile(topology: Topology) -> ProvisioningProfile {
        ProvisioningProfile::standard(topology, KeyType::Ed25519, "svc.local", KeyType::Ed25519)
    }

    #[test]
    fn test_run_reports_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(&profile(Topology::Split), dir.path()).unwrap();

        assert_eq!(report.entries.len(), 5);
        assert_eq!(report.paths().count(), 13);
        for path in report.paths() {
            assert!(path.is_file(), "{}", path.display());
        }
        assert!(report.entries.iter().all(|e| e.serial.len() == 32));

        let text = report.to_string();
        assert!(text.contains("[http]"));
        assert!(text.contains("[grpc]"));
        assert!(text.contains("CN=Root grpc ca"));
        assert!(text.contains(&dir.path().join("client/grpc/client.key").display().to_string()));
    }

    #[test]
    fn test_report_serials_match_written_certificates() {
        let dir = tempfile::tempdir().unwrap();
        let report = run(&profile(Topology::Combined), dir.path()).unwrap();

        for entry in &report.entries {
            let crt = entry
                .outputs
                .iter()
                .find(|o| o.artifact == Artifact::Certificate)
                .unwrap();
            let pem = std::fs::read_to_string(&crt.path).unwrap();
            let cert = crate::cert::Certificate::from_pem(&pem).unwrap();
            assert_eq!(entry.serial, hex::encode(cert.serial_number()));
            assert!(entry.serial.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')));
            assert!(report.to_string().contains(&format!("serial={}", entry.serial)));
        }
    }

    #[test]
    fn test_second_run_conflicts_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let first = run(&profile(Topology::Combined), dir.path()).unwrap();
        let before: Vec<Vec<u8>> = first.paths().map(|p| std::fs::read(p).unwrap()).collect();

        let err = run(&profile(Topology::Combined), dir.path()).unwrap_err();
        match err {
            Error::AlreadyExists { paths } => assert_eq!(paths.len(), 10),
            other => panic!("unexpected error: {other}"),
        }

        let after: Vec<Vec<u8>> = first.paths().map(|p| std::fs::read(p).unwrap()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_invalid_profile_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = profile(Topology::Combined);
        bad.channels[0].leaves[0].stem = "ca".to_string();
        assert!(matches!(run(&bad, dir.path()), Err(Error::InvalidInput(_))));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
