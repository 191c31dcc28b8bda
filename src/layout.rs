use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::plan::{IssuanceTask, IssuedSet, ProvisioningPlan, Role, TaskId, Topology};

/// Mode for certificate files.
pub const CERTIFICATE_MODE: u32 = 0o644;
/// Mode for private key files.
pub const PRIVATE_KEY_MODE: u32 = 0o600;
/// Mode for directories created while committing.
pub const DIRECTORY_MODE: u32 = 0o755;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Artifact {
    Certificate,
    PrivateKey,
}

impl Artifact {
    pub fn extension(&self) -> &'static str {
        match self {
            Artifact::Certificate => "crt",
            Artifact::PrivateKey => "key",
        }
    }

    pub fn mode(&self) -> u32 {
        match self {
            Artifact::Certificate => CERTIFICATE_MODE,
            Artifact::PrivateKey => PRIVATE_KEY_MODE,
        }
    }
}

/// Output subtree in the split topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    Server,
    Client,
}

impl Group {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Group::Server => "server",
            Group::Client => "client",
        }
    }
}

/// A path the commit will write, known before anything is issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutput {
    /// Logical name, e.g. `grpc.ca.key` or `client.grpc.client.crt`.
    pub name: String,
    pub path: PathBuf,
    pub mode: u32,
    pub task: TaskId,
    pub artifact: Artifact,
    /// `None` in the combined topology.
    pub group: Option<Group>,
}

/// A planned output with its contents filled in.
pub struct OutputTarget {
    pub name: String,
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub mode: u32,
}

impl std::fmt::Debug for OutputTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputTarget")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("mode", &format_args!("{:o}", self.mode))
            .finish_non_exhaustive()
    }
}

/// Maps issuance tasks to files under a root directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    topology: Topology,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, topology: Topology) -> Self {
        Self {
            root: root.into(),
            topology,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Every file the plan will produce, in task order.
    ///
    /// In the split topology all material goes under `server/`. Channels with
    /// client leaves get their CA certificate and those leaves republished
    /// under `client/`. CA keys never leave the server group.
    pub fn plan(&self, plan: &ProvisioningPlan) -> Vec<PlannedOutput> {
        let client_channels: HashSet<&str> = plan
            .tasks()
            .iter()
            .filter(|task| task.role == Some(Role::Client))
            .map(|task| task.channel.as_str())
            .collect();
        let mut outputs = Vec::new();
        for task in plan.tasks() {
            match self.topology {
                Topology::Combined => {
                    self.push_outputs(
                        &mut outputs,
                        task,
                        None,
                        &[Artifact::Certificate, Artifact::PrivateKey],
                    );
                }
                Topology::Split => {
                    self.push_outputs(
                        &mut outputs,
                        task,
                        Some(Group::Server),
                        &[Artifact::Certificate, Artifact::PrivateKey],
                    );
                    let republished: &[Artifact] = match task.role {
                        None if client_channels.contains(task.channel.as_str()) => {
                            &[Artifact::Certificate]
                        }
                        None => &[],
                        Some(Role::Client) => &[Artifact::Certificate, Artifact::PrivateKey],
                        Some(Role::Server) => &[],
                    };
                    self.push_outputs(&mut outputs, task, Some(Group::Client), republished);
                }
            }
        }
        outputs
    }

    fn push_outputs(
        &self,
        outputs: &mut Vec<PlannedOutput>,
        task: &IssuanceTask,
        group: Option<Group>,
        artifacts: &[Artifact],
    ) {
        let dir = match group {
            None => self.root.join(&task.channel),
            Some(group) => self.root.join(group.dir_name()).join(&task.channel),
        };
        for &artifact in artifacts {
            let file_name = format!("{}.{}", task.stem, artifact.extension());
            let name = match group {
                None => format!("{}.{file_name}", task.channel),
                Some(group) => format!("{}.{}.{file_name}", group.dir_name(), task.channel),
            };
            outputs.push(PlannedOutput {
                name,
                path: dir.join(&file_name),
                mode: artifact.mode(),
                task: task.id,
                artifact,
                group,
            });
        }
    }
}

/// Checks that none of the planned paths exist yet.
///
/// Every conflict is collected before failing, so the caller can report the
/// whole set at once.
pub fn preflight(planned: &[PlannedOutput]) -> Result<()> {
    let mut conflicts = Vec::new();
    for output in planned {
        match fs::symlink_metadata(&output.path) {
            Ok(_) => conflicts.push(output.path.clone()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::io(&output.path, e)),
        }
    }

    if conflicts.is_empty() {
        debug!(paths = planned.len(), "preflight passed");
        Ok(())
    } else {
        Err(Error::AlreadyExists { paths: conflicts })
    }
}

/// Pairs each planned output with the PEM it should contain.
pub fn materialize(planned: &[PlannedOutput], issued: &IssuedSet) -> Result<Vec<OutputTarget>> {
    planned
        .iter()
        .map(|output| {
            let cert = issued.get(output.task).ok_or_else(|| {
                Error::Issuance(format!("nothing was issued for {}", output.name))
            })?;
            let contents = match output.artifact {
                Artifact::Certificate => cert.certificate_pem(),
                Artifact::PrivateKey => cert.private_key_pem(),
            };
            Ok(OutputTarget {
                name: output.name.clone(),
                path: output.path.clone(),
                contents: contents.as_bytes().to_vec(),
                mode: output.mode,
            })
        })
        .collect()
}

/// Writes every target, refusing to replace anything.
///
/// If any write fails, the files this call already created are removed
/// again. Directories it created are left in place.
pub fn commit(targets: &[OutputTarget]) -> Result<()> {
    let mut created: Vec<&Path> = Vec::with_capacity(targets.len());
    for target in targets {
        if let Err(err) = write_target(target) {
            for path in created.iter().rev() {
                if let Err(e) = fs::remove_file(path) {
                    debug!(path = %path.display(), error = %e, "could not roll back file");
                }
            }
            return Err(err);
        }
        created.push(&target.path);
    }
    info!(files = targets.len(), "wrote output files");
    Ok(())
}

fn write_target(target: &OutputTarget) -> Result<()> {
    if let Some(dir) = target.path.parent() {
        create_dirs(dir).map_err(|e| Error::io(dir, e))?;
    }

    let mut file = open_new(&target.path, target.mode).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists {
            Error::AlreadyExists {
                paths: vec![target.path.clone()],
            }
        } else {
            Error::io(&target.path, e)
        }
    })?;

    let written = file
        .write_all(&target.contents)
        .and_then(|()| set_mode(&file, target.mode))
        .and_then(|()| file.sync_all());
    if let Err(e) = written {
        drop(file);
        let _ = fs::remove_file(&target.path);
        return Err(Error::io(&target.path, e));
    }

    debug!(name = %target.name, path = %target.path.display(), mode = %format!("{:o}", target.mode), "wrote file");
    Ok(())
}

#[cfg(unix)]
fn create_dirs(dir: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().recursive(true).mode(DIRECTORY_MODE).create(dir)
}

#[cfg(not(unix))]
fn create_dirs(dir: &Path) -> io::Result<()> {
    fs::create_dir_all(dir)
}

#[cfg(unix)]
fn open_new(path: &Path, mode: u32) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;
    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
}

#[cfg(not(unix))]
fn open_new(path: &Path, _mode: u32) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}

// The umask may have narrowed the mode passed to open.
#[cfg(unix)]
fn set_mode(file: &fs::File, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_mode(_file: &fs::File, _mode: u32) -> io::Result<()> {
    Ok(())
}
