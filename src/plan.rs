use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cert::extensions::ExtendedKeyUsageOption;
use crate::error::{Error, Result};
use crate::issuer::{self, Identity, IssuedCertificate};
use crate::key::KeyType;

/// File stem used for every channel's CA.
pub const CA_STEM: &str = "ca";

/// How the issued material is laid out on disk.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    /// One directory per channel holding everything.
    #[default]
    Combined,
    /// A `server/` tree with everything plus a `client/` tree with what clients need.
    Split,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topology::Combined => f.write_str("combined"),
            Topology::Split => f.write_str("split"),
        }
    }
}

/// Which side of a TLS connection a leaf identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub fn usage(&self) -> ExtendedKeyUsageOption {
        match self {
            Role::Server => ExtendedKeyUsageOption::ServerAuth,
            Role::Client => ExtendedKeyUsageOption::ClientAuth,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafProfile {
    pub stem: String,
    pub common_name: String,
    pub sans: Vec<String>,
    pub role: Role,
}

impl LeafProfile {
    /// A leaf whose common name doubles as its only SAN.
    pub fn named(stem: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        let name = name.into();
        Self {
            stem: stem.into(),
            common_name: name.clone(),
            sans: vec![name],
            role,
        }
    }
}

/// One CA and the leaves it signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelProfile {
    pub name: String,
    pub key_type: KeyType,
    pub ca_common_name: String,
    pub leaves: Vec<LeafProfile>,
}

/// What to provision: a topology and its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningProfile {
    pub topology: Topology,
    pub channels: Vec<ChannelProfile>,
}

impl ProvisioningProfile {
    /// The HTTP + gRPC profile the `ntun` services expect.
    ///
    /// The HTTP channel gets a server certificate for `http_host`; the gRPC
    /// channel gets a `server` and a `client` certificate for mutual TLS.
    pub fn standard(
        topology: Topology,
        http_key_type: KeyType,
        http_host: &str,
        grpc_key_type: KeyType,
    ) -> Self {
        Self {
            topology,
            channels: vec![
                ChannelProfile {
                    name: "http".to_string(),
                    key_type: http_key_type,
                    ca_common_name: "Root http ca".to_string(),
                    leaves: vec![LeafProfile::named("server", http_host, Role::Server)],
                },
                ChannelProfile {
                    name: "grpc".to_string(),
                    key_type: grpc_key_type,
                    ca_common_name: "Root grpc ca".to_string(),
                    leaves: vec![
                        LeafProfile::named("server", "server", Role::Server),
                        LeafProfile::named("client", "client", Role::Client),
                    ],
                },
            ],
        }
    }
}

/// Index of a task within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(usize);

/// One certificate to issue.
#[derive(Debug, Clone)]
pub struct IssuanceTask {
    pub id: TaskId,
    pub channel: String,
    pub stem: String,
    pub key_type: KeyType,
    pub identity: Identity,
    /// `None` for CAs.
    pub role: Option<Role>,
    pub parent: Option<TaskId>,
}

/// The validated set of issuance tasks for a profile.
///
/// Tasks are stored so that every parent precedes its children.
#[derive(Debug, Clone)]
pub struct ProvisioningPlan {
    topology: Topology,
    tasks: Vec<IssuanceTask>,
}

fn check_path_component(kind: &str, value: &str) -> Result<()> {
    if value.is_empty()
        || value == "."
        || value == ".."
        || value.contains(['/', '\\'])
        || value.contains(char::is_whitespace)
    {
        return Err(Error::InvalidInput(format!(
            "{kind} name {value:?} cannot be used as a path component"
        )));
    }
    Ok(())
}

fn check_common_name(owner: &str, common_name: &str) -> Result<()> {
    if common_name.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{owner} has an empty common name")));
    }
    Ok(())
}

impl ProvisioningPlan {
    /// Validates `profile` and turns it into an ordered task list.
    pub fn build(profile: &ProvisioningProfile) -> Result<Self> {
        if profile.channels.is_empty() {
            return Err(Error::InvalidInput("profile has no channels".to_string()));
        }

        let mut tasks = Vec::new();
        let mut channel_names = HashSet::new();
        for channel in &profile.channels {
            check_path_component("channel", &channel.name)?;
            if !channel_names.insert(channel.name.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "duplicate channel {:?}",
                    channel.name
                )));
            }
            channel.key_type.validate()?;
            check_common_name(&format!("{} CA", channel.name), &channel.ca_common_name)?;

            let ca_id = TaskId(tasks.len());
            tasks.push(IssuanceTask {
                id: ca_id,
                channel: channel.name.clone(),
                stem: CA_STEM.to_string(),
                key_type: channel.key_type,
                identity: Identity::ca(channel.ca_common_name.as_str()),
                role: None,
                parent: None,
            });

            let mut stems = HashSet::new();
            for leaf in &channel.leaves {
                check_path_component("leaf", &leaf.stem)?;
                if leaf.stem == CA_STEM {
                    return Err(Error::InvalidInput(format!(
                        "leaf stem {CA_STEM:?} in channel {:?} is reserved for the CA",
                        channel.name
                    )));
                }
                if !stems.insert(leaf.stem.as_str()) {
                    return Err(Error::InvalidInput(format!(
                        "duplicate leaf {:?} in channel {:?}",
                        leaf.stem, channel.name
                    )));
                }
                check_common_name(&format!("{}/{}", channel.name, leaf.stem), &leaf.common_name)?;

                tasks.push(IssuanceTask {
                    id: TaskId(tasks.len()),
                    channel: channel.name.clone(),
                    stem: leaf.stem.clone(),
                    key_type: channel.key_type,
                    identity: Identity::leaf(
                        leaf.common_name.as_str(),
                        leaf.sans.clone(),
                        vec![leaf.role.usage()],
                    ),
                    role: Some(leaf.role),
                    parent: Some(ca_id),
                });
            }
        }

        Ok(Self {
            topology: profile.topology,
            tasks,
        })
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn tasks(&self) -> &[IssuanceTask] {
        &self.tasks
    }

    pub fn task(&self, id: TaskId) -> &IssuanceTask {
        &self.tasks[id.0]
    }

    /// Groups tasks by depth: roots first, then the tasks they sign.
    pub fn waves(&self) -> Vec<Vec<TaskId>> {
        let mut depth = vec![0usize; self.tasks.len()];
        let mut waves: Vec<Vec<TaskId>> = Vec::new();
        for task in &self.tasks {
            let d = task.parent.map_or(0, |parent| depth[parent.0] + 1);
            depth[task.id.0] = d;
            if waves.len() <= d {
                waves.resize_with(d + 1, Vec::new);
            }
            waves[d].push(task.id);
        }
        waves
    }

    /// Issues every task, wave by wave.
    ///
    /// Tasks within a wave run concurrently. The first failure aborts the run
    /// once its wave has finished.
    pub fn issue_all(&self) -> Result<IssuedSet> {
        let mut issued: HashMap<TaskId, Arc<IssuedCertificate>> = HashMap::new();

        for wave in self.waves() {
            let mut jobs = Vec::with_capacity(wave.len());
            for id in wave {
                let task = self.task(id);
                let parent = match task.parent {
                    None => None,
                    Some(parent) => Some(issued.get(&parent).cloned().ok_or_else(|| {
                        Error::Issuance(format!(
                            "{}/{} was scheduled before its CA",
                            task.channel, task.stem
                        ))
                    })?),
                };
                jobs.push((task, parent));
            }

            let results = std::thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .into_iter()
                    .map(|(task, parent)| {
                        let handle = scope
                            .spawn(move || issuer::issue(task.key_type, &task.identity, parent));
                        (task, handle)
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(task, handle)| {
                        let result = handle.join().unwrap_or_else(|_| {
                            Err(Error::Issuance(format!(
                                "issuing {}/{} panicked",
                                task.channel, task.stem
                            )))
                        });
                        (task.id, result)
                    })
                    .collect::<Vec<_>>()
            });

            for (id, result) in results {
                issued.insert(id, Arc::new(result?));
            }
        }

        info!(certificates = issued.len(), "issued all certificates");
        Ok(IssuedSet { issued })
    }
}

/// The certificates produced by [`ProvisioningPlan::issue_all`], by task.
#[derive(Debug, Default)]
pub struct IssuedSet {
    issued: HashMap<TaskId, Arc<IssuedCertificate>>,
}

impl IssuedSet {
    pub fn get(&self, id: TaskId) -> Option<&Arc<IssuedCertificate>> {
        self.issued.get(&id)
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}
