//! Cluster operations through remote PowerShell.
//!
//! Each call runs one `Invoke-Command -ComputerName <cluster>` with the
//! FailoverClusters cmdlets and reads `ConvertTo-Json` output.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;

use super::{ClusterError, ClusterGroup, ClusterNode, ClusterPort, GroupState};

const GROUP_PROJECTION: &str = "Select-Object Name, \
    @{n='OwnerNode';e={$_.OwnerNode.Name}}, \
    @{n='State';e={$_.State.ToString()}} | ConvertTo-Json -Compress";

/// [`ClusterPort`] backed by `powershell.exe` (or `pwsh`).
#[derive(Debug, Clone)]
pub struct PowerShellCluster {
    program: String,
}

impl Default for PowerShellCluster {
    fn default() -> Self {
        let program = if cfg!(windows) { "powershell" } else { "pwsh" };
        Self::new(program)
    }
}

impl PowerShellCluster {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
        }
    }

    async fn invoke(&self, cluster: &str, body: &str, args: &[&str]) -> Result<String, ClusterError> {
        let script = build_script(cluster, body, args);
        tracing::debug!("Running on cluster {}: {}", cluster, body);

        let output = Command::new(&self.program)
            .args(["-NoProfile", "-NonInteractive", "-Command", &script])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ClusterError::Spawn {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(ClusterError::Command {
                cluster: cluster.to_string(),
                message: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl ClusterPort for PowerShellCluster {
    async fn list_groups(&self, cluster: &str) -> Result<Vec<ClusterGroup>, ClusterError> {
        let out = self
            .invoke(cluster, &format!("Get-ClusterGroup | {}", GROUP_PROJECTION), &[])
            .await?;
        Ok(parse_list::<GroupRecord>(&out)?
            .into_iter()
            .map(GroupRecord::into_group)
            .collect())
    }

    async fn move_group(&self, cluster: &str, group: &str, node: &str) -> Result<ClusterGroup, ClusterError> {
        let out = self
            .invoke(
                cluster,
                &format!("Move-ClusterGroup -Name $a0 -Node $a1 -ErrorAction Stop | {}", GROUP_PROJECTION),
                &[group, node],
            )
            .await?;
        parse_list::<GroupRecord>(&out)?
            .into_iter()
            .next()
            .map(GroupRecord::into_group)
            .ok_or_else(|| ClusterError::Parse(format!("no group returned after moving {}", group)))
    }

    async fn list_nodes(&self, cluster: &str) -> Result<Vec<ClusterNode>, ClusterError> {
        let out = self
            .invoke(
                cluster,
                "Get-ClusterNode | Select-Object Name, @{n='State';e={$_.State.ToString()}}, NodeWeight \
                 | ConvertTo-Json -Compress",
                &[],
            )
            .await?;
        Ok(parse_list::<NodeRecord>(&out)?
            .into_iter()
            .map(|n| ClusterNode {
                name: n.name,
                state: n.state,
                node_weight: n.node_weight.unwrap_or(0),
            })
            .collect())
    }

    async fn set_node_weight(&self, cluster: &str, node: &str, weight: u32) -> Result<(), ClusterError> {
        let weight = weight.to_string();
        self.invoke(
            cluster,
            "(Get-ClusterNode -Name $a0 -ErrorAction Stop).NodeWeight = [int]$a1",
            &[node, &weight],
        )
        .await
        .map(|_| ())
    }

    async fn stop_node(&self, cluster: &str, node: &str) -> Result<(), ClusterError> {
        self.invoke(cluster, "Stop-ClusterNode -Name $a0 -ErrorAction Stop | Out-Null", &[node])
            .await
            .map(|_| ())
    }

    async fn start_node_fix_quorum(&self, cluster: &str, node: &str) -> Result<(), ClusterError> {
        self.invoke(
            cluster,
            "Start-ClusterNode -Name $a0 -FixQuorum -ErrorAction Stop | Out-Null",
            &[node],
        )
        .await
        .map(|_| ())
    }
}

/// Single-quoted PowerShell literal.
fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

/// Wrap `body` in a remote script block; `args` arrive as `$a0`, `$a1`, ...
fn build_script(cluster: &str, body: &str, args: &[&str]) -> String {
    let params: Vec<String> = (0..args.len()).map(|i| format!("$a{}", i)).collect();
    let mut script = format!(
        "$ErrorActionPreference = 'Stop'; Invoke-Command -ComputerName {} -ScriptBlock {{ ",
        ps_quote(cluster)
    );
    if !params.is_empty() {
        script.push_str(&format!("param({}) ", params.join(", ")));
    }
    script.push_str("Import-Module FailoverClusters; ");
    script.push_str(body);
    script.push_str(" }");
    if !args.is_empty() {
        let quoted: Vec<String> = args.iter().map(|a| ps_quote(a)).collect();
        script.push_str(&format!(" -ArgumentList {}", quoted.join(", ")));
    }
    script
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

/// `ConvertTo-Json` prints nothing for no objects, an object for one, and an
/// array for several.
fn parse_list<T: DeserializeOwned>(out: &str) -> Result<Vec<T>, ClusterError> {
    if out.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str::<OneOrMany<T>>(out) {
        Ok(OneOrMany::Many(items)) => Ok(items),
        Ok(OneOrMany::One(item)) => Ok(vec![item]),
        Err(e) => Err(ClusterError::Parse(format!("{}: {}", e, out))),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GroupRecord {
    name: String,
    owner_node: Option<String>,
    state: Option<String>,
}

impl GroupRecord {
    fn into_group(self) -> ClusterGroup {
        ClusterGroup {
            name: self.name,
            owner_node: self.owner_node,
            state: self.state.as_deref().map(GroupState::parse).unwrap_or(GroupState::Unknown),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeRecord {
    name: String,
    state: String,
    node_weight: Option<u32>,
}
