use crate::cli::args::{ClusterCommand, Command, ExecCredentialArgs, KubernetesCommand, SaveKubeconfigArgs};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq)]
pub struct SaveKubeconfigInput {
    pub cluster_id: String,
    pub kubeconfig: Option<PathBuf>,
    pub credential_plugin: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExecCredentialInput {
    pub cluster_id: String,
    pub kubeconfig: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    SaveKubeconfig(SaveKubeconfigInput),
    ExecCredential(ExecCredentialInput),
}

impl From<SaveKubeconfigArgs> for SaveKubeconfigInput {
    fn from(args: SaveKubeconfigArgs) -> Self {
        SaveKubeconfigInput {
            cluster_id: args.cluster,
            kubeconfig: args.kubeconfig,
            credential_plugin: args.credential_plugin,
        }
    }
}

impl From<ExecCredentialArgs> for ExecCredentialInput {
    fn from(args: ExecCredentialArgs) -> Self {
        ExecCredentialInput {
            cluster_id: args.cluster,
            kubeconfig: args.kubeconfig,
        }
    }
}

impl From<Command> for Action {
    fn from(command: Command) -> Self {
        let Command::Kubernetes {
            command: KubernetesCommand::Cluster { command },
        } = command;

        match command {
            ClusterCommand::SaveKubeconfig(args) => Action::SaveKubeconfig(args.into()),
            ClusterCommand::ExecCredential(args) => Action::ExecCredential(args.into()),
        }
    }
}
