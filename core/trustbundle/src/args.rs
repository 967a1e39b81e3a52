// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Manage a local CA trust bundle
#[derive(Parser, Debug)]
#[command(name = "trustbundle", version, about = "Manage a local CA trust bundle")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

/// Options accepted before or after any subcommand
#[derive(Args, Debug)]
pub struct GlobalOpts {
    /// Certificate store directory (default: ~/.trustbundle)
    #[arg(long, env = "TRUSTBUNDLE_HOME", global = true, value_name = "DIR")]
    pub home: Option<PathBuf>,

    /// Path to a YAML configuration file
    #[arg(long, env = "TRUSTBUNDLE_CONFIG", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the certificate store and its first combined bundle
    Init {
        /// Re-create an existing store, dropping every user certificate
        #[arg(long)]
        force: bool,
    },

    /// Manage user certificates
    Cert(CertArgs),

    /// Manage the base CA bundle
    Bundle(BundleArgs),

    /// Regenerate the combined bundle from the files on disk
    Rebuild,

    /// Check the store for inconsistencies
    Doctor {
        #[arg(long)]
        json: bool,
    },

    /// Remove temporary files left by interrupted writes
    Clean,

    /// Show a summary of the store
    Status {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct CertArgs {
    #[command(subcommand)]
    pub command: CertCommand,
}

#[derive(Subcommand, Debug)]
pub enum CertCommand {
    /// Add a PEM certificate under a name
    Add {
        /// PEM file holding exactly one certificate
        path: PathBuf,

        #[arg(long)]
        name: String,

        /// Accept a certificate whose validity has ended
        #[arg(long)]
        allow_expired: bool,
    },

    /// List user certificates
    List {
        #[arg(long)]
        json: bool,

        /// Only show expired certificates
        #[arg(long)]
        expired: bool,
    },

    /// Remove a user certificate
    Remove { name: String },

    /// Show details of a user certificate
    Inspect {
        name: String,

        #[arg(long)]
        json: bool,
    },
}

#[derive(Args, Debug)]
pub struct BundleArgs {
    #[command(subcommand)]
    pub command: BundleCommand,
}

#[derive(Subcommand, Debug)]
pub enum BundleCommand {
    /// Show base and combined bundle details
    Info {
        #[arg(long)]
        json: bool,
    },

    /// Replace the base bundle with a local PEM file
    Update {
        #[arg(long, value_name = "PATH")]
        file: PathBuf,

        /// Label recorded as the bundle source (default: the file path)
        #[arg(long)]
        origin: Option<String>,

        /// Proceed even if the new bundle holds far fewer certificates
        #[arg(long)]
        yes: bool,
    },

    /// Go back to the bundle shipped with trustbundle
    Reset,
}

impl Command {
    /// Whether the command asked for JSON output.
    pub fn json(&self) -> bool {
        match self {
            Command::Doctor { json } | Command::Status { json } => *json,
            Command::Cert(args) => match &args.command {
                CertCommand::List { json, .. } | CertCommand::Inspect { json, .. } => *json,
                _ => false,
            },
            Command::Bundle(args) => match &args.command {
                BundleCommand::Info { json } => *json,
                _ => false,
            },
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_cert_add() {
        let cli = Cli::try_parse_from([
            "trustbundle",
            "cert",
            "add",
            "corp.pem",
            "--name",
            "corp",
            "--allow-expired",
            "--home",
            "/tmp/store",
        ])
        .unwrap();

        assert_eq!(cli.global.home, Some(PathBuf::from("/tmp/store")));
        match cli.command {
            Command::Cert(CertArgs {
                command:
                    CertCommand::Add {
                        path,
                        name,
                        allow_expired,
                    },
            }) => {
                assert_eq!(path, PathBuf::from("corp.pem"));
                assert_eq!(name, "corp");
                assert!(allow_expired);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cert_add_requires_name() {
        assert!(Cli::try_parse_from(["trustbundle", "cert", "add", "corp.pem"]).is_err());
    }

    #[test]
    fn test_json_flag() {
        let cli = Cli::try_parse_from(["trustbundle", "cert", "list", "--json"]).unwrap();
        assert!(cli.command.json());

        let cli = Cli::try_parse_from(["trustbundle", "bundle", "info"]).unwrap();
        assert!(!cli.command.json());

        let cli = Cli::try_parse_from(["trustbundle", "doctor", "--json"]).unwrap();
        assert!(cli.command.json());

        let cli = Cli::try_parse_from(["trustbundle", "init", "--force"]).unwrap();
        assert!(!cli.command.json());
    }

    #[test]
    fn test_bundle_update_flags() {
        let cli = Cli::try_parse_from([
            "trustbundle",
            "bundle",
            "update",
            "--file",
            "cacert.pem",
            "--yes",
        ])
        .unwrap();
        match cli.command {
            Command::Bundle(BundleArgs {
                command: BundleCommand::Update { file, origin, yes },
            }) => {
                assert_eq!(file, PathBuf::from("cacert.pem"));
                assert_eq!(origin, None);
                assert!(yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
