use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Ark - training-gated cloud access
///
/// Talks to the local ark-agent, which holds your cloud credentials and
/// checks training requirements before privileged operations.
#[derive(Parser, Debug)]
#[command(name = "ark")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file (defaults to $ARK_CONFIG or ~/.ark/config.yml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage the background agent
    Agent {
        #[command(subcommand)]
        command: AgentCommands,
    },
    /// Read and change configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage stored cloud credentials
    Credentials {
        #[command(subcommand)]
        command: CredentialsCommands,
    },
    /// S3 operations
    S3 {
        #[command(subcommand)]
        command: S3Commands,
    },
    /// Generate shell completion scripts
    Completion {
        /// Target shell
        #[arg(value_enum)]
        shell: Shell,
    },
    /// Display version information
    Version,
}

#[derive(Subcommand, Debug)]
pub enum AgentCommands {
    /// Start the agent in the background
    Start {
        /// Agent executable (defaults to ark-agent on PATH or next to ark)
        #[arg(long)]
        binary: Option<PathBuf>,
    },
    /// Stop the running agent
    Stop,
    /// Show whether the agent is running
    Status,
    /// Run the agent in the foreground
    Run,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print one configuration value
    Get {
        /// Key path, e.g. agent.port
        key: String,
    },
    /// Change one configuration value
    Set {
        /// Key path, e.g. agent.port
        key: String,
        value: String,
    },
    /// Print the whole configuration
    Show,
    /// Print the configuration file location
    Path,
    /// Write a configuration file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum CredentialsCommands {
    /// Store credentials for a profile
    Add {
        /// Profile name
        profile: String,

        /// AWS access key ID
        #[arg(long)]
        access_key_id: String,

        /// AWS secret access key
        #[arg(long)]
        secret_access_key: String,

        /// AWS session token (for temporary credentials)
        #[arg(long)]
        session_token: Option<String>,

        /// Default region for this profile
        #[arg(long)]
        region: Option<String>,
    },
    /// List stored profiles
    List,
    /// Delete a profile's credentials
    Delete {
        /// Profile name
        profile: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum S3Commands {
    /// Create a bucket (requires completed training)
    CreateBucket {
        /// Bucket name
        name: String,

        /// Region (defaults to the profile's region)
        #[arg(long)]
        region: Option<String>,

        /// Encryption type: AES256, aws:kms or none
        #[arg(long, default_value = "AES256")]
        encryption: String,

        /// KMS key ID for aws:kms encryption
        #[arg(long)]
        kms_key_id: Option<String>,

        /// Enable bucket versioning
        #[arg(long)]
        versioning: bool,

        /// Credential profile (defaults to current_profile)
        #[arg(long)]
        profile: Option<String>,
    },
}
