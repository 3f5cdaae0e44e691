use anyhow::Result;
use clap::Parser;

mod cli;
mod commands;

use cli::{AgentCommands, Args, Commands, ConfigCommands, CredentialsCommands, S3Commands};
use commands::Session;

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = Args::parse();
    ark::logging::init_logging(args.verbose, true);

    // Completion, version and config init work without a readable config
    let config_path = args.config;
    let session = || Session::load(config_path.clone());

    match args.command {
        Commands::Agent { command } => {
            let session = session()?;
            match command {
                AgentCommands::Start { binary } => commands::agent::start(&session, binary),
                AgentCommands::Stop => commands::agent::stop(&session),
                AgentCommands::Status => commands::agent::status(&session),
                AgentCommands::Run => commands::agent::run(&session),
            }
        }
        Commands::Config { command } => match command {
            ConfigCommands::Get { key } => commands::config::get(&session()?, &key),
            ConfigCommands::Set { key, value } => commands::config::set(&session()?, &key, &value),
            ConfigCommands::Show => commands::config::show(&session()?),
            ConfigCommands::Path => commands::config::path(&session()?),
            ConfigCommands::Init { force } => {
                let path = commands::resolve_config_path(config_path.clone())?;
                commands::config::init(&path, force)
            }
        },
        Commands::Credentials { command } => match command {
            CredentialsCommands::Add {
                profile,
                access_key_id,
                secret_access_key,
                session_token,
                region,
            } => commands::credentials::add(
                &session()?,
                commands::credentials::NewCredential {
                    profile,
                    access_key_id,
                    secret_access_key,
                    session_token,
                    region,
                },
            ),
            CredentialsCommands::List => commands::credentials::list(&session()?),
            CredentialsCommands::Delete { profile } => commands::credentials::delete(&session()?, &profile),
        },
        Commands::S3 { command } => match command {
            S3Commands::CreateBucket {
                name,
                region,
                encryption,
                kms_key_id,
                versioning,
                profile,
            } => commands::s3::create_bucket(
                &session()?,
                commands::s3::BucketOptions {
                    name,
                    region,
                    encryption,
                    kms_key_id,
                    versioning,
                    profile,
                },
            ),
        },
        Commands::Completion { shell } => {
            commands::completion::run(shell);
            Ok(())
        }
        Commands::Version => {
            commands::version::run();
            Ok(())
        }
    }
}
