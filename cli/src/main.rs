use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;

mod commands;
mod logging;
mod utils;

use commands::{admin, health, serve, sign};

/// Keystone CLI - run and administer the Keystone record API
#[derive(Parser)]
#[command(name = "keystone")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to KEYSTONE_CONFIG, then config/keystone.yaml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server
    Serve {
        /// Port to listen on, overriding the configuration
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// User management
    User {
        #[command(subcommand)]
        action: UserAction,
    },

    /// Role management
    Role {
        #[command(subcommand)]
        action: RoleAction,
    },

    /// Record access-control entries
    Acl {
        #[command(subcommand)]
        action: AclAction,
    },

    /// Sign a request and print the headers to send with it
    Sign(sign::SignArgs),

    /// Query a running server's health endpoint
    Health {
        /// Base URL of the server
        #[arg(long, default_value = "http://localhost:3030")]
        url: String,

        /// Output format (json, text)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    /// Create a user
    Add {
        username: String,

        #[arg(long, env = "KEYSTONE_PASSWORD", hide_env_values = true)]
        password: String,

        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Role to assign; repeatable
        #[arg(long = "role", default_value = "user")]
        roles: Vec<String>,
    },
}

#[derive(Subcommand)]
enum RoleAction {
    /// Create a role
    Add {
        name: String,

        #[arg(long)]
        description: Option<String>,
    },
}

#[derive(Subcommand)]
enum AclAction {
    /// Grant roles permissions on records of a resource
    Grant {
        /// Resource name the records belong to
        #[arg(long)]
        resource: String,

        /// Record id; repeatable
        #[arg(long = "record-id", required = true)]
        record_ids: Vec<i64>,

        /// Role name; repeatable
        #[arg(long = "role", required = true)]
        roles: Vec<String>,

        /// Permission (read, update, delete); repeatable
        #[arg(long = "permission", default_value = "read")]
        permissions: Vec<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // The server sets up its own file logging.
    if !matches!(cli.command, Commands::Serve { .. }) {
        logging::init_console(cli.verbose);
    }

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Serve { port } => serve::execute(config, port, cli.verbose).await,
        Commands::User { action } => match action {
            UserAction::Add {
                username,
                password,
                name,
                roles,
            } => admin::add_user(config, &username, &password, name.as_deref(), &roles).await,
        },
        Commands::Role { action } => match action {
            RoleAction::Add { name, description } => {
                admin::add_role(config, &name, description.as_deref()).await
            }
        },
        Commands::Acl { action } => match action {
            AclAction::Grant {
                resource,
                record_ids,
                roles,
                permissions,
            } => admin::grant_acl(config, &resource, &record_ids, &roles, &permissions).await,
        },
        Commands::Sign(args) => sign::execute(args),
        Commands::Health { url, format } => health::execute(&url, &format).await,
    }
}
