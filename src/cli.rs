//! Command-line surface.
//!
//! `server` runs all listeners; the remaining subcommands drive the REST
//! API through [`crate::client::Client`] and print pretty JSON. Exit code
//! is 0 on success and 1 on any failure.

use crate::client::Client;
use crate::config::Config;
use crate::error::Error;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "oastrix",
    about = "Out-of-band Application Security Testing (OAST) tool",
    long_about = "oastrix provides HTTP, HTTPS, and DNS listeners for detecting\n\
                  out-of-band interactions during security testing."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start all listeners (HTTP, HTTPS, DNS, API)
    Server(Config),

    /// Create a new token
    Generate {
        #[command(flatten)]
        client: ClientArgs,
        /// Optional label for the token
        #[arg(long)]
        label: Option<String>,
    },

    /// List all tokens with interaction counts
    List {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Fetch all interactions recorded for a token
    Interactions {
        #[command(flatten)]
        client: ClientArgs,
        /// Token value
        token: String,
    },

    /// Delete a token and everything recorded for it
    Delete {
        #[command(flatten)]
        client: ClientArgs,
        /// Token value
        token: String,
    },
}

#[derive(Args)]
struct ClientArgs {
    /// Base URL of the oastrix API
    #[arg(
        long = "api-url",
        env = "OASTRIX_API_URL",
        default_value = "http://localhost:8081"
    )]
    api_url: String,

    /// API key in display form (oastrix_<prefix>_<secret>)
    #[arg(long = "api-key", env = "OASTRIX_API_KEY")]
    api_key: String,
}

impl ClientArgs {
    fn client(&self) -> Result<Client, Error> {
        Client::new(&self.api_url, &self.api_key)
    }
}

impl Cli {
    pub async fn run(self) -> Result<(), Error> {
        match self.command {
            Commands::Server(config) => crate::server::lifecycle::run(config).await,
            Commands::Generate { client, label } => {
                let response = client.client()?.create_token(label).await?;
                print_json(&response)
            }
            Commands::List { client } => {
                let response = client.client()?.list_tokens().await?;
                print_json(&response)
            }
            Commands::Interactions { client, token } => {
                let response = client.client()?.get_interactions(&token).await?;
                print_json(&response)
            }
            Commands::Delete { client, token } => {
                let response = client.client()?.delete_token(&token).await?;
                print_json(&response)
            }
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
