#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use ike::{create_or_join, leave, Joined, Options};
use ike_controller_core::strategy;
use ike_controller_k8s_api::{Client, KubeStore};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Route a slice of cluster traffic to your own build of a service
#[derive(Parser)]
#[clap(name = "ike", version, about)]
struct Args {
    #[clap(long, env = "IKE_LOG", default_value = "warn")]
    log_level: kubert::LogFilter,

    #[clap(long, env = "IKE_LOG_FORMAT", default_value = "plain")]
    log_format: kubert::LogFormat,

    /// Namespace of the session; defaults to the kubeconfig context's
    #[clap(long, short = 'n', global = true)]
    namespace: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Creates a session, or joins it, and waits for the deployment's
    /// variant to be ready
    Create {
        /// The Deployment or DeploymentConfig to replace
        #[clap(long, short = 'd')]
        deployment: String,

        /// Session name; generated from the local user when omitted
        #[clap(long, short = 's')]
        session: Option<String>,

        /// Traffic to redirect, as type:name=value
        #[clap(long, short = 'r')]
        route: Option<String>,

        /// Image to run in place of the deployment's
        #[clap(long, short = 'i')]
        image: Option<String>,

        /// How the variant is prepared; prepared-image when an image is
        /// given, telepresence otherwise
        #[clap(long)]
        strategy: Option<String>,

        #[clap(long)]
        telepresence_version: Option<String>,

        /// Seconds to wait for the variant
        #[clap(long, default_value = "60")]
        timeout: u64,

        /// Seconds between status checks
        #[clap(long, default_value = "2")]
        interval: u64,
    },

    /// Removes a deployment from a session, deleting the session when it
    /// was the last one
    Delete {
        #[clap(long, short = 'd')]
        deployment: String,

        #[clap(long, short = 's')]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let Args {
        log_level,
        log_format,
        namespace,
        command,
    } = Args::parse();

    log_format.try_init(log_level)?;

    let client = Client::try_default().await?;
    let namespace = namespace.unwrap_or_else(|| client.default_namespace().to_string());
    let store = KubeStore::new(client);

    match command {
        Command::Create {
            deployment,
            session,
            route,
            image,
            strategy,
            telepresence_version,
            timeout,
            interval,
        } => {
            let strategy_name = match (strategy, &image) {
                (Some(name), _) => name,
                (None, Some(_)) => strategy::PREPARED_IMAGE.to_string(),
                (None, None) => strategy::TELEPRESENCE.to_string(),
            };
            let mut options = Options::new(&namespace, &deployment, strategy_name);
            options.session_name = session;
            options.route = route;
            options.poll_timeout = Duration::from_secs(timeout);
            options.poll_interval = Duration::from_secs(interval);
            if let Some(image) = image {
                options.args.insert(strategy::ARG_IMAGE.to_string(), image);
            }
            if let Some(version) = telepresence_version {
                options.args.insert(strategy::ARG_VERSION.to_string(), version);
            }

            let cancel = CancellationToken::new();
            tokio::spawn({
                let cancel = cancel.clone();
                async move {
                    if tokio::signal::ctrl_c().await.is_ok() {
                        tracing::info!("Interrupted");
                        cancel.cancel();
                    }
                }
            });

            let joined = create_or_join(&store, &options, &cancel).await?;
            print_joined(&joined);
        }

        Command::Delete {
            deployment,
            session,
        } => {
            leave(&store, &namespace, &session, &deployment, false, None).await?;
            println!("Removed {deployment} from session {session}");
        }
    }

    Ok(())
}

fn print_joined(joined: &Joined) {
    let Joined {
        session_name,
        state,
        ..
    } = joined;
    println!("session:    {session_name}");
    println!("deployment: {}", state.deployment_name);
    println!("route:      {}", state.route);
    if !state.hosts.is_empty() {
        println!("hosts:      {}", state.hosts.join(", "));
    }
}
