use crate::{k8s, session};
use anyhow::{bail, Result};
use clap::Parser;
use prometheus_client::registry::Registry;
use std::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "ike-controller", about = "A workspace session controller")]
pub struct Args {
    #[clap(long, default_value = "ike=info,warn", env = "IKE_CONTROLLER_LOG")]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Seconds to wait before retrying a session whose reconciliation
    /// failed.
    #[clap(long, default_value = "5")]
    requeue_after_error_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            requeue_after_error_secs,
        } = self;

        let mut prom = <Registry>::default();
        let session_metrics =
            session::ReconcileMetrics::register(prom.sub_registry_with_prefix("session"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let client = runtime.client();
        let reconciler = session::Reconciler::new(
            k8s::KubeStore::new(client.clone()),
            session::Manipulators::standard(),
            session_metrics,
        );
        tokio::spawn(
            session::run(
                client,
                reconciler,
                Duration::from_secs(requeue_after_error_secs),
                runtime.shutdown_handle(),
            )
            .instrument(info_span!("sessions")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
