//! `mailrelay` - SMTP relay delivering through Microsoft Graph
//!
//! Accepts mail from local applications over plain SMTP and sends it with
//! the Graph `sendMail` API, authenticated through the `OAuth2` device flow.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use anyhow::Context;
use mailrelay_core::{Error, GraphMailSender, RelayConfig, RelayLoop, mail_queue};
use mailrelay_oauth::{CredentialStore, DeviceCodeHandler, OAuthClient, Provider, TokenHandler};
use mailrelay_smtp::Listener;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "mailrelay=info,mailrelay_core=info,mailrelay_oauth=info,mailrelay_smtp=info"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match RelayConfig::from_env().validate() {
        Ok(config) => config,
        Err(Error::Config(errors)) => {
            eprintln!("The configuration contains errors:");
            for e in &errors {
                eprintln!("> {e}");
            }
            return Ok(ExitCode::FAILURE);
        }
        Err(e) => return Err(e.into()),
    };

    info!("Starting mailrelay");
    run(config).await?;
    Ok(ExitCode::SUCCESS)
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let provider = Provider::new("Microsoft", &config.authorize_url, &config.token_url)
        .context("invalid identity provider endpoints")?;
    let http_client = config.http_client()?;
    let client = OAuthClient::new(config.client_id.as_str(), provider)?
        .with_http_client(http_client.clone());
    let mut handler = DeviceCodeHandler::new(client)?.with_scope(config.scope.as_str());
    let store = CredentialStore::new(&config.credentials_file);
    handler.load_credentials(&store).await;

    let sender = GraphMailSender::new(&config.send_mail_url)?.with_http_client(http_client);

    let listener = Listener::bind(config.listen_addr())
        .await
        .with_context(|| format!("failed to listen on {}", config.listen_addr()))?
        .with_max_message_size(config.max_message_size);

    let shutdown = CancellationToken::new();
    let (queue, inbox) = mail_queue();
    let server = tokio::spawn(listener.run(queue, shutdown.clone()));

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Interrupt received, shutting down"),
            Err(e) => error!("Failed to listen for interrupt: {e}"),
        }
        signal.cancel();
    });

    let mut relay = RelayLoop::new(handler, sender, store, inbox, shutdown.clone());
    let relayed = relay.run().await;

    shutdown.cancel();
    server.await.context("listener task panicked")??;
    relayed?;

    info!("mailrelay stopped");
    Ok(())
}
