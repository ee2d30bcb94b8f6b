use anyhow::Context;
use clap::Parser;
use futures_util::StreamExt;
use monitor_client::{ClientConfig, MonitorClient, StreamEvent};
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Monitor endpoint (host:port)
	#[arg(long, env = "MONITOR_ENDPOINT", default_value = monitor_client::config::DEFAULT_ENDPOINT)]
	endpoint: String,

	/// Use TLS with the platform's root certificates
	#[arg(long, env = "MONITOR_SECURE", default_value = "false")]
	secure: bool,

	/// Per-command deadline in milliseconds
	#[arg(long, env = "MONITOR_DEADLINE_MS")]
	deadline_ms: Option<u64>,

	/// Text message to send once subscribed
	#[arg(long, default_value = "Hello World!")]
	message: String,

	/// Recipient of the message; empty for none
	#[arg(long, default_value = "")]
	target: String,

	/// Stop listening after this many seconds
	#[arg(long)]
	listen_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "monitor_cli=info,monitor_client=info".into()))
		.with(tracing_subscriber::fmt::layer())
		.init();

	let Args {
		endpoint,
		secure,
		deadline_ms,
		message,
		target,
		listen_secs,
	} = Args::parse();
	let config = ClientConfig::new(endpoint).with_secure(secure).with_deadline_ms(deadline_ms);

	let client = MonitorClient::open(config).await.context("failed to open monitor client")?;
	let mut status = client.subscribe()?;

	// The command does not wait for the subscription to deliver anything.
	let command = tokio::spawn({
		let client = client.clone();
		async move {
			match client.send_text(message, target).await {
				Ok(response) => tracing::info!(success = response.success, "{}", response.message),
				Err(e) => tracing::error!("command failed: {e}"),
			}
		}
	});

	let listen = async {
		while let Some(event) = status.next().await {
			match event {
				StreamEvent::Data(item) => {
					let payload = serde_json::to_string(item.payload()).unwrap_or_default();
					tracing::info!(%payload, "status");
				}
				StreamEvent::StatusChange(info) => tracing::info!(?info, "stream status"),
				StreamEvent::End => tracing::info!("status stream ended"),
				StreamEvent::Error(e) => tracing::error!("status stream failed: {e}"),
			}
		}
	};

	let deadline = listen_secs.map(Duration::from_secs);
	tokio::select! {
		() = listen => {}
		_ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
		() = sleep_for(deadline) => tracing::info!("listen window elapsed"),
	}

	if !command.is_finished() {
		tracing::info!("closing with the command still pending");
	}
	client.close();
	if let Err(e) = command.await {
		tracing::warn!("command task aborted: {e}");
	}
	Ok(())
}

async fn sleep_for(duration: Option<Duration>) {
	match duration {
		Some(duration) => tokio::time::sleep(duration).await,
		None => std::future::pending().await,
	}
}
