use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use heatmap_common::Config;
use heatmap_scout::infra::gateway::{http_client, MastodonGateway, OsmGateway};
use heatmap_scout::infra::throttle::Throttle;
use heatmap_scout::scout::Scout;
use heatmap_scout::store::StateStore;
use mastodon_client::MastodonClient;
use osm_client::{NominatimClient, OverpassClient};

#[derive(Debug, Parser)]
#[command(name = "heatmap-scout", about = "Turns hashtag reports into a deduplicated heatmap")]
struct Cli {
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between cycles; defaults to POLL_INTERVAL_SECS.
    #[arg(long, env = "INTERVAL_SECS")]
    interval_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("heatmap=info".parse()?))
        .init();

    let cli = Cli::parse();
    info!("Heatmap scout starting...");

    let config = Config::from_env();
    config.log_redacted();
    let settings = config.pipeline.clone();

    let home_host = config
        .instance_host()
        .context("INSTANCE_URL has no host")?;

    let http = http_client(&config.user_agent, Duration::from_secs(config.http_timeout_secs))?;

    let mastodon = MastodonClient::new(http.clone(), &config.instance_url, &config.access_token);
    match mastodon.verify_credentials().await {
        Ok(account) => info!(account = account.acct.as_str(), "Authenticated"),
        Err(e) => warn!(error = %e, "Could not verify credentials, deletion probes may stay ambiguous"),
    }

    let max_backoff = Duration::from_secs(settings.max_backoff_secs);
    let throttle = Arc::new(Throttle::new(Duration::from_millis(settings.politeness_delay_ms)));
    let osm = Arc::new(OsmGateway::new(
        OverpassClient::new(http.clone(), config.overpass_endpoints.clone()),
        NominatimClient::new(http, &config.nominatim_url),
        throttle,
        max_backoff,
    ));
    let social = Arc::new(MastodonGateway::new(mastodon, max_backoff));

    let scout = Scout::new(settings, home_host, social, osm.clone(), osm);
    let store = StateStore::new(&config.data_dir);

    if cli.once {
        scout.run_once(&store).await?;
        return Ok(());
    }

    let interval = Duration::from_secs(cli.interval_secs.unwrap_or(config.poll_interval_secs).max(1));
    info!(interval_secs = interval.as_secs(), "Polling");

    loop {
        if let Err(e) = scout.run_once(&store).await {
            error!(error = %e, "Cycle failed");
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
