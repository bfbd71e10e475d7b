use anyhow::Context;
use bullhub::core::config::HubConfig;
use bullhub::core::types::Term;
use bullhub::hub::{HubConnection, HubEvent};
use bullhub::PriceStore;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const ENV_PREFIX: &str = "BULLMARKET";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,bullhub=debug")),
        )
        .init();

    #[cfg(feature = "env-file")]
    let config = HubConfig::from_env_file(ENV_PREFIX).context("loading hub configuration")?;
    #[cfg(not(feature = "env-file"))]
    let config = HubConfig::from_env(ENV_PREFIX).context("loading hub configuration")?;

    let hub = HubConnection::with_config(config).context("building hub connection")?;
    let mut events = hub.subscribe();

    hub.connect(None).await.context("connecting to hub")?;
    info!("connected");

    // Example subscriptions - the arbitrage scans compare both terms of one ticker
    hub.subscribe_to_group("merval").await?;
    hub.subscribe_to_price_change("GGAL", Term::Immediate).await?;
    hub.subscribe_to_price_change("GGAL", Term::Hours48).await?;

    let mut store = PriceStore::new();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, disconnecting");
                break;
            }
            event = events.recv() => match event {
                Ok(HubEvent::Disconnected) => {
                    warn!("hub disconnected");
                    break;
                }
                Ok(HubEvent::Error(e)) => warn!(error = %e, "hub error"),
                Ok(event @ HubEvent::Price { .. }) => {
                    if store.apply(&event) {
                        if let HubEvent::Price { group, snapshot } = &event {
                            info!(
                                %group,
                                ticker = %snapshot.ticker,
                                ask = ?snapshot.best_ask().map(|level| level.price),
                                bid = ?snapshot.best_bid().map(|level| level.price),
                                "price update"
                            );
                        }
                    }
                }
                Ok(HubEvent::Message(_)) => {}
                Ok(other) => info!(event = other.name(), "hub event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event receiver lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    if let Err(e) = hub.disconnect(None).await {
        error!(error = %e, "disconnect failed");
    }
    info!(tickers = store.len(), "done");
    Ok(())
}
