//! Hub lifecycle: one discovery round, one subscription per sensor, then
//! the ingestion loop.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, error, info};

use vigil_bus::{BusClient, BusEvent};
use vigil_protocol::defaults::SENSORS_KEY;
use vigil_protocol::Mode;

use crate::collaborators::{
    HttpEnricher, JsonlEventStore, NoopEnricher, NoopNotifier, WebhookNotifier,
};
use crate::discovery::{discover, SearchConfig};
use crate::ingest::EventIngest;
use crate::registry::SensorRegistry;
use crate::{HubArgs, HubError};

/// How often the hub reads sensor modes back from the shared registry.
const MODE_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HubConfig {
    pub group: Ipv4Addr,
    pub port: u16,
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub bus_bind_addr: String,
}

impl HubConfig {
    pub fn from_args(args: &HubArgs) -> Result<Self, HubError> {
        let group: Ipv4Addr = args
            .group
            .parse()
            .map_err(|_| HubError::Config(format!("invalid discovery group '{}'", args.group)))?;
        if args.attempts == 0 {
            return Err(HubError::Config("attempts must be at least 1".to_string()));
        }
        Ok(Self {
            group,
            port: args.port,
            max_attempts: args.attempts,
            per_attempt_timeout: Duration::from_millis(args.attempt_timeout_ms),
            bus_bind_addr: args.bus_bind.clone(),
        })
    }

    pub fn search_config(&self) -> SearchConfig {
        SearchConfig {
            group: self.group,
            port: self.port,
            max_attempts: self.max_attempts,
            per_attempt_timeout: self.per_attempt_timeout,
        }
    }

    /// The address our own bus client dials: the broker's bind address
    /// with a wildcard host swapped for loopback.
    pub fn bus_client_addr(&self) -> String {
        self.bus_bind_addr.replace("0.0.0.0", "127.0.0.1")
    }
}

/// Build the collaborator stack from CLI arguments. Unset endpoints fall
/// back to no-ops so the hub runs self-contained.
pub async fn assemble_ingest(
    args: &HubArgs,
    store_path: std::path::PathBuf,
) -> anyhow::Result<EventIngest> {
    let enricher: Box<dyn crate::Enricher> = match &args.enrich_endpoint {
        Some(endpoint) => {
            info!(endpoint = %endpoint, "Enrichment enabled");
            Box::new(HttpEnricher::new(endpoint, args.enrich_key.clone()))
        }
        None => Box::new(NoopEnricher),
    };
    let notifier: Box<dyn crate::Notifier> = match &args.webhook_url {
        Some(url) => {
            info!(url = %url, recipient = %args.alert_to, "Alert webhook enabled");
            Box::new(WebhookNotifier::new(url, args.alert_to.clone()))
        }
        None => Box::new(NoopNotifier),
    };
    info!(path = %store_path.display(), "Event store");
    let store = JsonlEventStore::open(store_path).await?;
    Ok(EventIngest::new(enricher, Box::new(store), notifier))
}

/// A hub that has discovered at least one sensor and subscribed to every
/// event channel.
pub struct Hub {
    registry: SensorRegistry,
    bus: BusClient,
    ingest: EventIngest,
    shutdown: Arc<AtomicBool>,
    last_refresh: Instant,
}

impl Hub {
    /// Run discovery, then connect and subscribe. `Ok(None)` means the
    /// round found nothing; the caller decides what that is worth.
    pub async fn start(
        config: &HubConfig,
        ingest: EventIngest,
        shutdown: Arc<AtomicBool>,
    ) -> Result<Option<Self>, HubError> {
        info!("Discovering");
        let found = discover(&config.search_config()).await?;
        if found.is_empty() {
            return Ok(None);
        }

        let mut registry = SensorRegistry::new();
        registry.absorb(found);

        let addr = config.bus_client_addr();
        info!(bus = %addr, "Subscribing");
        let mut bus = BusClient::connect(&addr).await?;
        for id in registry.ids() {
            bus.subscribe(&id).await?;
            info!(sensor_id = %id, "Subscribed");
        }
        bus.kv_put(SENSORS_KEY, registry.address_map()).await?;

        Ok(Some(Self {
            registry,
            bus,
            ingest,
            shutdown,
            last_refresh: Instant::now(),
        }))
    }

    pub fn registry(&self) -> &SensorRegistry {
        &self.registry
    }

    pub fn ingested(&self) -> u64 {
        self.ingest.ingested()
    }

    /// Drive ingestion until the shutdown flag is raised.
    pub async fn run(mut self) -> Result<(), HubError> {
        info!(sensors = self.registry.len(), "Hub running");
        while !self.shutdown.load(Ordering::SeqCst) {
            self.step().await?;
        }
        info!(ingested = self.ingest.ingested(), "Hub stopped");
        Ok(())
    }

    /// One loop cycle: at most one bus message, plus a periodic mode
    /// refresh.
    pub async fn step(&mut self) -> Result<(), HubError> {
        if let Some(event) = self.bus.poll().await? {
            self.handle(event).await;
        }
        if self.last_refresh.elapsed() >= MODE_REFRESH_INTERVAL {
            self.refresh_modes().await;
            self.last_refresh = Instant::now();
        }
        Ok(())
    }

    /// Dispatch one bus event. Control-plane noise is discarded here;
    /// ingestion failures are logged, never fatal to the loop.
    pub async fn handle(&mut self, event: BusEvent) {
        match event {
            BusEvent::Payload { channel, data } => {
                match self.ingest.ingest(&channel, &data).await {
                    Ok(Some(_)) | Ok(None) => {}
                    Err(e) => error!(channel = %channel, "Event not persisted: {}", e),
                }
            }
            BusEvent::Ack { channel } => {
                debug!(channel = %channel, "Looks like a delayed subscription confirmation, discarding");
            }
        }
    }

    /// Pull each sensor's mirrored mode out of the shared registry.
    pub async fn refresh_modes(&mut self) {
        for id in self.registry.ids() {
            match self.bus.kv_get(&id).await {
                Ok(Some(serde_json::Value::String(token))) => match token.parse::<Mode>() {
                    Ok(mode) => {
                        self.registry.update_mode(&id, mode);
                    }
                    Err(_) => debug!(sensor_id = %id, token = %token, "Unrecognized mode token"),
                },
                Ok(_) => debug!(sensor_id = %id, "No mode mirrored yet"),
                Err(e) => {
                    debug!(sensor_id = %id, "Mode refresh failed, will retry next sweep: {}", e);
                    break;
                }
            }
        }
    }
}
