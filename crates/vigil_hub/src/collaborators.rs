//! External collaborators the ingestion loop hands events to.
//!
//! Each seam is an object-safe async trait so the hub can be assembled
//! with real services, no-ops, or test doubles. Collaborator failures are
//! the caller's to absorb; nothing here retries.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use vigil_protocol::SecurityEvent;

// ============================================================================
// Enrichment
// ============================================================================

/// What enrichment produced for one image. `image: None` means the
/// original frame stands.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Enrichment {
    pub image: Option<Vec<u8>>,
    pub notes: Option<String>,
}

#[async_trait]
pub trait Enricher: Send + Sync {
    /// Analyze one captured frame. Implementations return `Err` for
    /// transport or service failures; "nothing detected" is a successful
    /// empty [`Enrichment`].
    async fn enrich(&self, image: &[u8]) -> Result<Enrichment>;
}

/// Used when no enrichment endpoint is configured.
pub struct NoopEnricher;

#[async_trait]
impl Enricher for NoopEnricher {
    async fn enrich(&self, _image: &[u8]) -> Result<Enrichment> {
        Ok(Enrichment::default())
    }
}

/// Wire shape the enrichment service answers with. Absent fields mean
/// "unchanged" and "no notes" respectively.
#[derive(Debug, Deserialize)]
struct EnrichResponse {
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// Posts the raw frame to an HTTP analysis service and reads back an
/// optionally annotated frame plus descriptive notes.
pub struct HttpEnricher {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpEnricher {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Enricher for HttpEnricher {
    async fn enrich(&self, image: &[u8]) -> Result<Enrichment> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(image.to_vec());
        if let Some(key) = &self.api_key {
            request = request.header("Ocp-Apim-Subscription-Key", key);
        }

        let response = request
            .send()
            .await
            .context("enrichment request failed")?
            .error_for_status()
            .context("enrichment service rejected the image")?;
        let body: EnrichResponse = response
            .json()
            .await
            .context("enrichment response was not valid JSON")?;

        let image = match body.image {
            Some(encoded) => Some(
                BASE64
                    .decode(encoded)
                    .context("enrichment returned undecodable image data")?,
            ),
            None => None,
        };
        Ok(Enrichment {
            image,
            notes: body.notes,
        })
    }
}

// ============================================================================
// Event store
// ============================================================================

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append-only insert.
    async fn append(&self, event: &SecurityEvent) -> Result<()>;

    /// All stored events for one sensor, oldest first.
    async fn events_for(&self, sensor_id: &str) -> Result<Vec<SecurityEvent>>;
}

/// One JSON document per line, appended as events arrive.
pub struct JsonlEventStore {
    path: PathBuf,
}

impl JsonlEventStore {
    /// Prepare the store file's directory; the file itself is created on
    /// first append.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating event store directory {}", parent.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventStore for JsonlEventStore {
    async fn append(&self, event: &SecurityEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event).context("encoding event for the store")?;
        line.push(b'\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event store {}", self.path.display()))?;
        file.write_all(&line).await.context("appending event")?;
        file.flush().await.context("flushing event store")?;
        Ok(())
    }

    async fn events_for(&self, sensor_id: &str) -> Result<Vec<SecurityEvent>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(anyhow!(e))
                    .with_context(|| format!("reading event store {}", self.path.display()))
            }
        };
        let mut events = Vec::new();
        for (idx, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let event: SecurityEvent = serde_json::from_str(line)
                .with_context(|| format!("corrupt event store line {}", idx + 1))?;
            if event.sensor == sensor_id {
                events.push(event);
            }
        }
        Ok(events)
    }
}

// ============================================================================
// Alert delivery
// ============================================================================

#[async_trait]
pub trait Notifier: Send + Sync {
    /// One delivery attempt; no retries, no queueing.
    async fn notify(&self, subject: &str, body: &str, image: &[u8]) -> Result<()>;
}

/// Used when no webhook is configured.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, subject: &str, _body: &str, _image: &[u8]) -> Result<()> {
        debug!(subject = %subject, "Alert delivery disabled, dropping notification");
        Ok(())
    }
}

/// Posts alerts to a mail-gateway style webhook as a multipart form with
/// `to`, `subject`, `text` fields and the frame attached as `image.jpg`.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    recipient: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            recipient: recipient.into(),
        }
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, subject: &str, body: &str, image: &[u8]) -> Result<()> {
        let attachment = reqwest::multipart::Part::bytes(image.to_vec())
            .file_name("image.jpg")
            .mime_str("image/jpeg")
            .context("building alert attachment")?;
        let form = reqwest::multipart::Form::new()
            .text("to", self.recipient.clone())
            .text("subject", subject.to_string())
            .text("text", body.to_string())
            .part("attachment", attachment);

        self.client
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .context("alert webhook request failed")?
            .error_for_status()
            .context("alert webhook rejected the notification")?;
        Ok(())
    }
}
