//! Turns raw channel payloads into enriched, persisted, alerted events.
//!
//! The order is fixed: validate, enrich, persist, alert. Enrichment and
//! alert failures are absorbed here; only a persistence failure surfaces,
//! because that is the one step that loses the event.

use tracing::{info, warn};

use vigil_protocol::SecurityEvent;

use crate::collaborators::{Enricher, EventStore, Notifier};
use crate::HubError;

pub struct EventIngest {
    enricher: Box<dyn Enricher>,
    store: Box<dyn EventStore>,
    notifier: Box<dyn Notifier>,
    ingested: u64,
}

impl EventIngest {
    pub fn new(
        enricher: Box<dyn Enricher>,
        store: Box<dyn EventStore>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        Self {
            enricher,
            store,
            notifier,
            ingested: 0,
        }
    }

    /// Events successfully persisted since startup.
    pub fn ingested(&self) -> u64 {
        self.ingested
    }

    /// Process one payload received on a sensor channel.
    ///
    /// Anything that does not parse as an event is discarded with a log
    /// and `Ok(None)`; the ingested count moves only for persisted events.
    pub async fn ingest(
        &mut self,
        channel: &str,
        payload: &[u8],
    ) -> Result<Option<SecurityEvent>, HubError> {
        let event = match SecurityEvent::from_wire(payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(channel = %channel, "Discarding non-event payload: {}", e);
                return Ok(None);
            }
        };
        info!(
            event_id = %event.id,
            sensor = %event.sensor,
            "Logging a security event"
        );

        let original_image = event.image_bytes()?;
        let event = match self.enricher.enrich(&original_image).await {
            Ok(enrichment) => {
                let image = enrichment.image.as_deref().unwrap_or(&original_image);
                event.with_enrichment(image, enrichment.notes)
            }
            Err(e) => {
                warn!(event_id = %event.id, "Enrichment failed, persisting unenriched: {}", e);
                event
            }
        };

        self.store.append(&event).await.map_err(HubError::Store)?;
        self.ingested += 1;

        let subject = format!("Vigil alert from {}", event.sensor);
        let body = alert_body(&event);
        let image = event.image_bytes()?;
        if let Err(e) = self.notifier.notify(&subject, &body, &image).await {
            warn!(event_id = %event.id, "Alert delivery failed: {}", e);
        }

        Ok(Some(event))
    }
}

fn alert_body(event: &SecurityEvent) -> String {
    match &event.notes {
        Some(notes) => format!(
            "Hi, this alert fired at {}\n\nNotes: {}",
            event.timestamp.to_rfc3339(),
            notes
        ),
        None => format!("Hi, this alert fired at {}", event.timestamp.to_rfc3339()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Enrichment;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    struct ScriptedEnricher {
        outcome: Result<Enrichment, String>,
    }

    #[async_trait]
    impl Enricher for ScriptedEnricher {
        async fn enrich(&self, _image: &[u8]) -> Result<Enrichment> {
            match &self.outcome {
                Ok(enrichment) => Ok(enrichment.clone()),
                Err(message) => Err(anyhow!(message.clone())),
            }
        }
    }

    #[derive(Clone, Default)]
    struct RecordingStore {
        events: Arc<Mutex<Vec<SecurityEvent>>>,
        fail: bool,
    }

    #[async_trait]
    impl EventStore for RecordingStore {
        async fn append(&self, event: &SecurityEvent) -> Result<()> {
            if self.fail {
                return Err(anyhow!("disk full"));
            }
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        async fn events_for(&self, sensor_id: &str) -> Result<Vec<SecurityEvent>> {
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.sensor == sensor_id)
                .cloned()
                .collect())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, subject: &str, body: &str, image: &[u8]) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((subject.to_string(), body.to_string(), image.to_vec()));
            Ok(())
        }
    }

    fn ingest_with(
        enricher: ScriptedEnricher,
        store: RecordingStore,
        notifier: RecordingNotifier,
    ) -> EventIngest {
        EventIngest::new(Box::new(enricher), Box::new(store), Box::new(notifier))
    }

    fn wire_event(sensor: &str, image: &[u8]) -> Vec<u8> {
        SecurityEvent::new(sensor, image).to_wire().unwrap()
    }

    #[tokio::test]
    async fn test_enriched_event_is_persisted_and_alerted() {
        let store = RecordingStore::default();
        let notifier = RecordingNotifier::default();
        let enricher = ScriptedEnricher {
            outcome: Ok(Enrichment {
                image: Some(b"annotated".to_vec()),
                notes: Some("Subject appears to be a 34 year old visitor.".to_string()),
            }),
        };
        let mut ingest = ingest_with(enricher, store.clone(), notifier.clone());

        let stored = ingest
            .ingest("s1", &wire_event("s1", b"raw-frame"))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stored.image_bytes().unwrap(), b"annotated");
        assert_eq!(
            stored.notes.as_deref(),
            Some("Subject appears to be a 34 year old visitor.")
        );
        assert_eq!(ingest.ingested(), 1);
        assert_eq!(store.events_for("s1").await.unwrap().len(), 1);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "Vigil alert from s1");
        assert!(sent[0].1.contains("Notes: Subject appears"));
        assert_eq!(sent[0].2, b"annotated");
    }

    #[tokio::test]
    async fn test_enrichment_failure_still_persists_without_notes() {
        let store = RecordingStore::default();
        let enricher = ScriptedEnricher {
            outcome: Err("analysis service unreachable".to_string()),
        };
        let mut ingest = ingest_with(enricher, store.clone(), RecordingNotifier::default());

        let stored = ingest
            .ingest("s1", &wire_event("s1", b"raw-frame"))
            .await
            .unwrap()
            .unwrap();

        assert!(stored.notes.is_none());
        assert_eq!(stored.image_bytes().unwrap(), b"raw-frame");
        assert_eq!(store.events_for("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_enrichment_keeps_original_frame() {
        let enricher = ScriptedEnricher {
            outcome: Ok(Enrichment::default()),
        };
        let mut ingest = ingest_with(
            enricher,
            RecordingStore::default(),
            RecordingNotifier::default(),
        );

        let stored = ingest
            .ingest("s1", &wire_event("s1", b"raw-frame"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.image_bytes().unwrap(), b"raw-frame");
        assert!(stored.notes.is_none());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_discarded_not_an_error() {
        let store = RecordingStore::default();
        let enricher = ScriptedEnricher {
            outcome: Ok(Enrichment::default()),
        };
        let mut ingest = ingest_with(enricher, store.clone(), RecordingNotifier::default());

        assert!(ingest.ingest("s1", b"1").await.unwrap().is_none());
        assert!(ingest
            .ingest("s1", b"{'sensor': 's1'}")
            .await
            .unwrap()
            .is_none());
        assert_eq!(ingest.ingested(), 0);
        assert!(store.events_for("s1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_and_skips_alert() {
        let store = RecordingStore {
            fail: true,
            ..Default::default()
        };
        let notifier = RecordingNotifier::default();
        let enricher = ScriptedEnricher {
            outcome: Ok(Enrichment::default()),
        };
        let mut ingest = ingest_with(enricher, store, notifier.clone());

        let result = ingest.ingest("s1", &wire_event("s1", b"frame")).await;
        assert!(matches!(result, Err(HubError::Store(_))));
        assert_eq!(ingest.ingested(), 0);
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
