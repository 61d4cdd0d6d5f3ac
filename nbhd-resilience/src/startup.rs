//! Application-start wiring of the resilience components

use crate::audio::{AudioNotifier, LoadOutcome};
use crate::error_bus::{self, ErrorBus};
use crate::host::{AudioPlatform, DocumentHost, HttpFetcher, ServiceWorkerHost};
use crate::manifest::{ManifestGuard, RepairOutcome, ValidationResult};
use crate::service_worker::{RegisterOutcome, ServiceWorkerLifecycle};
use nbhd_common::config::ResilienceConfig;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Platform handles shared by the components
#[derive(Clone)]
pub struct Hosts {
    pub fetcher: Arc<dyn HttpFetcher>,
    pub worker: Arc<dyn ServiceWorkerHost>,
    pub audio: Arc<dyn AudioPlatform>,
    pub document: Arc<dyn DocumentHost>,
}

/// What each component did at start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartupReport {
    pub service_worker: RegisterOutcome,
    pub sounds: BTreeMap<String, LoadOutcome>,
    pub manifest: ValidationResult,
    pub manifest_repair: Option<RepairOutcome>,
}

/// The four components, sharing one error bus
pub struct ResilienceLayer {
    pub bus: Arc<ErrorBus>,
    pub service_worker: ServiceWorkerLifecycle,
    pub audio: Arc<AudioNotifier>,
    pub manifest: Arc<ManifestGuard>,
}

impl ResilienceLayer {
    pub fn new(config: &ResilienceConfig, hosts: Hosts) -> Self {
        let bus = Arc::new(ErrorBus::new(config.error_bus.clone()));
        Self::with_bus(bus, config, hosts)
    }

    pub fn with_bus(bus: Arc<ErrorBus>, config: &ResilienceConfig, hosts: Hosts) -> Self {
        let service_worker = ServiceWorkerLifecycle::new(
            hosts.worker,
            Arc::clone(&hosts.fetcher),
            Arc::clone(&bus),
            config.service_worker.clone(),
        );
        let audio = Arc::new(AudioNotifier::new(
            hosts.audio,
            Arc::clone(&hosts.fetcher),
            Arc::clone(&bus),
            config.audio.clone(),
        ));
        let manifest = Arc::new(ManifestGuard::new(
            hosts.fetcher,
            hosts.document,
            Arc::clone(&bus),
            config.manifest.clone(),
        ));
        Self { bus, service_worker, audio, manifest }
    }

    /// Make this layer's bus the process-wide one
    pub fn install_global(&self) {
        error_bus::install(Arc::clone(&self.bus));
        error_bus::install_global_handlers();
    }

    /// Run every component's start-up work concurrently
    ///
    /// Registers the worker, initializes audio and loads the configured
    /// sounds, and validates (repairing if needed) the manifest. No
    /// component waits for another.
    pub async fn start(&self) -> StartupReport {
        let register = async {
            let result = self.service_worker.register_default().await;
            RegisterOutcome::from(&result)
        };
        let sounds = async {
            self.audio.initialize();
            self.audio.load_configured().await
        };
        let manifest = self.manifest.validate_or_repair();

        let (service_worker, sounds, (manifest, manifest_repair)) =
            tokio::join!(register, sounds, manifest);

        info!(
            service_worker = service_worker.success,
            sounds = sounds.len(),
            manifest = manifest.is_valid,
            repaired = manifest_repair.is_some(),
            errors = self.bus.len(),
            "Resilience layer started"
        );

        StartupReport {
            service_worker,
            sounds: sounds.into_iter().collect(),
            manifest,
            manifest_repair,
        }
    }
}
