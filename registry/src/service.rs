use crate::error::{RegistryError, Result};
use crate::master::MasterSource;
use crate::protocol::{present, ClientsResponse, InitRequest, InitResponse, SetRequest, UpdatesRequest};
use crate::reconcile::ReconcileReport;
use crate::schedule::{ReconcileSchedule, DEFAULT_DEBOUNCE};
use crate::state::Registry;
use log::{debug, info, warn};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// How a reconciliation request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// A pass was running or finished too recently
    Skipped,
    Applied(ReconcileReport),
    /// The master listing could not be fetched; nothing changed
    Failed,
}

/// The registry together with its master listing source and scheduler
///
/// All mutations go through one lock, so every operation sees the full
/// effect of any operation that completed before it. The lock is never held
/// across the master listing fetch.
pub struct RegistryService {
    registry: Mutex<Registry>,
    source: Arc<dyn MasterSource>,
    schedule: StdMutex<ReconcileSchedule>,
    passes: watch::Sender<u64>,
}

/// Releases the scheduler even if the pass future is dropped mid-fetch
struct PassGuard<'a> {
    schedule: &'a StdMutex<ReconcileSchedule>,
    passes: &'a watch::Sender<u64>,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        lock(self.schedule).finish(Instant::now());
        self.passes.send_modify(|count| *count += 1);
    }
}

fn lock(schedule: &StdMutex<ReconcileSchedule>) -> StdMutexGuard<'_, ReconcileSchedule> {
    schedule.lock().unwrap_or_else(PoisonError::into_inner)
}

impl RegistryService {
    pub fn new(source: Arc<dyn MasterSource>) -> Self {
        Self::with_debounce(source, DEFAULT_DEBOUNCE)
    }

    pub fn with_debounce(source: Arc<dyn MasterSource>, debounce: Duration) -> Self {
        let (passes, _) = watch::channel(0);
        Self {
            registry: Mutex::new(Registry::new()),
            source,
            schedule: StdMutex::new(ReconcileSchedule::new(debounce)),
            passes,
        }
    }

    /// Direct access to the registry state
    pub async fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().await
    }

    /// Counter bumped after every finished pass, successful or not
    pub fn passes(&self) -> watch::Receiver<u64> {
        self.passes.subscribe()
    }

    /// Run a reconciliation pass unless one is running or was run recently
    pub async fn reconcile(&self) -> PassOutcome {
        if !lock(&self.schedule).try_begin(Instant::now()) {
            return PassOutcome::Skipped;
        }
        let _guard = PassGuard {
            schedule: &self.schedule,
            passes: &self.passes,
        };

        let listings = match self.source.fetch().await {
            Ok(listings) => listings,
            Err(e) => {
                warn!("Master listing fetch failed: {:#}", e);
                return PassOutcome::Failed;
            }
        };

        let report = self.registry.lock().await.reconcile(&listings);
        if !report.is_empty() {
            debug!("Reconciled: {:?}", report);
        }
        PassOutcome::Applied(report)
    }

    /// Keep the registry fresh without API traffic
    ///
    /// The first pass starts immediately. Abort the handle to stop.
    pub fn spawn_auto_reconcile(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let service = Arc::clone(self);
        info!("Reconciling every {:?} (debounce applies)", period);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                service.reconcile().await;
            }
        })
    }

    /// List clients, look one up, or register, depending on the fields given
    pub async fn init(&self, request: InitRequest) -> Result<InitResponse> {
        let address = present(request.address).ok_or(RegistryError::MissingAddress)?;
        let name = present(request.name);
        if name.is_none() && request.data.is_some() {
            return Err(RegistryError::DataWithoutName);
        }

        self.reconcile().await;
        let mut registry = self.registry.lock().await;

        match (name, request.data) {
            (None, _) => Ok(InitResponse {
                token: None,
                clients: registry.list_clients(&address)?,
            }),
            (Some(name), None) => Ok(InitResponse {
                token: None,
                clients: vec![registry.lookup_by_name(&address, &name)?],
            }),
            (Some(name), Some(data)) => {
                let registration = registry.register(&address, &name, data)?;
                Ok(InitResponse {
                    token: Some(registration.token),
                    clients: registration.clients,
                })
            }
        }
    }

    /// Drain the caller's peer updates
    pub async fn updates(&self, request: UpdatesRequest) -> Result<ClientsResponse> {
        let token = present(request.token).ok_or(RegistryError::MissingToken)?;
        let clients = self.registry.lock().await.poll(&token)?;
        Ok(ClientsResponse { clients })
    }

    /// Replace the caller's data, or deregister when no data is given
    pub async fn set(&self, request: SetRequest) -> Result<()> {
        let token = present(request.token).ok_or(RegistryError::MissingToken)?;
        self.registry.lock().await.set_data(&token, request.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::ClientRecord;
    use crate::master::{MasterListing, MasterServer};
    use anyhow::anyhow;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::Notify;

    const ADDRESS: &str = "1.13.79.127:8304";

    /// Master source serving whatever listing the test puts in it
    #[derive(Default)]
    struct FakeSource {
        servers: StdMutex<Vec<MasterServer>>,
        failing: AtomicBool,
        fetches: AtomicUsize,
        gate: Option<Arc<Notify>>,
    }

    impl FakeSource {
        fn with(servers: Vec<MasterServer>) -> Arc<Self> {
            Arc::new(Self {
                servers: StdMutex::new(servers),
                ..Default::default()
            })
        }

        fn set(&self, servers: Vec<MasterServer>) {
            *self.servers.lock().unwrap() = servers;
        }
    }

    #[async_trait]
    impl MasterSource for FakeSource {
        async fn fetch(&self) -> anyhow::Result<Vec<MasterListing>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(anyhow!("429 Too Many Requests"));
            }
            Ok(vec![MasterListing {
                servers: self.servers.lock().unwrap().clone(),
            }])
        }
    }

    fn service(source: Arc<FakeSource>) -> RegistryService {
        RegistryService::with_debounce(source, Duration::ZERO)
    }

    fn register(name: &str) -> InitRequest {
        InitRequest {
            address: Some(ADDRESS.into()),
            name: Some(name.into()),
            data: Some(json!({"iden": "TClient"})),
        }
    }

    fn poll(token: &str) -> UpdatesRequest {
        UpdatesRequest { token: Some(token.into()) }
    }

    #[tokio::test]
    async fn test_init_dispatch() {
        let source = FakeSource::with(vec![MasterServer::new([ADDRESS], ["peanut", "peanut2"])]);
        let service = service(source);

        let response = service.init(register("peanut")).await.unwrap();
        assert!(response.token.is_some());
        assert!(response.clients.is_empty());

        let listing = service
            .init(InitRequest { address: Some(ADDRESS.into()), ..Default::default() })
            .await
            .unwrap();
        assert!(listing.token.is_none());
        assert_eq!(listing.clients.len(), 1);

        let lookup = service
            .init(InitRequest {
                address: Some(ADDRESS.into()),
                name: Some("peanut".into()),
                data: None,
            })
            .await
            .unwrap();
        assert_eq!(lookup.clients[0].data, Some(json!({"iden": "TClient"})));
    }

    #[tokio::test]
    async fn test_init_input_errors() {
        let service = service(FakeSource::with(vec![MasterServer::new([ADDRESS], ["peanut"])]));

        let missing = service.init(InitRequest::default()).await;
        assert_eq!(missing, Err(RegistryError::MissingAddress));

        let no_name = service
            .init(InitRequest {
                address: Some(ADDRESS.into()),
                name: None,
                data: Some(json!({})),
            })
            .await;
        assert_eq!(no_name, Err(RegistryError::DataWithoutName));

        let bad_data = service
            .init(InitRequest {
                address: Some(ADDRESS.into()),
                name: Some("peanut".into()),
                data: Some(json!("NOTVALID")),
            })
            .await;
        assert_eq!(bad_data, Err(RegistryError::InvalidData("Data is not an object")));

        let unknown = service
            .init(InitRequest { address: Some("NOTVALID".into()), ..Default::default() })
            .await;
        assert_eq!(unknown, Err(RegistryError::ServerNotFound));
    }

    #[tokio::test]
    async fn test_token_required() {
        let service = service(FakeSource::with(vec![]));

        assert_eq!(service.updates(UpdatesRequest::default()).await, Err(RegistryError::MissingToken));
        assert_eq!(service.set(SetRequest::default()).await, Err(RegistryError::MissingToken));
        assert_eq!(service.updates(poll("NOTVALID")).await, Err(RegistryError::InvalidToken));
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let source = FakeSource::with(vec![MasterServer::new([ADDRESS], ["A", "B"])]);
        let service = service(source.clone());

        let a = service.init(register("A")).await.unwrap();
        let token_a = a.token.unwrap();
        assert!(a.clients.is_empty());

        assert_eq!(service.init(register("A")).await, Err(RegistryError::NameAlreadyTaken));

        let b = service.init(register("B")).await.unwrap();
        let token_b = b.token.unwrap();
        assert_eq!(b.clients.len(), 1);
        assert_eq!(b.clients[0].name, "A");

        service
            .set(SetRequest {
                token: Some(token_a.clone()),
                data: Some(json!({"iden": "x"})),
            })
            .await
            .unwrap();

        let delta = service.updates(poll(&token_b)).await.unwrap();
        assert_eq!(
            delta.clients,
            vec![ClientRecord { name: "A".into(), data: Some(json!({"iden": "x"})) }]
        );
        assert!(service.updates(poll(&token_b)).await.unwrap().clients.is_empty());

        source.set(vec![MasterServer::new([ADDRESS], ["B"])]);
        assert!(matches!(service.reconcile().await, PassOutcome::Applied(_)));

        assert_eq!(service.updates(poll(&token_a)).await, Err(RegistryError::InvalidToken));
        let delta = service.updates(poll(&token_b)).await.unwrap();
        assert_eq!(delta.clients, vec![ClientRecord { name: "A".into(), data: None }]);
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_state() {
        let source = FakeSource::with(vec![MasterServer::new([ADDRESS], ["A"])]);
        let service = service(source.clone());
        let token = service.init(register("A")).await.unwrap().token.unwrap();

        source.failing.store(true, Ordering::SeqCst);
        source.set(vec![]);
        assert_eq!(service.reconcile().await, PassOutcome::Failed);

        assert_eq!(service.registry().await.server_count(), 1);
        assert!(service.updates(poll(&token)).await.is_ok());

        // A failed pass does not wedge the scheduler
        source.failing.store(false, Ordering::SeqCst);
        assert!(matches!(service.reconcile().await, PassOutcome::Applied(_)));
        assert_eq!(service.registry().await.server_count(), 0);
    }

    #[tokio::test]
    async fn test_debounce_limits_fetches() {
        let source = FakeSource::with(vec![MasterServer::new([ADDRESS], ["A"])]);
        let service = RegistryService::with_debounce(source.clone(), Duration::from_secs(3600));

        assert!(matches!(service.reconcile().await, PassOutcome::Applied(_)));
        for _ in 0..10 {
            assert_eq!(service.reconcile().await, PassOutcome::Skipped);
        }
        service.init(InitRequest { address: Some(ADDRESS.into()), ..Default::default() }).await.unwrap();

        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_overlapping_passes() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let service = Arc::new(service(source.clone()));

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.reconcile().await })
        };
        while source.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(service.reconcile().await, PassOutcome::Skipped);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        gate.notify_one();
        assert!(matches!(running.await.unwrap(), PassOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_cancelled_pass_releases_schedule() {
        let gate = Arc::new(Notify::new());
        let source = Arc::new(FakeSource {
            gate: Some(gate.clone()),
            ..Default::default()
        });
        let service = Arc::new(service(source.clone()));

        let running = {
            let service = service.clone();
            tokio::spawn(async move { service.reconcile().await })
        };
        while source.fetches.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        running.abort();
        let _ = running.await;

        gate.notify_one();
        assert!(matches!(service.reconcile().await, PassOutcome::Applied(_)));
    }

    #[tokio::test]
    async fn test_auto_reconcile() {
        let source = FakeSource::with(vec![MasterServer::new([ADDRESS], ["A"])]);
        let service = Arc::new(service(source));
        let mut passes = service.passes();

        let handle = service.spawn_auto_reconcile(Duration::from_millis(10));
        passes.changed().await.unwrap();
        handle.abort();

        assert_eq!(service.registry().await.server_count(), 1);
    }
}
