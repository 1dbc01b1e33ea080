// src/client/cache.rs
//! Versioned resource cache sitting between every client request and the
//! network.
//!
//! Partitions are named stores tagged with the deploy version; activation
//! garbage-collects every stale tag and claims all open tabs at once. The
//! worker also relays platform background-sync wake-ups to the tabs — it
//! never looks inside the vote queue itself.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use http::Method;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Partition names this application owns all share this prefix.
pub const APP_CACHE_PREFIX: &str = "livepoll-";

/// Core assets pre-cached on install so the join/vote UI loads offline.
pub const STATIC_ASSETS: &[&str] = &[
    "/",
    "/admin",
    "/static/styles.css",
    "/static/app.js",
    "/static/icon.png",
    "/static/manifest.json",
    "/static/vendor/chart.umd.js",
];

/// App shell served to attendee navigations when the network is down.
pub const ATTENDEE_SHELL: &str = "/";
/// App shell served to admin navigations when the network is down.
pub const ADMIN_SHELL: &str = "/admin";

const STATIC_PREFIX: &str = "/static/";
const API_READ_PREFIXES: &[&str] = &["/poll/"];

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub navigation: bool,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
            navigation: false,
        }
    }

    pub fn navigation(path: impl Into<String>) -> Self {
        Self {
            navigation: true,
            ..Self::get(path)
        }
    }

    pub fn post(path: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            ..Self::get(path)
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Request identity inside a partition: method plus URL.
    pub fn cache_key(&self) -> String {
        if self.query.is_empty() {
            format!("{} {}", self.method, self.path)
        } else {
            let query: Vec<String> = self
                .query
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            format!("{} {}?{}", self.method, self.path, query.join("&"))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl CachedResponse {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Error)]
#[error("network unreachable: {0}")]
pub struct FetchError(pub String);

/// The transport seam: the real network, or a cache worker wrapping it.
#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError>;
}

/// Named response stores shared by every tab of the origin.
#[derive(Default)]
pub struct CacheStorage {
    partitions: HashMap<String, HashMap<String, CachedResponse>>,
}

impl CacheStorage {
    pub fn partition_names(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    pub fn has_partition(&self, name: &str) -> bool {
        self.partitions.contains_key(name)
    }

    /// Create the partition if missing and return it.
    pub fn open_partition(&mut self, name: &str) -> &mut HashMap<String, CachedResponse> {
        self.partitions.entry(name.to_string()).or_default()
    }

    fn insert(&mut self, partition: &str, key: String, response: CachedResponse) {
        self.open_partition(partition).insert(key, response);
    }

    fn lookup(&self, partition: &str, key: &str) -> Option<CachedResponse> {
        self.partitions.get(partition)?.get(key).cloned()
    }

    /// Search every partition of this application, newest semantics not
    /// required: any hit serves.
    fn lookup_any(&self, key: &str) -> Option<CachedResponse> {
        self.partitions
            .iter()
            .filter(|(name, _)| name.starts_with(APP_CACHE_PREFIX))
            .find_map(|(_, entries)| entries.get(key).cloned())
    }
}

/// Message relayed from the cache worker to every open tab.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabMessage {
    /// A new worker version took control; no reload needed.
    Claimed,
    /// A background-sync wake-up arrived; drain your queue.
    FlushWanted,
}

/// Platform-level signal delivered to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerSignal {
    FlushQueuedSubmissions,
}

pub struct CacheWorker {
    storage: Arc<Mutex<CacheStorage>>,
    network: Arc<dyn Network>,
    version: String,
    manifest: Vec<String>,
    tabs: broadcast::Sender<TabMessage>,
}

impl CacheWorker {
    pub fn new(
        storage: Arc<Mutex<CacheStorage>>,
        network: Arc<dyn Network>,
        version: impl Into<String>,
    ) -> Self {
        let manifest = STATIC_ASSETS.iter().map(|s| s.to_string()).collect();
        Self::with_manifest(storage, network, version, manifest)
    }

    pub fn with_manifest(
        storage: Arc<Mutex<CacheStorage>>,
        network: Arc<dyn Network>,
        version: impl Into<String>,
        manifest: Vec<String>,
    ) -> Self {
        let (tabs, _) = broadcast::channel(16);
        Self {
            storage,
            network,
            version: version.into(),
            manifest,
            tabs,
        }
    }

    pub fn static_partition(&self) -> String {
        format!("{APP_CACHE_PREFIX}static-{}", self.version)
    }

    pub fn runtime_partition(&self) -> String {
        format!("{APP_CACHE_PREFIX}runtime-{}", self.version)
    }

    /// Register an open tab; it will receive claim and flush messages.
    pub fn subscribe(&self) -> broadcast::Receiver<TabMessage> {
        self.tabs.subscribe()
    }

    /// Entry point for platform-level messages. The worker only relays the
    /// wake-up; each tab drains its own queue.
    pub fn signal(&self, signal: WorkerSignal) {
        match signal {
            WorkerSignal::FlushQueuedSubmissions => {
                let _ = self.tabs.send(TabMessage::FlushWanted);
            }
        }
    }

    /// Pre-cache the full asset manifest into the static partition.
    /// All-or-nothing: a single failed fetch fails the install and nothing
    /// is stored.
    pub async fn install(&self) -> Result<(), FetchError> {
        let mut fetched = Vec::with_capacity(self.manifest.len());
        for path in &self.manifest {
            let request = Request::get(path.clone());
            let response = self.network.fetch(&request).await?;
            if !response.is_success() {
                return Err(FetchError(format!(
                    "precache of {path} returned status {}",
                    response.status
                )));
            }
            fetched.push((request.cache_key(), response));
        }

        let partition = self.static_partition();
        let mut storage = self.storage();
        for (key, response) in fetched {
            storage.insert(&partition, key, response);
        }
        debug!(partition = %self.static_partition(), assets = self.manifest.len(), "installed");
        Ok(())
    }

    /// Drop every partition of this application whose tag is stale, then
    /// claim all open tabs immediately.
    pub fn activate(&self) {
        let keep = [self.static_partition(), self.runtime_partition()];
        {
            let mut storage = self.storage();
            storage.partitions.retain(|name, _| {
                let ours = name.starts_with(APP_CACHE_PREFIX);
                let stale = ours && !keep.iter().any(|k| k == name);
                if stale {
                    debug!(partition = %name, "purging stale cache partition");
                }
                !stale
            });
        }
        let _ = self.tabs.send(TabMessage::Claimed);
    }

    /// Arbitrate one request: pass-through, app shell, static asset, API
    /// read, or generic cached GET.
    pub async fn handle_fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        if request.method != Method::GET {
            return self.network.fetch(request).await;
        }
        if request.navigation {
            return self.navigation_fetch(request).await;
        }
        if request.path.starts_with(STATIC_PREFIX) {
            return self.static_fetch(request).await;
        }
        if API_READ_PREFIXES.iter().any(|p| request.path.starts_with(p)) {
            return self.api_read_fetch(request).await;
        }
        self.generic_fetch(request).await
    }

    /// Navigations go network-first; offline they get the cached app shell
    /// for their surface.
    async fn navigation_fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        match self.network.fetch(request).await {
            Ok(response) => Ok(response),
            Err(err) => {
                let shell = if request.path.starts_with(ADMIN_SHELL) {
                    ADMIN_SHELL
                } else {
                    ATTENDEE_SHELL
                };
                let key = Request::get(shell).cache_key();
                match self.storage().lookup(&self.static_partition(), &key) {
                    Some(cached) => {
                        debug!(path = %request.path, shell, "serving app shell offline");
                        Ok(cached)
                    }
                    None => Err(err),
                }
            }
        }
    }

    /// Static assets are cache-first; misses populate the static partition
    /// best-effort.
    async fn static_fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        let key = request.cache_key();
        if let Some(cached) = self.storage().lookup(&self.static_partition(), &key) {
            return Ok(cached);
        }
        let response = self.network.fetch(request).await?;
        if response.is_success() {
            self.storage()
                .insert(&self.static_partition(), key, response.clone());
        } else {
            warn!(path = %request.path, status = response.status, "not caching failed asset fetch");
        }
        Ok(response)
    }

    /// API reads are network-first with runtime-cache fallback, so poll
    /// lookups keep answering across connectivity gaps.
    async fn api_read_fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        let key = request.cache_key();
        match self.network.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.storage()
                        .insert(&self.runtime_partition(), key, response.clone());
                }
                Ok(response)
            }
            Err(err) => match self.storage().lookup(&self.runtime_partition(), &key) {
                Some(cached) => {
                    debug!(path = %request.path, "serving last cached API read");
                    Ok(cached)
                }
                None => Err(err),
            },
        }
    }

    async fn generic_fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        let key = request.cache_key();
        if let Some(cached) = self.storage().lookup_any(&key) {
            return Ok(cached);
        }
        self.network.fetch(request).await
    }

    fn storage(&self) -> MutexGuard<'_, CacheStorage> {
        self.storage.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Network for CacheWorker {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        self.handle_fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeNetwork {
        online: AtomicBool,
        routes: Mutex<HashMap<String, CachedResponse>>,
        requests: Mutex<Vec<String>>,
    }

    impl FakeNetwork {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                online: AtomicBool::new(true),
                routes: Mutex::new(HashMap::new()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn route(&self, request: &Request, response: CachedResponse) {
            self.routes
                .lock()
                .unwrap()
                .insert(request.cache_key(), response);
        }

        fn set_online(&self, online: bool) {
            self.online.store(online, Ordering::SeqCst);
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
            self.requests.lock().unwrap().push(request.cache_key());
            if !self.online.load(Ordering::SeqCst) {
                return Err(FetchError("offline".into()));
            }
            self.routes
                .lock()
                .unwrap()
                .get(&request.cache_key())
                .cloned()
                .ok_or_else(|| FetchError(format!("no route for {}", request.cache_key())))
        }
    }

    fn worker_with(
        network: Arc<FakeNetwork>,
        version: &str,
        manifest: &[&str],
    ) -> (CacheWorker, Arc<Mutex<CacheStorage>>) {
        let storage = Arc::new(Mutex::new(CacheStorage::default()));
        let worker = CacheWorker::with_manifest(
            storage.clone(),
            network,
            version,
            manifest.iter().map(|s| s.to_string()).collect(),
        );
        (worker, storage)
    }

    #[tokio::test]
    async fn install_is_all_or_nothing() {
        let network = FakeNetwork::new();
        network.route(&Request::get("/"), CachedResponse::ok("shell"));
        // "/static/app.js" deliberately unrouted
        let (worker, storage) = worker_with(network, "v1", &["/", "/static/app.js"]);

        assert!(worker.install().await.is_err());
        assert!(!storage.lock().unwrap().has_partition("livepoll-static-v1"));
    }

    #[tokio::test]
    async fn activation_purges_stale_versions_and_claims_tabs() {
        let network = FakeNetwork::new();
        network.route(&Request::get("/"), CachedResponse::ok("shell"));
        let (worker, storage) = worker_with(network, "v13", &["/"]);

        {
            let mut storage = storage.lock().unwrap();
            storage.open_partition("livepoll-static-v12");
            storage.open_partition("livepoll-runtime-v12");
            storage.open_partition("weather-widget-v3");
        }
        worker.install().await.unwrap();

        let mut tab = worker.subscribe();
        worker.activate();

        let storage = storage.lock().unwrap();
        assert!(!storage.has_partition("livepoll-static-v12"));
        assert!(!storage.has_partition("livepoll-runtime-v12"));
        assert!(storage.has_partition("livepoll-static-v13"));
        // other applications' partitions are not ours to delete
        assert!(storage.has_partition("weather-widget-v3"));
        assert_eq!(tab.try_recv().unwrap(), TabMessage::Claimed);
    }

    #[tokio::test]
    async fn submissions_are_never_intercepted() {
        let network = FakeNetwork::new();
        let post = Request::post("/poll/7/submit", b"{}".to_vec());
        network.route(&post, CachedResponse::ok("accepted"));
        let (worker, storage) = worker_with(network.clone(), "v1", &[]);

        worker.handle_fetch(&post).await.unwrap();
        worker.handle_fetch(&post).await.unwrap();

        // both calls hit the network, nothing was stored
        assert_eq!(network.request_count(), 2);
        assert!(storage.lock().unwrap().partition_names().is_empty());

        network.set_online(false);
        assert!(worker.handle_fetch(&post).await.is_err());
    }

    #[tokio::test]
    async fn navigation_falls_back_to_matching_shell() {
        let network = FakeNetwork::new();
        network.route(&Request::get("/"), CachedResponse::ok("attendee shell"));
        network.route(&Request::get("/admin"), CachedResponse::ok("admin shell"));
        let (worker, _) = worker_with(network.clone(), "v1", &["/", "/admin"]);
        worker.install().await.unwrap();

        network.set_online(false);

        let join = worker
            .handle_fetch(&Request::navigation("/session/abc12"))
            .await
            .unwrap();
        assert_eq!(join.body, b"attendee shell");

        let admin = worker
            .handle_fetch(&Request::navigation("/admin/polls/3"))
            .await
            .unwrap();
        assert_eq!(admin.body, b"admin shell");
    }

    #[tokio::test]
    async fn static_assets_are_cache_first() {
        let network = FakeNetwork::new();
        let asset = Request::get("/static/app.js");
        network.route(&asset, CachedResponse::ok("bundle"));
        let (worker, _) = worker_with(network.clone(), "v1", &[]);

        assert_eq!(worker.handle_fetch(&asset).await.unwrap().body, b"bundle");
        assert_eq!(network.request_count(), 1);

        // cached now: no further network traffic, works offline
        network.set_online(false);
        assert_eq!(worker.handle_fetch(&asset).await.unwrap().body, b"bundle");
        assert_eq!(network.request_count(), 1);
    }

    #[tokio::test]
    async fn api_reads_are_network_first_with_cache_fallback() {
        let network = FakeNetwork::new();
        let read = Request::get("/poll/5");
        network.route(&read, CachedResponse::ok("poll five"));
        let (worker, _) = worker_with(network.clone(), "v1", &[]);

        assert_eq!(worker.handle_fetch(&read).await.unwrap().body, b"poll five");

        network.set_online(false);
        assert_eq!(worker.handle_fetch(&read).await.unwrap().body, b"poll five");

        // a read that was never cached still fails offline
        let other = Request::get("/poll/6");
        assert!(worker.handle_fetch(&other).await.is_err());
    }

    #[tokio::test]
    async fn api_reads_refresh_the_runtime_cache() {
        let network = FakeNetwork::new();
        let read = Request::get("/poll/5");
        network.route(&read, CachedResponse::ok("first"));
        let (worker, _) = worker_with(network.clone(), "v1", &[]);

        worker.handle_fetch(&read).await.unwrap();
        network.route(&read, CachedResponse::ok("second"));
        worker.handle_fetch(&read).await.unwrap();

        network.set_online(false);
        assert_eq!(worker.handle_fetch(&read).await.unwrap().body, b"second");
    }

    #[tokio::test]
    async fn flush_signal_reaches_every_tab() {
        let network = FakeNetwork::new();
        let (worker, _) = worker_with(network, "v1", &[]);

        let mut first = worker.subscribe();
        let mut second = worker.subscribe();
        worker.signal(WorkerSignal::FlushQueuedSubmissions);

        assert_eq!(first.try_recv().unwrap(), TabMessage::FlushWanted);
        assert_eq!(second.try_recv().unwrap(), TabMessage::FlushWanted);
    }
}
