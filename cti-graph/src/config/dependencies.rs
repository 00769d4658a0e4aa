//! Dependency initialization and wiring for the graph store.

use std::env;
use std::fs;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::client::IntelClient;
use crate::config::engine::{EngineConfig, DEFAULT_MAX_STALLED_ROUNDS, DEFAULT_SEARCH_SIZE};
use crate::mapping::PropertySchemas;
use crate::molecule::MoleculeRegistry;
use crate::SetupError;
use cti_graph_repository::opensearch::IndexConfig;
use cti_graph_repository::{InMemoryBackend, OpenSearchProvider, SearchBackend};

const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

const DEFAULT_RETRY_INTERVAL_SECS: u64 = 15;

/// What to do when the backend is unreachable at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    FailFast,
    /// Keep trying at a fixed interval.
    Retry,
}

impl ConnectionMode {
    /// Reads `OPENSEARCH_CONNECTION_MODE`; anything unrecognized means retry.
    fn from_env() -> Self {
        match env::var("OPENSEARCH_CONNECTION_MODE")
            .unwrap_or_else(|_| "retry".to_string())
            .to_lowercase()
            .as_str()
        {
            "fail-fast" | "failfast" | "fail_fast" => Self::FailFast,
            "retry" => Self::Retry,
            _ => {
                warn!("Invalid OPENSEARCH_CONNECTION_MODE, defaulting to 'retry'");
                Self::Retry
            }
        }
    }
}

/// Which search backend to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    OpenSearch,
    /// Process-local backend, for demos and tests.
    Memory,
}

impl BackendKind {
    fn from_env() -> Self {
        match env::var("CTI_BACKEND")
            .unwrap_or_else(|_| "opensearch".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" | "in-memory" => Self::Memory,
            "opensearch" => Self::OpenSearch,
            _ => {
                warn!("Invalid CTI_BACKEND, defaulting to 'opensearch'");
                Self::OpenSearch
            }
        }
    }
}

/// Everything the setup binary needs, wired from the environment.
pub struct Dependencies {
    /// The caller-facing client, wired to the configured backend.
    pub client: IntelClient,
    /// Property schemas the mapping sync pass runs over.
    pub schemas: PropertySchemas,
}

impl Dependencies {
    /// Build the client and load molecules and property schemas.
    ///
    /// # Environment Variables
    ///
    /// - `CTI_BACKEND`: "opensearch" or "memory" (default: opensearch)
    /// - `OPENSEARCH_URL`: OpenSearch server URL (default: http://localhost:9200)
    /// - `OPENSEARCH_CONNECTION_MODE`: Connection mode - "fail-fast" or "retry" (default: retry)
    /// - `OPENSEARCH_RETRY_INTERVAL_SECS`: Retry interval in seconds (default: 15)
    /// - `MOLECULES_PATH`: JSON molecule definitions (default: built-in molecules)
    /// - `PROPERTY_SCHEMAS_PATH`: JSON property schemas (default: built-in schemas)
    /// - `EXPANSION_MAX_STALLED_ROUNDS`: Stall cap of non-pivot expansion (default: 3)
    /// - `SEARCH_RESULT_SIZE`: Maximum hits per backend search (default: 10000)
    ///
    /// # Returns
    ///
    /// * `Ok(Dependencies)` - Initialized dependencies
    /// * `Err(SetupError)` - If initialization fails (only in fail-fast mode for connection errors)
    pub async fn new() -> Result<Self, SetupError> {
        let backend_kind = BackendKind::from_env();
        let opensearch_url =
            env::var("OPENSEARCH_URL").unwrap_or_else(|_| DEFAULT_OPENSEARCH_URL.to_string());
        let connection_mode = ConnectionMode::from_env();
        let retry_interval = env_parse("OPENSEARCH_RETRY_INTERVAL_SECS", DEFAULT_RETRY_INTERVAL_SECS);
        let config = EngineConfig::new(
            env_parse("EXPANSION_MAX_STALLED_ROUNDS", DEFAULT_MAX_STALLED_ROUNDS),
            env_parse("SEARCH_RESULT_SIZE", DEFAULT_SEARCH_SIZE),
        );

        info!(
            backend = ?backend_kind,
            opensearch_url = %opensearch_url,
            connection_mode = ?connection_mode,
            retry_interval_secs = retry_interval,
            max_stalled_rounds = config.max_stalled_rounds,
            search_size = config.search_size,
            "Initializing dependencies"
        );

        let registry = match env::var("MOLECULES_PATH") {
            Ok(path) => {
                let raw = read_file(&path)?;
                MoleculeRegistry::from_json_str(&raw)
                    .map_err(|e| SetupError::config(format!("Invalid molecules in {}: {}", path, e)))?
            }
            Err(_) => MoleculeRegistry::builtin(),
        };

        let schemas = match env::var("PROPERTY_SCHEMAS_PATH") {
            Ok(path) => {
                let raw = read_file(&path)?;
                PropertySchemas::from_json_str(&raw).map_err(|e| {
                    SetupError::config(format!("Invalid property schemas in {}: {}", path, e))
                })?
            }
            Err(_) => PropertySchemas::builtin(),
        };

        let index_config = IndexConfig::default();
        let backend: Arc<dyn SearchBackend> = match backend_kind {
            BackendKind::Memory => Arc::new(InMemoryBackend::new()),
            BackendKind::OpenSearch => {
                let provider = Self::connect_to_opensearch(
                    &opensearch_url,
                    index_config.clone(),
                    connection_mode,
                    Duration::from_secs(retry_interval),
                )
                .await?;
                info!("OpenSearch connection established");
                Arc::new(provider)
            }
        };

        let client = IntelClient::new(backend, Arc::new(registry), config)
            .with_index_config(index_config);

        Ok(Self { client, schemas })
    }

    /// Connect to OpenSearch with retry logic based on connection mode.
    async fn connect_to_opensearch(
        url: &str,
        index_config: IndexConfig,
        mode: ConnectionMode,
        retry_interval: Duration,
    ) -> Result<OpenSearchProvider, SetupError> {
        loop {
            match Self::try_connect_opensearch(url, index_config.clone()).await {
                Ok(provider) => return Ok(provider),
                Err(e) => match mode {
                    ConnectionMode::FailFast => {
                        return Err(SetupError::config(format!(
                            "Failed to connect to OpenSearch: {}",
                            e
                        )));
                    }
                    ConnectionMode::Retry => {
                        warn!(
                            opensearch_url = %url,
                            error = %e,
                            retry_interval_secs = retry_interval.as_secs(),
                            "Failed to connect to OpenSearch, retrying..."
                        );
                        sleep(retry_interval).await;
                    }
                },
            }
        }
    }

    /// Attempt to connect to OpenSearch and check that it answers.
    async fn try_connect_opensearch(
        url: &str,
        index_config: IndexConfig,
    ) -> Result<OpenSearchProvider, SetupError> {
        let provider = OpenSearchProvider::new(url, index_config)
            .await
            .map_err(|e| SetupError::config(format!("Failed to create OpenSearch provider: {}", e)))?;
        provider.ping().await?;
        Ok(provider)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn read_file(path: &str) -> Result<String, SetupError> {
    fs::read_to_string(path).map_err(|e| SetupError::config(format!("Failed to read {}: {}", path, e)))
}
