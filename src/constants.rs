//! # Constants
//!
//! Well-known names and defaults shared by the injector, the key service and the CLI.

/// Annotation holding the repository URL of the configuration source
pub const ANNOTATION_REPOSITORY: &str = "heimdall-repository";

/// Annotation holding the path of the configuration document inside the repository
pub const ANNOTATION_PATH: &str = "heimdall-path";

/// Annotation marking a deployment as injected (presence is what matters)
pub const ANNOTATION_INJECTED: &str = "heimdall-injected";

/// Annotation recording `metadata.name` of the injected configuration
pub const ANNOTATION_NAME: &str = "heimdall-name";

/// Annotation recording `configVersion` of the injected configuration
pub const ANNOTATION_CONFIG_VERSION: &str = "heimdall-config-version";

/// Value written to the injected marker
pub const INJECTED_MARKER_VALUE: &str = "true";

/// Prefix of every materialized config map name
pub const RESOURCE_NAME_PREFIX: &str = "heimdall";

/// Name of the per-namespace secret holding the key pair
pub const KEY_PAIR_SECRET_NAME: &str = "heimdall";

/// Secret data key of the PEM encoded public key
pub const PUBLIC_KEY_FIELD: &str = "publicKey";

/// Secret data key of the PEM encoded private key
pub const PRIVATE_KEY_FIELD: &str = "privateKey";

/// Label stamped on every object Heimdall creates
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// Value of [`LABEL_MANAGED_BY`]
pub const MANAGED_BY_VALUE: &str = "heimdall";

/// Default RSA modulus size in bits
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Default address of the key service, as seen from the injector
pub const DEFAULT_KEYS_ADDRESS: &str = "heimdall-keys:8080";

/// Default listen address of the key service
pub const DEFAULT_KEYS_LISTEN_ADDRESS: &str = "0.0.0.0:8080";

/// Default number of deployments reconciled concurrently
pub const DEFAULT_WORKERS: usize = 1;

/// Maximum requeues for a key whose injection pipeline failed
pub const MAX_PIPELINE_REQUEUES: u32 = 3;

/// Default minimum retry delay (milliseconds)
pub const DEFAULT_RETRY_MIN_MS: u64 = 1_000;

/// Default maximum retry delay (milliseconds)
pub const DEFAULT_RETRY_MAX_MS: u64 = 60_000;

/// Default timeout for a repository fetch (seconds)
pub const DEFAULT_GIT_TIMEOUT_SECS: u64 = 120;

/// Default timeout for establishing the key service connection (seconds)
pub const DEFAULT_KEYS_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default metrics / probe port of the injector
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default metrics / probe port of the key service
pub const DEFAULT_KEYS_METRICS_PORT: u16 = 5001;

/// Default server startup timeout in seconds
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default server readiness poll interval in milliseconds
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before the watch stream is retried after an unclassified error
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Upper bound for the watch backoff on 429 responses (milliseconds)
pub const DEFAULT_WATCH_MAX_BACKOFF_MS: u64 = 30_000;

/// Field manager used for writes to the Kubernetes API
pub const FIELD_MANAGER: &str = "heimdall";
