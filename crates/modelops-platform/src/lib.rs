//! Platform abstraction layer for modelops.
//!
//! Provides traits for the platform-dependent operations the orchestrator
//! performs (HTTP, filesystem, environment) so the pipeline services can be
//! exercised against in-memory or mock implementations.
//!
//! # Architecture
//!
//! The [`Platform`] trait bundles all platform capabilities via accessor methods.
//! Each sub-capability has its own trait ([`http::HttpClient`], [`fs::FileSystem`],
//! [`env::Environment`]) with a corresponding native implementation.
//! Services hold capabilities individually as `Arc<dyn ...>`; the bundle is
//! what the CLI builds once at startup.
//!
//! # Example
//!
//! ```rust,no_run
//! use modelops_platform::{Platform, NativePlatform};
//! use modelops_platform::config_loader::load_config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let platform = NativePlatform::new()?;
//! let config = load_config(platform.fs().as_ref(), platform.env(), None).await?;
//! println!("storage: {}", config.storage_dir().display());
//! # Ok(())
//! # }
//! ```

pub mod config_loader;
pub mod env;
pub mod fs;
pub mod http;

use std::sync::Arc;

/// Bundle of all platform capabilities.
pub trait Platform: Send + Sync {
    /// HTTP client for the job service and webhooks.
    fn http(&self) -> Arc<dyn http::HttpClient>;

    /// Filesystem operations.
    fn fs(&self) -> Arc<dyn fs::FileSystem>;

    /// Environment variable access.
    fn env(&self) -> &dyn env::Environment;
}

/// Native platform implementation using tokio and reqwest.
///
/// - HTTP via [`reqwest`] with connection pooling and TLS.
/// - Filesystem via [`tokio::fs`].
/// - Environment via [`std::env`].
pub struct NativePlatform {
    http: Arc<http::NativeHttpClient>,
    fs: Arc<fs::NativeFileSystem>,
    env: env::NativeEnvironment,
}

impl NativePlatform {
    /// Create a new native platform with default configuration.
    ///
    /// Fails only if the TLS backend cannot be initialized.
    pub fn new() -> Result<Self, http::HttpError> {
        Ok(Self {
            http: Arc::new(http::NativeHttpClient::new()?),
            fs: Arc::new(fs::NativeFileSystem),
            env: env::NativeEnvironment,
        })
    }
}

impl Platform for NativePlatform {
    fn http(&self) -> Arc<dyn http::HttpClient> {
        self.http.clone()
    }

    fn fs(&self) -> Arc<dyn fs::FileSystem> {
        self.fs.clone()
    }

    fn env(&self) -> &dyn env::Environment {
        &self.env
    }
}
