//! Shared application state.
//!
//! One [`AppState`] serves every call. Per-call state never lives here —
//! only read-only configuration, the external-collaborator seams, and the
//! WebSocket connection accounting used by the connection-limit
//! middleware.

use bytes::Bytes;
use chrono_tz::Tz;
use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

use crate::config::ServerConfig;
use crate::core::admission::AdmissionController;
use crate::core::audio::load_wav_as_ulaw;
use crate::core::directory::{DirectoryResolver, StaticDirectoryResolver};
use crate::core::relay::{FunctionRegistry, SpeechSynthesizer};
use crate::jobs::{JobQueue, TokioJobQueue};

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectionLimitError {
    /// The global WebSocket connection cap is reached
    #[error("Global connection limit reached")]
    GlobalLimitReached,
    /// This IP holds too many connections already
    #[error("Per-IP connection limit reached")]
    PerIpLimitReached,
}

/// Shared state for all handlers and middleware.
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Directory / prompt resolution seam
    pub resolver: Arc<dyn DirectoryResolver>,
    /// Background job submission seam
    pub jobs: Arc<dyn JobQueue>,
    /// Admission controller (stateless, shared)
    pub admission: AdmissionController,
    /// Function-call handler table
    pub functions: Arc<FunctionRegistry>,
    /// Hold clip for suspend/resume handling, loaded once (u-law)
    pub hold_clip: Option<Bytes>,

    total_connections: AtomicUsize,
    per_ip: DashMap<IpAddr, usize>,
}

impl AppState {
    /// Build state from configuration, wiring the file-backed directory
    /// and the in-process job queue.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let resolver: Arc<dyn DirectoryResolver> = match &config.directory_path {
            Some(path) => match StaticDirectoryResolver::from_file(path) {
                Ok(resolver) => Arc::new(resolver),
                Err(e) => {
                    tracing::error!("Failed to load directory, all calls will be rejected: {}", e);
                    Arc::new(StaticDirectoryResolver::empty())
                }
            },
            None => {
                tracing::warn!("No directory configured, all calls will be rejected");
                Arc::new(StaticDirectoryResolver::empty())
            }
        };
        let jobs: Arc<dyn JobQueue> = Arc::new(TokioJobQueue::new());
        Self::with_collaborators(config, resolver, jobs, None)
    }

    /// Build state with explicit collaborators; used by tests and by
    /// deployments that bring their own directory or synthesizer.
    pub fn with_collaborators(
        config: ServerConfig,
        resolver: Arc<dyn DirectoryResolver>,
        jobs: Arc<dyn JobQueue>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    ) -> Arc<Self> {
        let reference_zone: Tz = config
            .reference_time_zone
            .parse()
            .unwrap_or_else(|_| {
                tracing::warn!(
                    zone = %config.reference_time_zone,
                    "Invalid reference time zone, falling back to UTC"
                );
                Tz::UTC
            });

        let hold_clip = config.hold_clip_path.as_ref().and_then(|path| {
            match load_wav_as_ulaw(path) {
                Ok(clip) => {
                    tracing::info!(path = %path.display(), bytes = clip.len(), "Loaded hold clip");
                    Some(Bytes::from(clip))
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Failed to load hold clip: {}", e);
                    None
                }
            }
        });

        let admission = AdmissionController::new(resolver.clone(), reference_zone);
        let functions = Arc::new(FunctionRegistry::standard(jobs.clone(), synthesizer));

        Arc::new(Self {
            config,
            resolver,
            jobs,
            admission,
            functions,
            hold_clip,
            total_connections: AtomicUsize::new(0),
            per_ip: DashMap::new(),
        })
    }

    // -------------------------------------------------------------------------
    // Connection accounting
    // -------------------------------------------------------------------------

    /// Try to take a connection slot for this IP.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let total = self.total_connections.load(Ordering::SeqCst);
        if total >= self.config.max_ws_connections {
            return Err(ConnectionLimitError::GlobalLimitReached);
        }

        let mut entry = self.per_ip.entry(ip).or_insert(0);
        if *entry >= self.config.max_connections_per_ip {
            return Err(ConnectionLimitError::PerIpLimitReached);
        }
        *entry += 1;
        self.total_connections.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Release a slot taken by [`Self::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        self.total_connections.fetch_sub(1, Ordering::SeqCst);
        if let Some(mut entry) = self.per_ip.get_mut(&ip) {
            *entry = entry.saturating_sub(1);
        }
    }

    /// Current number of live WebSocket connections.
    pub fn connection_count(&self) -> usize {
        self.total_connections.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Tests
// =============================================================================
