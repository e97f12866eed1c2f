pub mod acquisition;
pub mod artifact;
pub mod claims;
pub mod config;
pub mod delivery;
pub mod discovery;
pub mod error;
pub mod fsutil;
pub mod media;
pub mod recovery;
pub mod scanner;
pub mod service;
pub mod stability;

pub use acquisition::{
    AcquisitionError, AcquisitionJob, AcquisitionResult, AcquisitionScheduler, Acquirer,
    JobStatus, SchedulerReport, StatusCounts, YtDlpAcquirer,
};
pub use artifact::{Artifact, ArtifactState, LifecycleError};
pub use claims::{ClaimGuard, PathClaims};
pub use config::{load_relay_config, AccountTier, RelayConfig, UploadMethod};
pub use delivery::{
    AttemptOutcome, BotApiTransport, CommandUploadTransport, DeliveryAttempt, DeliveryError,
    DeliveryReport, DeliveryRouter, DeliveryTier, SegmentPlan, Transport, TransportError,
    UploadRequest,
};
pub use discovery::{
    BrowserLocatorSource, DiscoveryError, FileLocatorSource, LocatorSource, StaticLocatorSource,
};
pub use error::{ConfigError, Result};
pub use media::{
    CommandExecutor, MediaInfo, MediaToolkit, ReencodeTarget, SystemCommandExecutor, ToolError,
    TranscodeMode,
};
pub use recovery::{
    QuarantineRecord, RecoveredArtifact, RecoveryEngine, RecoveryError, RecoveryResult,
    RecoveryTier, SweepReport,
};
pub use scanner::{scan, ReadinessScanner};
pub use service::{PassReport, RelayService, ServiceError, ServiceResult};
pub use stability::is_stable;
