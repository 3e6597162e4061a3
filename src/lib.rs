// Library interface for hrrs modules
// This allows integration tests to access the core pipeline

pub mod config;
pub mod database;
pub mod detect;
pub mod error;
pub mod features;
pub mod fit;
pub mod gate;
pub mod import;
pub mod logging;
pub mod merge;
pub mod models;
pub mod pipeline;

// Re-export commonly used types for convenience
pub use config::{AnalysisConfig, FitWindowSpec};
pub use detect::{Detect, PeakDetector, ValleyDetector};
pub use error::{HrrError, Result, SessionError};
pub use fit::{DecayFit, DecaySolver, LmDecaySolver, TauBounds};
pub use gate::QualityGate;
pub use logging::{init_logging, LogConfig, LogFormat, LogLevel};
pub use models::{
    BatchReport, Candidate, Checkpoint, DetectorOrigin, QualityStatus, ReasonCode,
    RecoveryInterval, Sample, SessionReport, WindowFit,
};
pub use pipeline::{analyze_session, analyze_sessions, SessionAnalysis};
