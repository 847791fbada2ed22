//! Correlation Analyzer -- pairwise Pearson correlation between price
//! series, sector composites and symmetric correlation matrices.

pub mod correlation;
pub mod service;
pub mod stats;

pub use self::correlation::{
    CorrelationAnalyzer, CorrelationMatrix, CorrelationReport, CorrelationResult, SectorReport,
    Strength,
};
pub use self::service::{CorrelationKind, CorrelationOutput, CorrelationRequest};
