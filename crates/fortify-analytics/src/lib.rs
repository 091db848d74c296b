//! Scoring and heuristics for the FortifyMIS portal.
//!
//! Everything in this crate is a pure function over parsed inputs: the
//! compliance engine scores questionnaire responses against a versioned
//! template, the predictive module classifies equipment risk from sensor
//! readings, and [`threshold`] checks a single reading as it arrives.

pub mod compliance;
pub mod predictive;
pub mod threshold;

#[cfg(test)]
mod tests;

/// Malformed template or rules documents.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AnalyticsError {
    #[error("invalid template sections: {0}")]
    InvalidSections(String),
    #[error("invalid scoring rules: {0}")]
    InvalidRules(String),
}
