pub mod manager;
pub mod patterns;
pub mod types;

#[cfg(test)]
pub mod tests;

pub use manager::SafetyManager;
pub use types::{
    SafetyAction, SafetyCategory, SafetyCheckResult, SafetyConfig, Severity, TransactionLimits,
    TransactionRequest,
};
