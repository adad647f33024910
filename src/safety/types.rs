use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafetyAction {
    Allow,
    Warn,
    Block,
    Escalate,
}

impl SafetyAction {
    /// Allow and warn let the request through.
    pub fn passes(&self) -> bool {
        matches!(self, SafetyAction::Allow | SafetyAction::Warn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyCategory {
    InputLength,
    HtmlSanitized,
    PromptInjection,
    Jailbreak,
    BlockedContent,
    Pii,
    OutputLength,
    Hallucination,
    Transaction,
}

impl SafetyCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SafetyCategory::InputLength => "input_length",
            SafetyCategory::HtmlSanitized => "html_sanitized",
            SafetyCategory::PromptInjection => "prompt_injection",
            SafetyCategory::Jailbreak => "jailbreak",
            SafetyCategory::BlockedContent => "blocked_content",
            SafetyCategory::Pii => "pii",
            SafetyCategory::OutputLength => "output_length",
            SafetyCategory::Hallucination => "hallucination",
            SafetyCategory::Transaction => "transaction",
        }
    }
}

impl fmt::Display for SafetyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyCheckResult {
    pub passed: bool,
    pub category: SafetyCategory,
    pub severity: Severity,
    pub action: SafetyAction,
    pub reason: String,
}

impl SafetyCheckResult {
    pub fn new(
        category: SafetyCategory,
        severity: Severity,
        action: SafetyAction,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            passed: action.passes(),
            category,
            severity,
            action,
            reason: reason.into(),
        }
    }

    pub fn allow(category: SafetyCategory, reason: impl Into<String>) -> Self {
        Self::new(category, Severity::Low, SafetyAction::Allow, reason)
    }
}

/// Limits applied to monetary actions, in TON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionLimits {
    pub max_transaction_value_ton: f64,
    pub max_daily_transactions_ton: f64,
    pub require_confirmation_above: f64,
    pub require_multisig_above: f64,
}

impl Default for TransactionLimits {
    fn default() -> Self {
        Self {
            max_transaction_value_ton: 10_000.0,
            max_daily_transactions_ton: 50_000.0,
            require_confirmation_above: 100.0,
            require_multisig_above: 1_000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub enabled: bool,
    /// Characters per user or tool message.
    pub max_input_length: usize,
    pub max_output_length: usize,
    pub sanitize_html: bool,
    pub detect_prompt_injection: bool,
    pub detect_jailbreak: bool,
    pub detect_pii: bool,
    pub redact_pii: bool,
    /// Operator regexes; a match blocks the request.
    pub blocked_patterns: Vec<String>,
    /// Adds an advisory result to output validation. Never blocks.
    pub hallucination_check: bool,
    pub transactions: TransactionLimits,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_input_length: 32_000,
            max_output_length: 64_000,
            sanitize_html: true,
            detect_prompt_injection: true,
            detect_jailbreak: true,
            detect_pii: true,
            redact_pii: true,
            blocked_patterns: Vec::new(),
            hallucination_check: false,
            transactions: TransactionLimits::default(),
        }
    }
}

/// A monetary action to vet before execution elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRequest {
    pub value_ton: f64,
    /// Value already moved in the current rolling day.
    #[serde(default)]
    pub daily_total_ton: f64,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

impl TransactionRequest {
    pub fn new(value_ton: f64) -> Self {
        Self {
            value_ton,
            daily_total_ton: 0.0,
            destination: None,
            agent_id: None,
        }
    }

    pub fn with_daily_total(mut self, daily_total_ton: f64) -> Self {
        self.daily_total_ton = daily_total_ton;
        self
    }
}
