use crate::error::AIError;
use crate::llm::types::{CompletionRequest, Message, MessageRole};
use crate::safety::patterns::BuiltinPatterns;
use crate::safety::types::{
    SafetyAction, SafetyCategory, SafetyCheckResult, SafetyConfig, Severity, TransactionRequest,
};
use regex::Regex;
use tracing::{debug, warn};

/// Input validation, output redaction and transaction guarding.
///
/// Checks are independent and all of them run; callers decide on the most severe
/// result. Only user and tool messages are inspected on input because system and
/// assistant content is authored by the application or the model.
#[derive(Debug, Clone)]
pub struct SafetyManager {
    config: SafetyConfig,
    patterns: BuiltinPatterns,
    blocked: Vec<Regex>,
}

impl SafetyManager {
    pub fn new(config: SafetyConfig) -> Result<Self, AIError> {
        let patterns = BuiltinPatterns::compile()
            .map_err(|e| AIError::Configuration(format!("built-in safety pattern: {}", e)))?;
        let blocked = config
            .blocked_patterns
            .iter()
            .map(|p| {
                regex::RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AIError::Configuration(format!("blocked pattern '{}': {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config,
            patterns,
            blocked,
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    fn inspected(message: &Message) -> bool {
        matches!(message.role, MessageRole::User | MessageRole::Tool)
    }

    fn clean(&self, text: &str) -> String {
        if self.config.sanitize_html {
            self.patterns.strip_html(text)
        } else {
            text.to_string()
        }
    }

    /// Copy of `request` with HTML stripped from user and tool messages.
    pub fn sanitize_request(&self, request: &CompletionRequest) -> CompletionRequest {
        let mut sanitized = request.clone();
        if self.config.enabled && self.config.sanitize_html {
            for message in sanitized.messages.iter_mut().filter(|m| Self::inspected(m)) {
                message.content = self.patterns.strip_html(&message.content);
            }
        }
        sanitized
    }

    /// Run every input check over the request. Empty when safety is disabled.
    pub fn validate_request(&self, request: &CompletionRequest) -> Vec<SafetyCheckResult> {
        if !self.config.enabled {
            return Vec::new();
        }

        let mut results = Vec::new();
        let inspected: Vec<(&str, String)> = request
            .messages
            .iter()
            .filter(|m| Self::inspected(m))
            .map(|m| (m.content.as_str(), self.clean(&m.content)))
            .collect();

        let too_long = inspected
            .iter()
            .map(|(_, cleaned)| cleaned.chars().count())
            .find(|len| *len > self.config.max_input_length);
        results.push(match too_long {
            Some(len) => SafetyCheckResult::new(
                SafetyCategory::InputLength,
                Severity::Medium,
                SafetyAction::Block,
                format!(
                    "message of {} characters exceeds the limit of {}",
                    len, self.config.max_input_length
                ),
            ),
            None => SafetyCheckResult::allow(SafetyCategory::InputLength, "within length limit"),
        });

        if self.config.sanitize_html {
            let stripped = inspected.iter().filter(|(raw, cleaned)| *raw != cleaned.as_str()).count();
            if stripped > 0 {
                results.push(SafetyCheckResult::new(
                    SafetyCategory::HtmlSanitized,
                    Severity::Low,
                    SafetyAction::Warn,
                    format!("markup stripped from {} message(s)", stripped),
                ));
            }
        }

        // Raw text too: fake role tags may be removed by the HTML stripper.
        let matches_any = |regexes: &[Regex]| {
            inspected.iter().find_map(|(raw, cleaned)| {
                regexes
                    .iter()
                    .find_map(|r| r.find(cleaned).or_else(|| r.find(raw)))
                    .map(|m| m.as_str().to_string())
            })
        };

        if self.config.detect_prompt_injection {
            results.push(match matches_any(&self.patterns.injection) {
                Some(hit) => SafetyCheckResult::new(
                    SafetyCategory::PromptInjection,
                    Severity::High,
                    SafetyAction::Block,
                    format!("prompt injection attempt: \"{}\"", hit),
                ),
                None => SafetyCheckResult::allow(SafetyCategory::PromptInjection, "no injection detected"),
            });
        }

        if self.config.detect_jailbreak {
            results.push(match matches_any(&self.patterns.jailbreak) {
                Some(hit) => SafetyCheckResult::new(
                    SafetyCategory::Jailbreak,
                    Severity::High,
                    SafetyAction::Block,
                    format!("jailbreak framing: \"{}\"", hit),
                ),
                None => SafetyCheckResult::allow(SafetyCategory::Jailbreak, "no jailbreak detected"),
            });
        }

        if !self.blocked.is_empty() {
            results.push(match matches_any(&self.blocked) {
                Some(hit) => SafetyCheckResult::new(
                    SafetyCategory::BlockedContent,
                    Severity::High,
                    SafetyAction::Block,
                    format!("matches blocked pattern: \"{}\"", hit),
                ),
                None => SafetyCheckResult::allow(SafetyCategory::BlockedContent, "no blocked content"),
            });
        }

        if let Some(worst) = Self::get_most_severe(&results)
            && !worst.passed
        {
            warn!(category = %worst.category, severity = ?worst.severity, "{}", worst.reason);
        }
        results
    }

    /// Validate and return an error for the first blocking verdict.
    pub fn check_request(&self, request: &CompletionRequest) -> Result<Vec<SafetyCheckResult>, AIError> {
        let results = self.validate_request(request);
        match Self::get_most_severe_failure(&results) {
            Some(failure) => Err(AIError::SafetyViolation {
                category: failure.category.to_string(),
                reason: failure.reason.clone(),
            }),
            None => Ok(results),
        }
    }

    /// Count PII spans in `text`.
    pub fn detect_pii(&self, text: &str) -> Vec<(&'static str, usize)> {
        self.patterns
            .pii
            .iter()
            .map(|p| (p.kind, p.spans(text).count()))
            .filter(|(_, n)| *n > 0)
            .collect()
    }

    /// Replace PII with typed placeholders. Applying it twice changes nothing.
    pub fn redact_output(&self, text: &str) -> String {
        self.patterns
            .pii
            .iter()
            .fold(text.to_string(), |redacted, pattern| pattern.redact(&redacted))
    }

    /// Run output checks. Returns the text to hand to the caller.
    pub fn validate_output(&self, text: &str) -> (String, Vec<SafetyCheckResult>) {
        if !self.config.enabled {
            return (text.to_string(), Vec::new());
        }

        let mut output = text.to_string();
        let mut results = Vec::new();

        if self.config.detect_pii {
            let found = self.detect_pii(&output);
            let total: usize = found.iter().map(|(_, n)| n).sum();
            let kinds = found.iter().map(|(k, _)| k.to_lowercase()).collect::<Vec<_>>().join(", ");
            results.push(if total == 0 {
                SafetyCheckResult::allow(SafetyCategory::Pii, "no personal data detected")
            } else if self.config.redact_pii {
                output = self.redact_output(&output);
                debug!(redactions = total, "redacted personal data from output");
                SafetyCheckResult::new(
                    SafetyCategory::Pii,
                    Severity::Low,
                    SafetyAction::Warn,
                    format!("redacted {} item(s): {}", total, kinds),
                )
            } else {
                SafetyCheckResult::new(
                    SafetyCategory::Pii,
                    Severity::Medium,
                    SafetyAction::Warn,
                    format!("output contains {} unredacted item(s): {}", total, kinds),
                )
            });
        }

        let length = output.chars().count();
        if length > self.config.max_output_length {
            output = output.chars().take(self.config.max_output_length).collect();
            results.push(SafetyCheckResult::new(
                SafetyCategory::OutputLength,
                Severity::Low,
                SafetyAction::Warn,
                format!(
                    "output truncated from {} to {} characters",
                    length, self.config.max_output_length
                ),
            ));
        }

        if self.config.hallucination_check {
            results.push(SafetyCheckResult::allow(
                SafetyCategory::Hallucination,
                "advisory only: factual accuracy is not verified",
            ));
        }

        (output, results)
    }

    /// Vet a monetary action against the configured limits.
    pub fn validate_transaction(&self, tx: &TransactionRequest) -> SafetyCheckResult {
        let limits = &self.config.transactions;
        let value = tx.value_ton;
        let result = |severity, action, reason: String| {
            SafetyCheckResult::new(SafetyCategory::Transaction, severity, action, reason)
        };

        if !value.is_finite() || value <= 0.0 {
            return result(
                Severity::High,
                SafetyAction::Block,
                format!("invalid transaction amount {}", value),
            );
        }
        if !tx.daily_total_ton.is_finite() || tx.daily_total_ton < 0.0 {
            return result(
                Severity::High,
                SafetyAction::Block,
                format!("invalid daily total {}", tx.daily_total_ton),
            );
        }
        if tx.daily_total_ton + value > limits.max_daily_transactions_ton {
            return result(
                Severity::High,
                SafetyAction::Block,
                format!(
                    "daily total would reach {} TON, limit is {} TON",
                    tx.daily_total_ton + value,
                    limits.max_daily_transactions_ton
                ),
            );
        }
        if value > limits.max_transaction_value_ton {
            return result(
                Severity::Critical,
                SafetyAction::Escalate,
                format!(
                    "{} TON exceeds the single transaction maximum of {} TON",
                    value, limits.max_transaction_value_ton
                ),
            );
        }
        if value > limits.require_multisig_above {
            return result(
                Severity::High,
                SafetyAction::Escalate,
                format!(
                    "{} TON requires multi-signature approval (above {} TON)",
                    value, limits.require_multisig_above
                ),
            );
        }
        if value > limits.require_confirmation_above {
            return result(
                Severity::Medium,
                SafetyAction::Warn,
                format!(
                    "{} TON requires confirmation (above {} TON)",
                    value, limits.require_confirmation_above
                ),
            );
        }
        result(
            Severity::Low,
            SafetyAction::Allow,
            format!("{} TON is within limits", value),
        )
    }

    pub fn all_passed(results: &[SafetyCheckResult]) -> bool {
        results.iter().all(|r| r.passed)
    }

    /// Highest severity wins; on equal severity the earlier result is kept.
    pub fn get_most_severe(results: &[SafetyCheckResult]) -> Option<&SafetyCheckResult> {
        results.iter().fold(None, |worst: Option<&SafetyCheckResult>, r| match worst {
            Some(w) if r.severity <= w.severity => Some(w),
            _ => Some(r),
        })
    }

    /// Most severe result among those that did not pass.
    pub fn get_most_severe_failure(results: &[SafetyCheckResult]) -> Option<&SafetyCheckResult> {
        results
            .iter()
            .filter(|r| !r.passed)
            .fold(None, |worst: Option<&SafetyCheckResult>, r| match worst {
                Some(w) if r.severity <= w.severity => Some(w),
                _ => Some(r),
            })
    }
}
