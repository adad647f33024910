//! Built-in detection patterns. Compiled once per [`SafetyManager`](super::SafetyManager).

use regex::{Regex, RegexBuilder};

const INJECTION: &[&str] = &[
    r"ignore\s+(?:all\s+|any\s+)?(?:of\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier|preceding)\s+(?:instructions|prompts|rules|directions|messages)",
    r"disregard\s+(?:all\s+|any\s+)?(?:the\s+|your\s+)?(?:previous\s+|prior\s+|above\s+)?(?:instructions|rules|guidelines|prompt)",
    r"forget\s+(?:all\s+|everything\s+)?(?:about\s+)?(?:your\s+|the\s+)?(?:previous\s+|prior\s+)?(?:instructions|rules|guidelines)",
    r"(?:reveal|show|print|display|repeat|output|leak)\s+(?:me\s+)?(?:your|the)\s+(?:system|initial|hidden|original|secret)\s+(?:prompt|instructions|message)",
    r"what\s+(?:is|are)\s+your\s+(?:system\s+prompt|hidden\s+instructions|initial\s+instructions)",
    r"(?:you\s+are\s+now|act\s+as|pretend\s+to\s+be)\s+(?:an?\s+|the\s+)?(?:admin|administrator|root|superuser|system)\b",
    r"(?:enable|grant|give)\s+(?:me\s+)?(?:admin|root|sudo|superuser|elevated)\s+(?:access|privileges|rights|mode|permissions)",
    r"<\|?\s*/?\s*(?:system|im_start|im_end)\s*\|?>",
    r"\[\s*/?\s*(?:system|inst)\s*\]",
    r"(?m)^\s*#{0,3}\s*system\s*(?:prompt)?\s*:",
];

const JAILBREAK: &[&str] = &[
    r"do\s+anything\s+now",
    r"\bDAN\s+mode\b",
    r"(?:enable|activate|enter)\s+developer\s+mode",
    r"developer\s+mode\s+(?:enabled|on|activated)",
    r"(?:you\s+are|act\s+as|pretend\s+(?:to\s+be|you\s+are)|roleplay\s+as)\s+.{0,40}?(?:unrestricted|unfiltered|uncensored|jailbroken)",
    r"(?:without|free\s+of|no)\s+(?:any\s+)?(?:ethical\s+|moral\s+)?(?:restrictions|filters|limitations|censorship|guidelines)\s+(?:from\s+now\s+on|at\s+all)",
    r"\bjailbr(?:eak|oken)\b",
];

/// PII detectors in application order. Earlier, more specific patterns run first
/// so a card number is not consumed by the phone pattern.
///
/// Digit patterns end in `(?:\D|$)` rather than `\b` so a number running straight
/// into a letter still matches; the `pii` group marks the part to redact.
const PII: &[(&str, &str)] = &[
    (
        "API_KEY",
        r"\b(?:sk|pk|rk)-[A-Za-z0-9_-]{16,}|\bAKIA[0-9A-Z]{16}\b|\bgh[pousr]_[A-Za-z0-9]{20,}",
    ),
    ("EMAIL", r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"),
    ("CARD", r"(?P<pii>\b\d{4}[ -]?\d{4}[ -]?\d{4}[ -]?\d{1,7})(?:\D|$)"),
    ("SSN", r"(?P<pii>\b\d{3}-\d{2}-\d{4})(?:\D|$)"),
    (
        "PHONE",
        r"(?P<pii>(?:\+\d{1,3}[ .-]?)?(?:\(\d{3}\)|\b\d{3})[ .-]?\d{3}[ .-]?\d{4})(?:\D|$)",
    ),
];

#[derive(Debug, Clone)]
pub struct PiiPattern {
    pub kind: &'static str,
    pub regex: Regex,
}

impl PiiPattern {
    pub fn placeholder(&self) -> String {
        format!("[REDACTED_{}]", self.kind)
    }

    /// Spans to redact: the `pii` group when the pattern has one, else the whole match.
    pub fn spans<'t>(&self, text: &'t str) -> impl Iterator<Item = regex::Match<'t>> {
        self.regex
            .captures_iter(text)
            .filter_map(|caps| caps.name("pii").or_else(|| caps.get(0)))
    }

    pub fn redact(&self, text: &str) -> String {
        let placeholder = self.placeholder();
        let mut redacted = String::with_capacity(text.len());
        let mut last = 0;
        for span in self.spans(text) {
            redacted.push_str(&text[last..span.start()]);
            redacted.push_str(&placeholder);
            last = span.end();
        }
        redacted.push_str(&text[last..]);
        redacted
    }
}

#[derive(Debug, Clone)]
pub struct BuiltinPatterns {
    pub injection: Vec<Regex>,
    pub jailbreak: Vec<Regex>,
    pub pii: Vec<PiiPattern>,
    pub script_blocks: Regex,
    pub tags: Regex,
}

fn insensitive(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

impl BuiltinPatterns {
    pub fn compile() -> Result<Self, regex::Error> {
        let injection = INJECTION
            .iter()
            .map(|p| insensitive(p))
            .collect::<Result<Vec<_>, _>>()?;
        // "DAN" is only meaningful in capitals
        let jailbreak = JAILBREAK
            .iter()
            .map(|p| {
                if p.contains("DAN") {
                    Regex::new(p)
                } else {
                    insensitive(p)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let pii = PII
            .iter()
            .map(|&(kind, p)| {
                Ok(PiiPattern {
                    kind,
                    regex: Regex::new(p)?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            injection,
            jailbreak,
            pii,
            script_blocks: insensitive(r"(?s)<(script|style)\b[^>]*>.*?</(script|style)\s*>")?,
            tags: Regex::new(r"</?[A-Za-z][^<>]*>")?,
        })
    }

    /// Remove script/style blocks with their contents, then strip remaining tags.
    pub fn strip_html(&self, text: &str) -> String {
        let without_blocks = self.script_blocks.replace_all(text, "");
        self.tags.replace_all(&without_blocks, "").into_owned()
    }
}
