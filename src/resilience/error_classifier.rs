//! # Step Failure Classification
//!
//! Maps a [`StepError`] to an [`ErrorType`] and [`Severity`].
//!
//! ## Overview
//!
//! Classification is an ordered chain of small classifiers. Each one either
//! recognizes the failure (returning a classification with a confidence) or
//! passes. The first classification at or above the chain's confidence
//! threshold wins; if nothing is confident the failure is `Unknown`/`Medium`.
//!
//! ```text
//! ┌───────────┐   ┌──────────┐   ┌─────────────┐   ┌──────────┐   ┌───────┐   ┌────────────┐
//! │ declared  │──▶│ network/ │──▶│ persistence │──▶│ delivery │──▶│ agent │──▶│ validation │
//! │ category  │   │ timeout  │   │             │   │          │   │       │   │            │
//! └───────────┘   └──────────┘   └─────────────┘   └──────────┘   └───────┘   └────────────┘
//! ```
//!
//! Typed variants are matched exactly (confidence 1.0). The catch-all
//! `StepError::Failed` is matched by keywords in its message and code, which
//! yields a lower confidence.

use crate::error::StepError;
use crate::resilience::{ErrorContext, ErrorType, Severity};
use serde::{Deserialize, Serialize};

/// Confidence at or above which a classifier's answer is accepted
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorClassification {
    pub error_type: ErrorType,
    pub severity: Severity,
    /// Classification confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Name of the classifier that produced this answer
    pub classifier: String,
}

impl ErrorClassification {
    fn new(
        classifier: &'static str,
        error_type: ErrorType,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        Self {
            error_type,
            severity,
            confidence,
            classifier: classifier.to_string(),
        }
    }

    fn unknown() -> Self {
        Self::new("default", ErrorType::Unknown, Severity::Medium, 0.0)
    }
}

/// One link of the classification chain
pub trait ErrorClassifier: Send + Sync {
    fn classifier_name(&self) -> &'static str;

    /// `None` when this classifier does not recognize the failure
    fn classify(&self, error: &StepError, context: &ErrorContext) -> Option<ErrorClassification>;
}

/// Lowercased message plus code of a catch-all failure
fn failed_text(error: &StepError) -> Option<String> {
    match error {
        StepError::Failed { message, code } => {
            let mut text = message.to_lowercase();
            if let Some(code) = code {
                text.push(' ');
                text.push_str(&code.to_lowercase());
            }
            Some(text)
        }
        _ => None,
    }
}

fn contains_any(text: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| text.contains(keyword))
}

/// Variants that name their category outright
#[derive(Debug, Default)]
pub struct DeclaredCategoryClassifier;

impl ErrorClassifier for DeclaredCategoryClassifier {
    fn classifier_name(&self) -> &'static str {
        "declared_category"
    }

    fn classify(&self, error: &StepError, _context: &ErrorContext) -> Option<ErrorClassification> {
        let (error_type, severity) = match error {
            StepError::Transient { .. } => (ErrorType::Transient, Severity::Low),
            StepError::Persistent { .. } => (ErrorType::Persistent, Severity::High),
            StepError::Authentication { .. } => (ErrorType::Authentication, Severity::High),
            StepError::Configuration { .. } => (ErrorType::Configuration, Severity::High),
            StepError::ResourceExhausted { .. } => (ErrorType::ResourceExhaustion, Severity::Medium),
            StepError::DataCorruption { .. } => (ErrorType::DataCorruption, Severity::Critical),
            // A tripped breaker means the dependency is saturated or down
            StepError::CircuitOpen { .. } => (ErrorType::ResourceExhaustion, Severity::High),
            StepError::Deadlock { .. } => (ErrorType::Configuration, Severity::Critical),
            _ => return None,
        };
        Some(ErrorClassification::new(
            self.classifier_name(),
            error_type,
            severity,
            1.0,
        ))
    }
}

#[derive(Debug, Default)]
pub struct NetworkTimeoutClassifier;

impl ErrorClassifier for NetworkTimeoutClassifier {
    fn classifier_name(&self) -> &'static str {
        "network_timeout"
    }

    fn classify(&self, error: &StepError, _context: &ErrorContext) -> Option<ErrorClassification> {
        let name = self.classifier_name();
        match error {
            StepError::Timeout { .. } => Some(ErrorClassification::new(
                name,
                ErrorType::Timeout,
                Severity::Medium,
                1.0,
            )),
            StepError::Network { .. } => Some(ErrorClassification::new(
                name,
                ErrorType::Network,
                Severity::Medium,
                1.0,
            )),
            _ => {
                let text = failed_text(error)?;
                if contains_any(&text, &["timed out", "timeout", "deadline exceeded"]) {
                    Some(ErrorClassification::new(
                        name,
                        ErrorType::Timeout,
                        Severity::Medium,
                        0.8,
                    ))
                } else if contains_any(
                    &text,
                    &["connection", "network", "unreachable", "dns", "reset by peer"],
                ) {
                    Some(ErrorClassification::new(
                        name,
                        ErrorType::Network,
                        Severity::Medium,
                        0.8,
                    ))
                } else {
                    None
                }
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PersistenceClassifier;

impl ErrorClassifier for PersistenceClassifier {
    fn classifier_name(&self) -> &'static str {
        "persistence"
    }

    fn classify(&self, error: &StepError, _context: &ErrorContext) -> Option<ErrorClassification> {
        let confidence = match error {
            StepError::Persistence { .. } => 1.0,
            _ => {
                let text = failed_text(error)?;
                if contains_any(&text, &["database", "storage", "disk", "persist", "write failed"]) {
                    0.7
                } else {
                    return None;
                }
            }
        };
        Some(ErrorClassification::new(
            self.classifier_name(),
            ErrorType::PersistenceError,
            Severity::High,
            confidence,
        ))
    }
}

#[derive(Debug, Default)]
pub struct ExternalDeliveryClassifier;

impl ErrorClassifier for ExternalDeliveryClassifier {
    fn classifier_name(&self) -> &'static str {
        "external_delivery"
    }

    fn classify(&self, error: &StepError, _context: &ErrorContext) -> Option<ErrorClassification> {
        let confidence = match error {
            StepError::Delivery { .. } => 1.0,
            _ => {
                let text = failed_text(error)?;
                if contains_any(&text, &["smtp", "delivery", "webhook", "bounced", "mailbox"]) {
                    0.7
                } else {
                    return None;
                }
            }
        };
        Some(ErrorClassification::new(
            self.classifier_name(),
            ErrorType::ExternalDeliveryError,
            Severity::Medium,
            confidence,
        ))
    }
}

#[derive(Debug, Default)]
pub struct AgentFailureClassifier;

impl ErrorClassifier for AgentFailureClassifier {
    fn classifier_name(&self) -> &'static str {
        "agent_failure"
    }

    fn classify(&self, error: &StepError, context: &ErrorContext) -> Option<ErrorClassification> {
        let confidence = match error {
            StepError::AgentFailure { .. } => 1.0,
            _ => {
                let text = failed_text(error)?;
                let agent_named = context
                    .agent_name
                    .as_deref()
                    .map(|agent| text.contains(&agent.to_lowercase()))
                    .unwrap_or(false);
                if agent_named || contains_any(&text, &["agent", "model", "completion"]) {
                    0.6
                } else {
                    return None;
                }
            }
        };
        Some(ErrorClassification::new(
            self.classifier_name(),
            ErrorType::AgentFailure,
            Severity::Medium,
            confidence,
        ))
    }
}

#[derive(Debug, Default)]
pub struct ValidationClassifier;

impl ErrorClassifier for ValidationClassifier {
    fn classifier_name(&self) -> &'static str {
        "validation"
    }

    fn classify(&self, error: &StepError, _context: &ErrorContext) -> Option<ErrorClassification> {
        let confidence = match error {
            StepError::Validation { .. } => 1.0,
            _ => {
                let text = failed_text(error)?;
                if contains_any(&text, &["invalid", "validation", "malformed", "schema"]) {
                    0.7
                } else {
                    return None;
                }
            }
        };
        Some(ErrorClassification::new(
            self.classifier_name(),
            ErrorType::ValidationError,
            Severity::Low,
            confidence,
        ))
    }
}

/// Ordered chain; first confident answer wins
pub struct ClassifierChain {
    classifiers: Vec<Box<dyn ErrorClassifier>>,
    min_confidence: f64,
}

impl std::fmt::Debug for ClassifierChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .classifiers
            .iter()
            .map(|classifier| classifier.classifier_name())
            .collect();
        f.debug_struct("ClassifierChain")
            .field("classifiers", &names)
            .field("min_confidence", &self.min_confidence)
            .finish()
    }
}

impl ClassifierChain {
    pub fn empty(min_confidence: f64) -> Self {
        Self {
            classifiers: Vec::new(),
            min_confidence,
        }
    }

    /// Declared categories, then network/timeout, persistence, external
    /// delivery, agent failure and validation
    pub fn standard() -> Self {
        Self::standard_with_confidence(DEFAULT_MIN_CONFIDENCE)
    }

    pub fn standard_with_confidence(min_confidence: f64) -> Self {
        Self::empty(min_confidence)
            .with_classifier(DeclaredCategoryClassifier)
            .with_classifier(NetworkTimeoutClassifier)
            .with_classifier(PersistenceClassifier)
            .with_classifier(ExternalDeliveryClassifier)
            .with_classifier(AgentFailureClassifier)
            .with_classifier(ValidationClassifier)
    }

    /// Append a classifier at the end of the chain
    pub fn with_classifier(mut self, classifier: impl ErrorClassifier + 'static) -> Self {
        self.classifiers.push(Box::new(classifier));
        self
    }

    pub fn classify(&self, error: &StepError, context: &ErrorContext) -> ErrorClassification {
        self.classifiers
            .iter()
            .filter_map(|classifier| classifier.classify(error, context))
            .find(|classification| classification.confidence >= self.min_confidence)
            .unwrap_or_else(ErrorClassification::unknown)
    }
}

impl Default for ClassifierChain {
    fn default() -> Self {
        Self::standard()
    }
}
