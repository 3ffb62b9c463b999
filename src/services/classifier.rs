//! Provider classifiers.
//!
//! A classifier turns what a probe observed after submitting an address to a
//! provider's sign-in page (the rendered page and the URL it ended on) into a
//! verdict. Classifiers are pure: no I/O and no state carried between calls,
//! so they can be exercised directly against captured pages.
//!
//! Each provider is evaluated in the same order:
//! 1. bounce rules, highest priority first; the first match wins;
//! 2. post-identification indicators (a visible password prompt, or a
//!    redirect to the provider's secondary sign-in host);
//! 3. anything else is treated as an existing account.

use scraper::{ElementRef, Html, Node, Selector};
use std::collections::HashMap;
use url::Url;

use crate::models::job::{Provider, VerificationOutcome};
use crate::models::verification::ResultSubmission;

/// What a probe observed after submitting the address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    /// Page source after the provider responded.
    pub page_source: String,
    /// URL the browser ended on.
    pub current_url: String,
}

/// Classification outcome for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Valid { details: String },
    StrongBounce { details: String },
    /// The probe failed before a verdict could be reached.
    Error { message: String },
}

impl Verdict {
    pub fn error(message: impl Into<String>) -> Self {
        Verdict::Error {
            message: message.into(),
        }
    }

    pub fn outcome(&self) -> VerificationOutcome {
        match self {
            Verdict::Valid { .. } => VerificationOutcome::Valid,
            Verdict::StrongBounce { .. } => VerificationOutcome::StrongBounce,
            Verdict::Error { .. } => VerificationOutcome::Error,
        }
    }

    pub fn into_submission(self, job_id: i64) -> ResultSubmission {
        let result = self.outcome();
        let (error_message, details) = match self {
            Verdict::Valid { details } | Verdict::StrongBounce { details } => (None, Some(details)),
            Verdict::Error { message } => (Some(message), None),
        };

        ResultSubmission {
            id: job_id,
            result,
            error_message,
            details,
        }
    }
}

/// Strategy for one provider.
pub trait Classifier: Send + Sync {
    fn provider(&self) -> Provider;

    fn classify(&self, signal: &Signal) -> Verdict;
}

/// A "this account does not exist" indicator.
#[derive(Debug, Clone, Copy)]
pub enum BounceRule {
    /// Lower-case phrase searched in the visible page text.
    Phrase(&'static str),
    /// An element matching `selector` whose text contains `marker` (lower case).
    Element {
        selector: &'static str,
        marker: &'static str,
    },
}

/// A URL that shows the provider moved past the identifier step.
#[derive(Debug, Clone, Copy)]
pub struct RedirectIndicator {
    pub host: &'static str,
    /// Required path fragment; `None` matches any path on the host.
    pub path_contains: Option<&'static str>,
}

/// Declarative rule table for [`RuleClassifier`].
#[derive(Debug, Clone)]
pub struct ProviderRules {
    pub provider: Provider,
    /// Checked in order; the first match wins.
    pub bounce_rules: Vec<BounceRule>,
    pub password_selector: &'static str,
    pub redirects: Vec<RedirectIndicator>,
}

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },
}

enum CompiledRule {
    Phrase(&'static str),
    Element {
        selector: Selector,
        marker: &'static str,
    },
}

/// Classifier driven by a [`ProviderRules`] table.
pub struct RuleClassifier {
    provider: Provider,
    bounce_rules: Vec<CompiledRule>,
    password: Selector,
    redirects: Vec<RedirectIndicator>,
}

impl RuleClassifier {
    pub fn new(rules: ProviderRules) -> Result<Self, ClassifierError> {
        let bounce_rules = rules
            .bounce_rules
            .iter()
            .map(|rule| match *rule {
                BounceRule::Phrase(phrase) => Ok(CompiledRule::Phrase(phrase)),
                BounceRule::Element { selector, marker } => Ok(CompiledRule::Element {
                    selector: compile(selector)?,
                    marker,
                }),
            })
            .collect::<Result<Vec<_>, ClassifierError>>()?;

        Ok(Self {
            provider: rules.provider,
            bounce_rules,
            password: compile(rules.password_selector)?,
            redirects: rules.redirects,
        })
    }

    pub fn office365() -> Self {
        Self::new(office365_rules()).expect("built-in office365 rules are valid")
    }

    pub fn gmail() -> Self {
        Self::new(gmail_rules()).expect("built-in gmail rules are valid")
    }

    fn find_bounce(&self, document: &Html, text: &str) -> Option<String> {
        for rule in &self.bounce_rules {
            match rule {
                CompiledRule::Phrase(phrase) => {
                    if text.contains(phrase) {
                        return Some(format!("Account does not exist: {}", phrase));
                    }
                }
                CompiledRule::Element { selector, marker } => {
                    for element in document.select(selector) {
                        let element_text = collapse_whitespace(&element_text(element));
                        if element_text.to_lowercase().contains(marker) {
                            return Some(format!("Account does not exist: {}", element_text));
                        }
                    }
                }
            }
        }
        None
    }

    fn redirect_host(&self, current_url: &str) -> Option<String> {
        let url = Url::parse(current_url).ok()?;
        let host = url.host_str()?;

        self.redirects
            .iter()
            .find(|r| {
                host.eq_ignore_ascii_case(r.host)
                    && r.path_contains.map_or(true, |p| url.path().contains(p))
            })
            .map(|_| host.to_string())
    }
}

impl Classifier for RuleClassifier {
    fn provider(&self) -> Provider {
        self.provider
    }

    fn classify(&self, signal: &Signal) -> Verdict {
        let document = Html::parse_document(&signal.page_source);
        let text = collapse_whitespace(&visible_text(&document)).to_lowercase();

        if let Some(details) = self.find_bounce(&document, &text) {
            return Verdict::StrongBounce { details };
        }

        if document.select(&self.password).next().is_some() {
            return Verdict::Valid {
                details: "Account exists - password prompt shown".to_string(),
            };
        }

        if let Some(host) = self.redirect_host(&signal.current_url) {
            return Verdict::Valid {
                details: format!("Account exists - redirected to {}", host),
            };
        }

        Verdict::Valid {
            details: "Account exists - no bounce indicator (ambiguous)".to_string(),
        }
    }
}

/// Rules for Microsoft 365 / Outlook sign-in.
pub fn office365_rules() -> ProviderRules {
    ProviderRules {
        provider: Provider::Office365,
        bounce_rules: vec![
            BounceRule::Phrase("this username may be incorrect"),
            BounceRule::Phrase("username may be incorrect"),
            BounceRule::Phrase("that microsoft account doesn't exist"),
            BounceRule::Phrase("that microsoft account does not exist"),
            BounceRule::Phrase("we couldn't find an account"),
            BounceRule::Phrase("we could not find an account"),
            BounceRule::Phrase("couldn't find your account"),
            BounceRule::Phrase("account doesn't exist"),
            BounceRule::Phrase("account does not exist"),
            BounceRule::Phrase("enter a valid email address"),
            BounceRule::Phrase("make sure you typed it correctly"),
            BounceRule::Element {
                selector: "#usernameError, [role=\"alert\"]",
                marker: "incorrect",
            },
        ],
        password_selector: "input[type=\"password\"]:not([aria-hidden=\"true\"])",
        redirects: vec![
            RedirectIndicator {
                host: "login.live.com",
                path_contains: None,
            },
            RedirectIndicator {
                host: "account.live.com",
                path_contains: None,
            },
        ],
    }
}

/// Rules for Google account sign-in.
pub fn gmail_rules() -> ProviderRules {
    ProviderRules {
        provider: Provider::Gmail,
        bounce_rules: vec![
            BounceRule::Phrase("couldn't find your google account"),
            BounceRule::Phrase("couldn\u{2019}t find your google account"),
            BounceRule::Phrase("could not find your google account"),
            BounceRule::Phrase("enter a valid email or phone number"),
            BounceRule::Element {
                selector: "[jsname=\"B34EJ\"], [aria-live=\"assertive\"]",
                marker: "find your google account",
            },
        ],
        password_selector: "input[type=\"password\"]:not([aria-hidden=\"true\"])",
        redirects: vec![
            RedirectIndicator {
                host: "accounts.google.com",
                path_contains: Some("/challenge"),
            },
            RedirectIndicator {
                host: "mail.google.com",
                path_contains: None,
            },
        ],
    }
}

/// Classifiers keyed by provider.
pub struct ClassifierRegistry {
    classifiers: HashMap<Provider, Box<dyn Classifier>>,
}

impl ClassifierRegistry {
    pub fn empty() -> Self {
        Self {
            classifiers: HashMap::new(),
        }
    }

    /// Register a classifier for its provider, returning the one it replaces.
    pub fn register(&mut self, classifier: Box<dyn Classifier>) -> Option<Box<dyn Classifier>> {
        self.classifiers.insert(classifier.provider(), classifier)
    }

    pub fn get(&self, provider: Provider) -> Option<&dyn Classifier> {
        self.classifiers.get(&provider).map(|c| c.as_ref())
    }

    pub fn classify(&self, provider: Provider, signal: &Signal) -> Verdict {
        match self.get(provider) {
            Some(classifier) => classifier.classify(signal),
            None => Verdict::error(format!("No classifier registered for provider {}", provider)),
        }
    }
}

impl Default for ClassifierRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(RuleClassifier::office365()));
        registry.register(Box::new(RuleClassifier::gmail()));
        registry
    }
}

fn compile(selector: &str) -> Result<Selector, ClassifierError> {
    Selector::parse(selector).map_err(|e| ClassifierError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

/// Text of the document outside `<script>`, `<style>`, `<noscript>` and `<template>`.
fn visible_text(document: &Html) -> String {
    let mut out = String::new();
    for node in document.root_element().descendants() {
        if let Node::Text(text) = node.value() {
            let hidden = node
                .ancestors()
                .filter_map(|a| a.value().as_element())
                .any(|e| matches!(e.name(), "script" | "style" | "noscript" | "template"));
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    out
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<Vec<_>>().join(" ")
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
