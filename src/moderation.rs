//! Content moderation: verdicts, the service seam, and reason tables.
//!
//! The moderation backend is a third-party collaborator reached through
//! [`ModerationService`]. Both audits are advisory: when the backend cannot
//! be reached the helpers here log a warning and return [`Verdict::Pass`].
//!
//! **Policy: fail-open.** An outage of the moderation provider must not block
//! publishing. Deployments that need fail-closed behaviour should check the
//! raw `Result` from the service themselves instead of using
//! [`audit_image_or_pass`] / [`audit_text_or_pass`].
//!
//! Raw provider findings are folded into a human-readable reason with static
//! lookup tables keyed by scene and label.

use crate::error::ModerationError;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Outcome of a moderation check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Rejected(String),
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

/// Remote moderation provider.
#[async_trait]
pub trait ModerationService: Send + Sync {
    async fn audit_image(&self, url: &str) -> Result<Verdict, ModerationError>;

    async fn audit_text(&self, text: &str) -> Result<Verdict, ModerationError>;
}

/// Audit an image, treating an unreachable provider as a pass.
pub async fn audit_image_or_pass(service: &dyn ModerationService, url: &str) -> Verdict {
    match service.audit_image(url).await {
        Ok(v) => v,
        Err(e) => {
            warn!("Image audit skipped for {}: {}", url, e);
            Verdict::Pass
        }
    }
}

/// Audit text, treating an unreachable provider as a pass.
pub async fn audit_text_or_pass(service: &dyn ModerationService, text: &str) -> Verdict {
    match service.audit_text(text).await {
        Ok(v) => v,
        Err(e) => {
            warn!("Text audit skipped ({} chars): {}", text.len(), e);
            Verdict::Pass
        }
    }
}

// ── Findings ─────────────────────────────────────────────────────────────

/// Scenes requested for image audits.
pub const IMAGE_SCENES: &[&str] = &["porn", "terrorism", "ad", "live", "logo"];

/// Labels requested for text audits.
pub const TEXT_LABELS: &[&str] = &["spam", "politics", "abuse", "terrorism", "porn", "flood", "contraband"];

const PASS_SUGGESTION: &str = "pass";
const UNKNOWN_IMAGE_DETAIL: &str = "Unknown error.";
const UNKNOWN_TEXT_DETAIL: &str = "Text contains unknown inappropriate content.";

/// One per-scene result of an image audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageFinding {
    pub scene: String,
    pub label: String,
    /// `pass`, `review` or `block`.
    pub suggestion: String,
}

/// Result of a text audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextFinding {
    pub suggestion: String,
    pub labels: Vec<String>,
}

/// The first non-passing finding decides the verdict.
pub fn verdict_from_image_findings(findings: &[ImageFinding]) -> Verdict {
    findings
        .iter()
        .find(|f| f.suggestion != PASS_SUGGESTION)
        .map(|f| Verdict::Rejected(image_violation_message(&f.scene, &f.label, &f.suggestion)))
        .unwrap_or(Verdict::Pass)
}

pub fn verdict_from_text_finding(finding: &TextFinding) -> Verdict {
    if finding.suggestion == PASS_SUGGESTION {
        return Verdict::Pass;
    }
    let labels: Vec<&str> = finding.labels.iter().map(String::as_str).collect();
    Verdict::Rejected(text_violation_message(&finding.suggestion, &labels))
}

/// `Scene: porn, Label: sexy, Suggestion: review, Error Detail: Sexy image detected.`
pub fn image_violation_message(scene: &str, label: &str, suggestion: &str) -> String {
    let detail = IMAGE_DETAILS
        .get(scene)
        .and_then(|labels| labels.get(label))
        .copied()
        .unwrap_or(UNKNOWN_IMAGE_DETAIL);
    format!("Scene: {scene}, Label: {label}, Suggestion: {suggestion}, Error Detail: {detail}")
}

/// `Suggestion: block, Error Detail: Text contains spam.` with one detail
/// sentence per label.
pub fn text_violation_message(suggestion: &str, labels: &[&str]) -> String {
    let mut msg = format!("Suggestion: {suggestion}, Error Detail: ");
    for label in labels {
        msg.push_str(TEXT_DETAILS.get(*label).copied().unwrap_or(UNKNOWN_TEXT_DETAIL));
    }
    msg
}

// ── Reason tables ────────────────────────────────────────────────────────

const NORMAL: &str = "Normal image detected.";

static IMAGE_DETAIL_ROWS: &[(&str, &str, &str)] = &[
    ("porn", "normal", NORMAL),
    ("porn", "sexy", "Sexy image detected."),
    ("porn", "porn", "Pornographic content detected."),
    ("terrorism", "normal", NORMAL),
    ("terrorism", "bloody", "Bloody content detected."),
    ("terrorism", "explosion", "Explosion content detected."),
    ("terrorism", "outfit", "Special attire detected."),
    ("terrorism", "logo", "Special insignia detected."),
    ("terrorism", "weapon", "Weapon content detected."),
    ("terrorism", "politics", "Sensitive content detected."),
    ("terrorism", "violence", "Fighting content detected."),
    ("terrorism", "crowd", "Crowd gathering detected."),
    ("terrorism", "parade", "Parade content detected."),
    ("terrorism", "carcrash", "Car crash scene detected."),
    ("terrorism", "flag", "Flag content detected."),
    ("terrorism", "location", "Landmark content detected."),
    ("terrorism", "drug", "Drug-related content detected."),
    ("terrorism", "gamble", "Gambling content detected."),
    ("terrorism", "others", "Other restricted content detected."),
    ("ad", "normal", NORMAL),
    ("ad", "politics", "Image contains sensitive political content."),
    ("ad", "abuse", "Image contains abusive content."),
    ("ad", "terrorism", "Image contains terrorist content."),
    ("ad", "contraband", "Image contains contraband."),
    ("ad", "spam", "Image contains spam."),
    ("ad", "npx", "Image contains street-flyer advertising."),
    ("ad", "qrcode", "Image contains a QR code."),
    ("ad", "programCode", "Image contains a mini-program code."),
    ("ad", "ad", "Image contains other advertising."),
    ("live", "normal", NORMAL),
    ("live", "meaningless", "Meaningless image detected."),
    ("live", "PIP", "Picture-in-picture content detected."),
    ("live", "smoking", "Smoking content detected."),
    ("live", "drivelive", "In-car live streaming detected."),
    ("live", "drug", "Drug-related content detected."),
    ("live", "gamble", "Gambling content detected."),
    ("logo", "normal", NORMAL),
    ("logo", "TV", "Image contains a TV station logo."),
    ("logo", "trademark", "Image contains a trademark."),
];

// scene → label → detail
static IMAGE_DETAILS: Lazy<HashMap<&'static str, HashMap<&'static str, &'static str>>> =
    Lazy::new(|| {
        let mut scenes: HashMap<&'static str, HashMap<&'static str, &'static str>> = HashMap::new();
        for &(scene, label, msg) in IMAGE_DETAIL_ROWS {
            scenes.entry(scene).or_default().insert(label, msg);
        }
        scenes
    });

static TEXT_DETAILS: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("spam", "Text contains spam."),
        ("politics", "Text contains sensitive political content."),
        ("abuse", "Text contains abusive content."),
        ("terrorism", "Text contains terrorist content."),
        ("porn", "Text contains pornographic content."),
        ("flood", "Text contains flooding."),
        ("contraband", "Text contains contraband."),
        ("ad", "Text contains advertising."),
    ])
});

#[cfg(test)]
mod tests {
    use super::*;

    struct Unreachable;

    #[async_trait]
    impl ModerationService for Unreachable {
        async fn audit_image(&self, _url: &str) -> Result<Verdict, ModerationError> {
            Err(ModerationError::Unavailable("connection refused".into()))
        }

        async fn audit_text(&self, _text: &str) -> Result<Verdict, ModerationError> {
            Err(ModerationError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn unreachable_service_fails_open() {
        assert_eq!(audit_image_or_pass(&Unreachable, "http://host/a.png").await, Verdict::Pass);
        assert_eq!(audit_text_or_pass(&Unreachable, "hello").await, Verdict::Pass);
    }

    #[test]
    fn image_message_uses_table() {
        let msg = image_violation_message("porn", "sexy", "review");
        assert_eq!(
            msg,
            "Scene: porn, Label: sexy, Suggestion: review, Error Detail: Sexy image detected."
        );
    }

    #[test]
    fn unknown_label_falls_back() {
        let msg = image_violation_message("logo", "mystery", "block");
        assert!(msg.ends_with("Unknown error."), "got: {msg}");
    }

    #[test]
    fn first_non_pass_finding_decides() {
        let findings = vec![
            ImageFinding {
                scene: "porn".into(),
                label: "normal".into(),
                suggestion: "pass".into(),
            },
            ImageFinding {
                scene: "terrorism".into(),
                label: "weapon".into(),
                suggestion: "block".into(),
            },
            ImageFinding {
                scene: "logo".into(),
                label: "TV".into(),
                suggestion: "review".into(),
            },
        ];
        match verdict_from_image_findings(&findings) {
            Verdict::Rejected(reason) => assert!(reason.contains("Weapon"), "got: {reason}"),
            Verdict::Pass => panic!("expected rejection"),
        }
    }

    #[test]
    fn all_pass_findings_pass() {
        let findings = vec![ImageFinding {
            scene: "porn".into(),
            label: "normal".into(),
            suggestion: "pass".into(),
        }];
        assert!(verdict_from_image_findings(&findings).is_pass());
        assert!(verdict_from_image_findings(&[]).is_pass());
    }

    #[test]
    fn text_message_lists_every_label() {
        let finding = TextFinding {
            suggestion: "block".into(),
            labels: vec!["spam".into(), "flood".into(), "weird".into()],
        };
        let Verdict::Rejected(reason) = verdict_from_text_finding(&finding) else {
            panic!("expected rejection");
        };
        assert!(reason.starts_with("Suggestion: block, Error Detail: "));
        assert!(reason.contains("spam"));
        assert!(reason.contains("flooding"));
        assert!(reason.contains("unknown inappropriate"));
    }

    #[test]
    fn every_requested_scene_has_a_normal_row() {
        for scene in IMAGE_SCENES {
            let labels = IMAGE_DETAILS.get(*scene).expect("scene table");
            assert!(labels.contains_key("normal"), "missing {scene}");
        }
        for label in TEXT_LABELS {
            assert!(TEXT_DETAILS.contains_key(*label), "missing {label}");
        }
    }

    #[test]
    fn every_scene_with_details_is_requested() {
        for scene in IMAGE_DETAILS.keys() {
            assert!(IMAGE_SCENES.contains(scene), "{scene} has details but is never requested");
        }
    }
}
