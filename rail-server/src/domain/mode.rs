//! Transport mode and alert severity classification.

use serde::{Deserialize, Serialize};

/// Kind of rail service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    Train,
    Tgv,
    Ter,
    Intercites,
    Transilien,
}

impl TransportMode {
    /// Classify a line from its network and name.
    ///
    /// Matching is on upper-cased substrings. `INTERCITES` is tested before
    /// `TER`, which it contains.
    pub fn classify(network: Option<&str>, name: &str) -> Self {
        let network = network.unwrap_or_default().to_uppercase();
        let name = name.to_uppercase();
        let either = |needle: &str| network.contains(needle) || name.contains(needle);

        if either("TGV") {
            TransportMode::Tgv
        } else if either("INTERCITES") || either("INTERCITÉS") {
            TransportMode::Intercites
        } else if either("TER") {
            TransportMode::Ter
        } else if network.contains("TRANSILIEN") {
            TransportMode::Transilien
        } else {
            TransportMode::Train
        }
    }

    /// Classify a train from its commercial number prefix.
    pub fn from_train_number(number: &str) -> Self {
        if number.starts_with("TGV") {
            TransportMode::Tgv
        } else if number.starts_with("TER") {
            TransportMode::Ter
        } else {
            TransportMode::Train
        }
    }
}

/// How badly a disruption affects service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Major,
    Critical,
}

impl AlertSeverity {
    /// Map a Navitia severity effect (e.g. `NO_SERVICE`) to a level.
    pub fn from_effect(effect: &str) -> Self {
        let effect = effect.to_lowercase();

        if effect.contains("blocked") || effect.contains("no_service") {
            AlertSeverity::Critical
        } else if effect.contains("reduced_service") || effect.contains("significant_delays") {
            AlertSeverity::Major
        } else if effect.contains("delays") {
            AlertSeverity::Warning
        } else {
            AlertSeverity::Info
        }
    }
}
