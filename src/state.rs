//! UI state value types.
//!
//! [`UiState`] is immutable from the outside: every transition builds a new
//! value. The only way to produce an active state is with a url, a title and
//! an activation time, so those three are present exactly when the reader
//! view is active.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Snapshot of the reader view's UI state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiState {
    is_reader_view_active: bool,
    current_url: Option<String>,
    current_title: Option<String>,
    last_activated: Option<DateTime<Utc>>,
    ui_mounted: bool,
    #[serde(rename = "shadowDOMAttached")]
    shadow_dom_attached: bool,
}

impl UiState {
    /// All-inactive defaults.
    pub fn inactive() -> Self {
        Self::default()
    }

    pub fn is_reader_view_active(&self) -> bool {
        self.is_reader_view_active
    }

    pub fn current_url(&self) -> Option<&str> {
        self.current_url.as_deref()
    }

    pub fn current_title(&self) -> Option<&str> {
        self.current_title.as_deref()
    }

    pub fn last_activated(&self) -> Option<DateTime<Utc>> {
        self.last_activated
    }

    pub fn ui_mounted(&self) -> bool {
        self.ui_mounted
    }

    pub fn shadow_dom_attached(&self) -> bool {
        self.shadow_dom_attached
    }

    /// Active copy with the given page identity. Local flags are kept.
    pub fn activated(&self, url: String, title: String, at: DateTime<Utc>) -> Self {
        Self {
            is_reader_view_active: true,
            current_url: Some(url),
            current_title: Some(title),
            last_activated: Some(at),
            ..self.clone()
        }
    }

    /// Inactive copy. Page identity is cleared, local flags are kept.
    pub fn deactivated(&self) -> Self {
        Self {
            is_reader_view_active: false,
            current_url: None,
            current_title: None,
            last_activated: None,
            ..self.clone()
        }
    }

    pub fn with_ui_mounted(&self, mounted: bool) -> Self {
        Self {
            ui_mounted: mounted,
            ..self.clone()
        }
    }

    pub fn with_shadow_dom_attached(&self, attached: bool) -> Self {
        Self {
            shadow_dom_attached: attached,
            ..self.clone()
        }
    }

    /// Apply a persisted record on top of this state's local flags.
    pub fn reconciled_with(&self, record: &ActivationRecord) -> Self {
        match record.active_identity() {
            Some((url, title, at)) => self.activated(url.to_string(), title.to_string(), at),
            None => self.deactivated(),
        }
    }

    /// The fields that live in the persistent backend.
    pub fn to_record(&self) -> ActivationRecord {
        ActivationRecord {
            is_active: self.is_reader_view_active,
            url: self.current_url.clone(),
            title: self.current_title.clone(),
            last_activated: self.last_activated,
        }
    }
}

/// The activation record as stored in the persistent backend.
///
/// Read leniently: missing fields take defaults, and a record that claims to
/// be active without a full page identity counts as inactive.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ActivationRecord {
    pub is_active: bool,
    pub url: Option<String>,
    pub title: Option<String>,
    pub last_activated: Option<DateTime<Utc>>,
}

impl ActivationRecord {
    fn active_identity(&self) -> Option<(&str, &str, DateTime<Utc>)> {
        if !self.is_active {
            return None;
        }
        Some((
            self.url.as_deref()?,
            self.title.as_deref()?,
            self.last_activated?,
        ))
    }
}
