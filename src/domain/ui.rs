//! Human-in-the-loop request and response types.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Button id that approves the pending request
pub const BUTTON_APPROVE: &str = "approve";

/// Button id that cancels the run
pub const BUTTON_CANCEL: &str = "cancel";

/// Identifier of one Human Gate opening (`rq_` + 8 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn generate() -> Self {
        let hex = Uuid::new_v4().simple().to_string();
        Self(format!("rq_{}", &hex[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// What the observer should render for a `ui.request`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UiDescriptor {
    Buttons {
        title: String,
        description: String,
        buttons: Vec<UiButton>,
    },
}

impl UiDescriptor {
    /// The approve/cancel prompt shown before execution
    pub fn approval_prompt() -> Self {
        Self::Buttons {
            title: "Proceed with execution?".to_string(),
            description: "Click Approve to continue or Cancel to stop.".to_string(),
            buttons: vec![
                UiButton {
                    id: BUTTON_APPROVE.to_string(),
                    label: "Approve".to_string(),
                    style: ButtonStyle::Primary,
                    confirm: None,
                },
                UiButton {
                    id: BUTTON_CANCEL.to_string(),
                    label: "Cancel".to_string(),
                    style: ButtonStyle::Danger,
                    confirm: Some(Confirm {
                        title: "Cancel run?".to_string(),
                    }),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiButton {
    pub id: String,
    pub label: String,
    pub style: ButtonStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm: Option<Confirm>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ButtonStyle {
    Primary,
    Secondary,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirm {
    pub title: String,
}

/// Response supplied by the external actor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiResponse {
    pub request_id: RequestId,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub button_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_data: Option<HashMap<String, serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected: Option<Vec<String>>,
}

impl UiResponse {
    /// A response that clicks a button
    pub fn button(request_id: RequestId, button_id: impl Into<String>) -> Self {
        Self {
            request_id,
            button_id: Some(button_id.into()),
            form_data: None,
            selected: None,
        }
    }

    pub fn approve(request_id: RequestId) -> Self {
        Self::button(request_id, BUTTON_APPROVE)
    }

    pub fn cancel(request_id: RequestId) -> Self {
        Self::button(request_id, BUTTON_CANCEL)
    }

    /// Interpret the response for the approval step
    pub fn decision(&self) -> Decision {
        match self.button_id.as_deref() {
            Some(BUTTON_APPROVE) => Decision::Approve,
            Some(BUTTON_CANCEL) => Decision::Cancel,
            // Anything else continues without approval
            _ => Decision::Decline,
        }
    }
}

/// How the approval step proceeds after a response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Continue with `approved = true`
    Approve,

    /// Continue with `approved = false`
    Decline,

    /// Stop the run as canceled
    Cancel,
}
