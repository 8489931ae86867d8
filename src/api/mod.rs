//! Request and response shapes exchanged with the UI layer and the upstream
//! agent service.

use serde::{Deserialize, Serialize};

use crate::core::envelope::Envelope;

pub const DEFAULT_USER_ID: &str = "default_user";

/// Body of the outbound `POST` and of an inbound chat turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub message: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default = "default_generate_image")]
    pub generate_image: bool,
}

impl QueryRequest {
    pub fn new(message: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            user_id: user_id.into(),
            generate_image: true,
        }
    }

    pub fn with_generate_image(mut self, generate_image: bool) -> Self {
        self.generate_image = generate_image;
        self
    }
}

/// Always present, failures included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub justifyai_response: Envelope,
}

fn default_user_id() -> String {
    DEFAULT_USER_ID.to_string()
}

fn default_generate_image() -> bool {
    true
}
