use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Config;
use crate::messages::{MessageStore, Sender};
use crate::upload::UploadPipeline;
use crate::zoom::ZoomViewer;
use crate::{UnixTimeMs, WELCOME_MESSAGE};

/// A selectable export market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Destination {
    pub code: &'static str,
    pub label: &'static str,
}

pub const DESTINATIONS: &[Destination] = &[
    Destination { code: "us", label: "United States" },
    Destination { code: "eu", label: "European Union" },
    Destination { code: "cn", label: "China" },
    Destination { code: "jp", label: "Japan" },
    Destination { code: "au", label: "Australia" },
    Destination { code: "br", label: "Brazil" },
    Destination { code: "in", label: "India" },
    Destination { code: "ru", label: "Russia" },
];

/// Display label for a destination code; unknown codes display as themselves.
pub fn destination_label(code: &str) -> &str {
    DESTINATIONS
        .iter()
        .find(|d| d.code.eq_ignore_ascii_case(code))
        .map_or(code, |d| d.label)
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    #[default]
    Idle,
    AwaitingCountryOrSend,
    Uploading,
    Predicting,
}

impl AnalysisState {
    #[must_use]
    pub const fn is_busy(self) -> bool {
        matches!(self, Self::Uploading | Self::Predicting)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::AwaitingCountryOrSend => "awaiting_country_or_send",
            Self::Uploading => "uploading",
            Self::Predicting => "predicting",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Model {
    pub config: Config,
    pub state: AnalysisState,
    pub messages: MessageStore,
    pub upload: UploadPipeline,
    /// Present exactly while the zoom overlay is open.
    pub zoom: Option<ZoomViewer>,
    pub selected_destination: Option<String>,
}

impl Default for Model {
    fn default() -> Self {
        let mut messages = MessageStore::new();
        messages.push(Sender::Bot, WELCOME_MESSAGE, None, UnixTimeMs::now());
        Self {
            config: Config::default(),
            state: AnalysisState::Idle,
            messages,
            upload: UploadPipeline::new(),
            zoom: None,
            selected_destination: None,
        }
    }
}

impl Model {
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    pub fn bot_says(&mut self, content: impl Into<String>) {
        self.say(Sender::Bot, content.into(), None);
    }

    pub fn user_says(&mut self, content: impl Into<String>, image_url: Option<String>) {
        self.say(Sender::User, content.into(), image_url);
    }

    fn say(&mut self, sender: Sender, content: String, image_url: Option<String>) {
        let has_image = image_url.is_some();
        let id = self
            .messages
            .push(sender, content, image_url, UnixTimeMs::now());
        debug!(
            %id,
            sender = sender.as_str(),
            has_image,
            revision = self.messages.revision(),
            "message appended"
        );
    }
}
