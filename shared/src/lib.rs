// lib.rs - Export compliance chat core

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod capabilities;
pub mod config;
pub mod event;
pub mod messages;
pub mod model;
pub mod upload;
pub mod zoom;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::TransportError;
use crate::config::BusySelectionPolicy;
use crate::messages::Sender;
use crate::model::{destination_label, AnalysisState, DESTINATIONS};
use crate::upload::{UploadError, UploadStatus};
use crate::zoom::ZoomTransform;

pub use app::App;
pub use capabilities::{Capabilities, Effect};
pub use config::Config;
pub use event::Event;
pub use model::Model;

pub const WELCOME_MESSAGE: &str = "Hello! I'm your Export Compliance Assistant. Upload a product image and select a destination country, and I'll analyze if your product is suitable for export to that market.";
pub const UPLOADED_IMAGE_MESSAGE: &str = "I've uploaded a product image for analysis.";
pub const UPLOAD_ACK_SELECT_DESTINATION: &str =
    "I've received your product image. Please select a destination country to continue.";
pub const UPLOAD_ACK_SEND: &str = "I've received your product image. Add an optional destination note and press send to analyze it.";
pub const GATED_HELP_MESSAGE: &str = "I'm here to help with product export compliance. Please upload a product image and select a destination country to get started.";
pub const PICK_DESTINATION_MESSAGE: &str =
    "Please select a destination country from the list to analyze your product.";

const SECONDS_PER_DAY: i64 = 86_400;
const BYTES_PER_MB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnixTimeMs(pub u64);

impl UnixTimeMs {
    #[must_use]
    pub fn now() -> Self {
        Self(get_current_time_ms())
    }

    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }
}

#[must_use]
pub fn get_current_time_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Wall-clock time of day as `h:mm:ss AM/PM`, shifted by `utc_offset_minutes`.
#[must_use]
pub fn format_clock_time(timestamp: UnixTimeMs, utc_offset_minutes: i32) -> String {
    let secs = i64::try_from(timestamp.as_secs())
        .unwrap_or(i64::MAX)
        .saturating_add(i64::from(utc_offset_minutes) * 60)
        .rem_euclid(SECONDS_PER_DAY);

    let hour = secs / 3600;
    let minute = (secs % 3600) / 60;
    let second = secs % 60;
    let suffix = if hour < 12 { "AM" } else { "PM" };
    let hour12 = match hour % 12 {
        0 => 12,
        h => h,
    };
    format!("{hour12}:{minute:02}:{second:02} {suffix}")
}

/// Every failure the user can see. Each one becomes exactly one bot message;
/// the detail stays in the logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("invalid file type: {reason}")]
    InvalidFileType { reason: String },

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("upload failed: {0}")]
    UploadFailed(TransportError),

    #[error("prediction failed: {0}")]
    PredictionFailed(TransportError),

    #[error("no uploaded image to analyze yet")]
    NotReadyForPrediction,

    #[error("send with neither text nor image")]
    EmptySend,

    #[error("text sent without an image")]
    ImageRequired,
}

impl AnalysisError {
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidFileType { .. } => "INVALID_FILE_TYPE",
            Self::FileTooLarge { .. } => "FILE_TOO_LARGE",
            Self::UploadFailed(_) => "UPLOAD_FAILED",
            Self::PredictionFailed(_) => "PREDICTION_FAILED",
            Self::NotReadyForPrediction => "NOT_READY_FOR_PREDICTION",
            Self::EmptySend => "EMPTY_SEND",
            Self::ImageRequired => "IMAGE_REQUIRED",
        }
    }

    #[must_use]
    pub fn user_facing_message(&self) -> String {
        match self {
            Self::InvalidFileType { .. } => {
                "Please upload an image file (JPEG, PNG, WebP or GIF).".into()
            }
            Self::FileTooLarge { max, .. } => format!(
                "The image is too large. Please use an image smaller than {} MB.",
                (max / BYTES_PER_MB).max(1)
            ),
            Self::UploadFailed(_) => {
                "There was an error uploading your image. Please try again.".into()
            }
            Self::PredictionFailed(_) => {
                "There was an error analyzing your product. Please try again.".into()
            }
            Self::NotReadyForPrediction => {
                "Please wait for the image to finish uploading or try uploading again.".into()
            }
            Self::EmptySend => "Please upload a product image to get started.".into(),
            Self::ImageRequired => {
                "Please upload a product image first. I need an image to check export compliance."
                    .into()
            }
        }
    }
}

impl From<UploadError> for AnalysisError {
    fn from(e: UploadError) -> Self {
        match e {
            UploadError::InvalidFileType {
                declared_mime,
                reason,
            } => Self::InvalidFileType {
                reason: format!("{reason} (declared {declared_mime:?})"),
            },
            UploadError::FileTooLarge { size, max } => Self::FileTooLarge { size, max },
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MessageView {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub time_text: String,
    pub image_url: Option<String>,
    /// First bot message of a consecutive run.
    pub show_avatar: bool,
    pub can_copy: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationOption {
    pub code: String,
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DestinationPickerView {
    pub options: Vec<DestinationOption>,
    pub selected: Option<String>,
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PreviewView {
    pub data_uri: String,
    pub caption: String,
    pub status: UploadStatus,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ZoomView {
    pub image_url: String,
    pub transform: ZoomTransform,
    pub dragging: bool,
    /// CSS transitions are off while dragging so the image tracks the pointer.
    pub transition_enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ViewModel {
    pub messages: Vec<MessageView>,
    pub phase: AnalysisState,
    pub is_busy: bool,
    pub input_enabled: bool,
    pub upload_enabled: bool,
    /// Only present when a destination must be picked before analysis.
    pub destination_picker: Option<DestinationPickerView>,
    pub preview: Option<PreviewView>,
    pub zoom: Option<ZoomView>,
    pub page_scroll_locked: bool,
    /// Id of the newest message; the surface scrolls to it when it changes.
    pub scroll_anchor: Option<String>,
    pub request_timeout_ms: Option<u64>,
}

pub mod app {
    use super::*;
    use crate::capabilities::{send_predict, send_upload, Capabilities, PredictRequest};
    use crate::config::UploadFailurePolicy;
    use crate::messages::MessageId;
    use crate::upload::{PendingFile, Resolution, SelectedFile, UploadToken};
    use crate::zoom::{Point, ZoomViewer};
    use crate::{Event, Model};
    use tracing::{debug, error, info, warn};
    use uuid::Uuid;

    #[derive(Default)]
    pub struct App;

    impl App {
        fn report(model: &mut Model, error: &AnalysisError) {
            warn!(code = error.code(), error = %error, "surfacing error to user");
            model.bot_says(error.user_facing_message());
        }

        fn apply_config(config: Config, model: &mut Model) {
            match config.endpoints() {
                Ok(endpoints) => {
                    info!(
                        upload = endpoints.upload.host(),
                        predict = endpoints.predict.host(),
                        gated = config.require_destination_selection,
                        "configuration applied"
                    );
                    model.config = config;
                }
                Err(e) => {
                    error!(error = %e, "rejected configuration, keeping previous");
                }
            }
        }

        fn handle_file_selected(file: SelectedFile, model: &mut Model, caps: &Capabilities) {
            if model.is_busy() && model.config.busy_selection == BusySelectionPolicy::Ignore {
                warn!(
                    state = model.state.as_str(),
                    name = %file.name,
                    "file selection ignored while busy"
                );
                return;
            }

            let display_url = match model
                .upload
                .select_file(file, model.config.max_image_bytes)
            {
                Ok(pending) => pending.display_url().to_string(),
                Err(e) => {
                    Self::report(model, &AnalysisError::from(e));
                    return;
                }
            };
            model.selected_destination = None;
            model.user_says(UPLOADED_IMAGE_MESSAGE, Some(display_url));

            if model.state == AnalysisState::Predicting {
                info!(
                    token = ?model.upload.current_token(),
                    "upload deferred until the running prediction resolves"
                );
                return;
            }
            Self::start_upload(model, caps);
        }

        fn start_upload(model: &mut Model, caps: &Capabilities) {
            let boundary = format!("----expora-{}", Uuid::new_v4().simple());
            let Some(request) = model.upload.start_upload(&boundary) else {
                return;
            };

            match model.config.endpoints() {
                Ok(endpoints) => {
                    let token = request.token;
                    let request_id = send_upload(&caps.http, &endpoints.upload, request);
                    model.state = AnalysisState::Uploading;
                    info!(%token, %request_id, "upload started");
                }
                Err(e) => {
                    model.upload.fail_upload(request.token);
                    Self::upload_failed(model, TransportError::Request(e.to_string()));
                }
            }
        }

        fn handle_upload_response(
            token: UploadToken,
            request_id: &str,
            outcome: Result<String, TransportError>,
            model: &mut Model,
        ) {
            let resolution = match &outcome {
                Ok(url) => model.upload.complete_upload(token, url.clone()),
                Err(_) => model.upload.fail_upload(token),
            };
            if resolution == Resolution::Stale {
                debug!(
                    %token,
                    request_id,
                    current = ?model.upload.current_token(),
                    "dropping result for superseded upload"
                );
                return;
            }

            match outcome {
                Ok(url) => {
                    info!(%token, request_id, remote_url = %url, "upload complete");
                    model.state = AnalysisState::AwaitingCountryOrSend;
                    if model.config.require_destination_selection {
                        model.bot_says(UPLOAD_ACK_SELECT_DESTINATION);
                    } else {
                        model.bot_says(UPLOAD_ACK_SEND);
                    }
                }
                Err(e) => {
                    warn!(%token, request_id, status = ?e.status(), "upload failed");
                    Self::upload_failed(model, e);
                }
            }
        }

        fn upload_failed(model: &mut Model, error: TransportError) {
            model.state = AnalysisState::Idle;
            if model.config.upload_failure == UploadFailurePolicy::ClearPreview {
                model.upload.clear();
            }
            Self::report(model, &AnalysisError::UploadFailed(error));
        }

        /// The uploaded URL of the current file, or the stall message.
        fn ready_image_url(model: &mut Model) -> Option<String> {
            if let Some(url) = model.upload.remote_url() {
                return Some(url.to_string());
            }
            debug!(
                state = model.state.as_str(),
                status = ?model.upload.current().map(PendingFile::status),
                "prediction requested before upload finished"
            );
            Self::report(model, &AnalysisError::NotReadyForPrediction);
            None
        }

        fn handle_destination_selected(code: &str, model: &mut Model, caps: &Capabilities) {
            if model.state == AnalysisState::Predicting {
                warn!(code, "destination ignored while a prediction is running");
                return;
            }
            if !model.config.require_destination_selection {
                debug!(code, "destination picker is not used in free-text mode");
                return;
            }
            let code = code.trim();
            if code.is_empty() {
                return;
            }
            let Some(image_path) = Self::ready_image_url(model) else {
                return;
            };

            let label = destination_label(code).to_string();
            model.selected_destination = Some(code.to_string());
            model.user_says(format!("I want to export this product to {label}."), None);
            model.bot_says(format!(
                "Analyzing your product image for export to {label}..."
            ));
            Self::start_prediction(
                PredictRequest {
                    image_path,
                    country: Some(code.to_string()),
                },
                model,
                caps,
            );
        }

        fn handle_send(text: &str, model: &mut Model, caps: &Capabilities) {
            if model.state == AnalysisState::Predicting {
                warn!("send ignored while a prediction is running");
                return;
            }
            let text = text.trim();
            let gated = model.config.require_destination_selection;

            if model.upload.current().is_none() {
                if text.is_empty() {
                    Self::report(model, &AnalysisError::EmptySend);
                } else if gated {
                    model.user_says(text, None);
                    debug!(code = AnalysisError::ImageRequired.code(), "canned reply to free text");
                    model.bot_says(GATED_HELP_MESSAGE);
                } else {
                    model.user_says(text, None);
                    Self::report(model, &AnalysisError::ImageRequired);
                }
                return;
            }

            // Typed text always lands in the chat before any reply.
            if !text.is_empty() {
                model.user_says(text, None);
            }

            if gated {
                if model.upload.remote_url().is_none() {
                    Self::report(model, &AnalysisError::NotReadyForPrediction);
                } else {
                    model.bot_says(PICK_DESTINATION_MESSAGE);
                }
                return;
            }

            let Some(image_path) = Self::ready_image_url(model) else {
                return;
            };
            let country = if text.is_empty() {
                model.bot_says("Analyzing your product image...");
                None
            } else {
                model.bot_says(format!(
                    "Analyzing your product image for export to {text}..."
                ));
                Some(text.to_string())
            };
            Self::start_prediction(
                PredictRequest {
                    image_path,
                    country,
                },
                model,
                caps,
            );
        }

        fn start_prediction(body: PredictRequest, model: &mut Model, caps: &Capabilities) {
            let sent = model
                .config
                .endpoints()
                .map_err(|e| TransportError::Request(e.to_string()))
                .and_then(|endpoints| send_predict(&caps.http, &endpoints.predict, &body));

            match sent {
                Ok(request_id) => {
                    model.state = AnalysisState::Predicting;
                    info!(%request_id, country = ?body.country, "prediction started");
                }
                Err(e) => Self::prediction_finished(Err(e), model, caps),
            }
        }

        fn prediction_finished(
            outcome: Result<String, TransportError>,
            model: &mut Model,
            caps: &Capabilities,
        ) {
            model.state = AnalysisState::Idle;
            match outcome {
                Ok(message) => model.bot_says(message),
                Err(e) => {
                    warn!(status = ?e.status(), error = %e, "prediction failed");
                    Self::report(model, &AnalysisError::PredictionFailed(e));
                }
            }

            if model.upload.has_queued() {
                info!(token = ?model.upload.current_token(), "starting deferred upload");
                Self::start_upload(model, caps);
            }
        }

        fn open_zoom(message_id: &MessageId, model: &mut Model) {
            let image_url = model
                .messages
                .get(message_id)
                .and_then(|m| m.image_url.clone());
            match image_url {
                Some(url) => model.zoom = Some(ZoomViewer::open(url)),
                None => debug!(%message_id, "tapped message has no image"),
            }
        }

        fn with_zoom(model: &mut Model, f: impl FnOnce(&mut ZoomViewer)) {
            if let Some(viewer) = model.zoom.as_mut() {
                f(viewer);
            }
        }

        fn build_messages(model: &Model) -> Vec<MessageView> {
            let offset = model.config.utc_offset_minutes;
            let mut previous: Option<Sender> = None;
            model
                .messages
                .all()
                .iter()
                .map(|m| {
                    let is_bot = m.sender == Sender::Bot;
                    let view = MessageView {
                        id: m.id.to_string(),
                        content: m.content.clone(),
                        sender: m.sender,
                        time_text: format_clock_time(m.timestamp, offset),
                        image_url: m.image_url.clone(),
                        show_avatar: is_bot && previous != Some(Sender::Bot),
                        can_copy: is_bot,
                    };
                    previous = Some(m.sender);
                    view
                })
                .collect()
        }

        fn build_preview(pending: &PendingFile) -> PreviewView {
            let name = pending.name();
            let caption = match pending.status() {
                UploadStatus::Queued => format!("{name} (waiting to upload)"),
                UploadStatus::Uploading => format!("Uploading {name}..."),
                UploadStatus::Uploaded(_) => format!("{name} uploaded"),
                UploadStatus::Failed => format!("{name} failed to upload"),
            };
            PreviewView {
                data_uri: pending.preview_data_uri().to_string(),
                caption,
                status: pending.status().clone(),
            }
        }
    }

    impl crux_core::App for App {
        type Event = Event;
        type Model = Model;
        type ViewModel = ViewModel;
        type Capabilities = Capabilities;

        fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
            let event_name = event.name();
            if event.is_user_initiated() {
                info!(event = event_name, state = model.state.as_str(), "user action");
            } else {
                debug!(event = event_name, state = model.state.as_str(), "event");
            }

            match event {
                Event::Noop => {}

                Event::Configure(config) => Self::apply_config(*config, model),

                Event::FileSelected(file) => Self::handle_file_selected(*file, model, caps),

                Event::DestinationSelected { code } => {
                    Self::handle_destination_selected(&code, model, caps);
                }

                Event::SendRequested { text } => Self::handle_send(&text, model, caps),

                Event::UploadResponse {
                    token,
                    request_id,
                    outcome,
                } => Self::handle_upload_response(token, request_id.as_str(), outcome, model),

                Event::PredictResponse {
                    request_id,
                    outcome,
                } => {
                    if model.state == AnalysisState::Predicting {
                        debug!(%request_id, ok = outcome.is_ok(), "prediction resolved");
                        Self::prediction_finished(outcome, model, caps);
                    } else {
                        warn!(%request_id, state = model.state.as_str(), "unexpected prediction result dropped");
                    }
                }

                Event::ImageTapped { message_id } => Self::open_zoom(&message_id, model),

                Event::ZoomWheel { delta_y } => Self::with_zoom(model, |z| z.on_wheel(delta_y)),

                Event::ZoomTouchMove { touches } => {
                    Self::with_zoom(model, |z| z.on_touch_move(&touches));
                }

                Event::ZoomPointerDown { x, y } => {
                    Self::with_zoom(model, |z| z.pointer_down(Point::new(x, y)));
                }

                Event::ZoomPointerMove { x, y } => {
                    Self::with_zoom(model, |z| z.pointer_move(Point::new(x, y)));
                }

                Event::ZoomPointerUp => Self::with_zoom(model, ZoomViewer::pointer_up),

                Event::ZoomClosed | Event::SurfaceUnmounted => model.zoom = None,
            }

            caps.render.render();
        }

        fn view(&self, model: &Model) -> ViewModel {
            let is_busy = model.is_busy();
            let predicting = model.state == AnalysisState::Predicting;
            let preview = model.upload.current().map(Self::build_preview);

            let destination_picker =
                model
                    .config
                    .require_destination_selection
                    .then(|| DestinationPickerView {
                        options: DESTINATIONS
                            .iter()
                            .map(|d| DestinationOption {
                                code: d.code.to_string(),
                                label: d.label.to_string(),
                            })
                            .collect(),
                        selected: model.selected_destination.clone(),
                        enabled: preview.is_some() && !predicting,
                    });

            let zoom = model.zoom.as_ref().map(|z| ZoomView {
                image_url: z.image_url().to_string(),
                transform: z.transform(),
                dragging: z.is_dragging(),
                transition_enabled: !z.is_dragging(),
            });

            ViewModel {
                messages: Self::build_messages(model),
                phase: model.state,
                is_busy,
                input_enabled: !is_busy,
                upload_enabled: !is_busy
                    || model.config.busy_selection == BusySelectionPolicy::Replace,
                destination_picker,
                preview,
                page_scroll_locked: zoom.is_some(),
                zoom,
                scroll_anchor: model.messages.last().map(|m| m.id.to_string()),
                request_timeout_ms: model.config.request_timeout_ms,
            }
        }
    }
}
