use serde::{Deserialize, Serialize};

use crate::capabilities::{RequestId, TransportError};
use crate::config::Config;
use crate::messages::MessageId;
use crate::upload::{SelectedFile, UploadToken};
use crate::zoom::Point;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub enum Event {
    #[default]
    Noop,

    // Lifecycle
    Configure(Box<Config>),

    // Upload flow
    FileSelected(Box<SelectedFile>),

    // Analysis flow
    DestinationSelected {
        code: String,
    },
    SendRequested {
        text: String,
    },

    // Network results, already decoded from the HTTP response
    UploadResponse {
        token: UploadToken,
        request_id: RequestId,
        outcome: Result<String, TransportError>,
    },
    PredictResponse {
        request_id: RequestId,
        outcome: Result<String, TransportError>,
    },

    // Zoom overlay
    ImageTapped {
        message_id: MessageId,
    },
    ZoomWheel {
        delta_y: f64,
    },
    ZoomTouchMove {
        touches: Vec<Point>,
    },
    ZoomPointerDown {
        x: f64,
        y: f64,
    },
    ZoomPointerMove {
        x: f64,
        y: f64,
    },
    /// Pointer released or left the overlay.
    ZoomPointerUp,
    ZoomClosed,
    SurfaceUnmounted,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Configure(_) => "configure",
            Self::FileSelected(_) => "file_selected",
            Self::DestinationSelected { .. } => "destination_selected",
            Self::SendRequested { .. } => "send_requested",
            Self::UploadResponse { .. } => "upload_response",
            Self::PredictResponse { .. } => "predict_response",
            Self::ImageTapped { .. } => "image_tapped",
            Self::ZoomWheel { .. } => "zoom_wheel",
            Self::ZoomTouchMove { .. } => "zoom_touch_move",
            Self::ZoomPointerDown { .. } => "zoom_pointer_down",
            Self::ZoomPointerMove { .. } => "zoom_pointer_move",
            Self::ZoomPointerUp => "zoom_pointer_up",
            Self::ZoomClosed => "zoom_closed",
            Self::SurfaceUnmounted => "surface_unmounted",
        }
    }

    /// Discrete user actions. High-frequency gesture moves are left out so
    /// they stay out of info-level logs.
    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            Self::FileSelected(_)
                | Self::DestinationSelected { .. }
                | Self::SendRequested { .. }
                | Self::ImageTapped { .. }
                | Self::ZoomClosed
        )
    }

    pub fn file_selected(file: SelectedFile) -> Self {
        Self::FileSelected(Box::new(file))
    }

    pub fn configure(config: Config) -> Self {
        Self::Configure(Box::new(config))
    }
}
