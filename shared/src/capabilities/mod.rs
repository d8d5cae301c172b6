mod http;

pub use self::http::{
    decode_predict, decode_upload, parse_predict_reply, parse_upload_reply, send_predict,
    send_upload, AppHttp, PredictReply, PredictRequest, RequestId, TransportError, UploadReply,
    REQUEST_ID_HEADER,
};

/// View refreshes go through Crux's built-in Render capability.
pub use crux_core::render::Render;
pub use crux_http::Http;

use crate::event::Event;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub http: Http<Event>,
    pub render: Render<Event>,
}
