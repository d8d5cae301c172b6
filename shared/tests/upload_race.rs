use crux_core::testing::AppTester;
use shared::capabilities::{RequestId, TransportError};
use shared::config::BusySelectionPolicy;
use shared::model::AnalysisState;
use shared::upload::{SelectedFile, UploadStatus, UploadToken};
use shared::{App, Config, Effect, Event, Model, UPLOADED_IMAGE_MESSAGE};

fn png(name: &str) -> SelectedFile {
    let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
    bytes.extend_from_slice(&[0u8; 32]);
    SelectedFile {
        name: name.to_string(),
        mime_type: "image/png".to_string(),
        bytes,
        object_url: Some(format!("blob:{name}")),
    }
}

fn http_bodies(effects: Vec<Effect>) -> Vec<Vec<u8>> {
    effects
        .into_iter()
        .filter_map(|e| match e {
            Effect::Http(request) => Some(request.operation.body),
            _ => None,
        })
        .collect()
}

fn upload_result(token: u64, outcome: Result<String, TransportError>) -> Event {
    Event::UploadResponse {
        token: UploadToken(token),
        request_id: RequestId(format!("upload-{token}")),
        outcome,
    }
}

fn ungated_model(app: &AppTester<App, Effect>) -> Model {
    let mut model = Model::default();
    let _ = app.update(
        Event::configure(Config {
            require_destination_selection: false,
            ..Config::default()
        }),
        &mut model,
    );
    model
}

#[test]
fn test_two_rapid_selections_only_consume_latest_upload() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ungated_model(&app);

    let first = app.update(Event::file_selected(png("a.png")), &mut model);
    assert_eq!(http_bodies(first.effects).len(), 1);
    let second = app.update(Event::file_selected(png("b.png")), &mut model);
    assert_eq!(http_bodies(second.effects).len(), 1);
    assert_eq!(model.upload.current_token(), Some(UploadToken(2)));

    // The first upload finishes late; its URL must not be used.
    let messages_before = model.messages.len();
    let _ = app.update(upload_result(1, Ok("https://s3/a.png".into())), &mut model);
    assert_eq!(model.messages.len(), messages_before);
    assert_eq!(model.upload.remote_url(), None);
    assert_eq!(model.state, AnalysisState::Uploading);

    let _ = app.update(upload_result(2, Ok("https://s3/b.png".into())), &mut model);
    assert_eq!(model.upload.remote_url(), Some("https://s3/b.png"));

    let update = app.update(Event::SendRequested { text: String::new() }, &mut model);
    let bodies = http_bodies(update.effects);
    assert_eq!(bodies.len(), 1);
    let sent: serde_json::Value = serde_json::from_slice(&bodies[0]).unwrap();
    assert_eq!(sent["imagePath"], "https://s3/b.png");
}

#[test]
fn test_stale_result_arriving_after_current_is_ignored() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ungated_model(&app);
    let _ = app.update(Event::file_selected(png("a.png")), &mut model);
    let _ = app.update(Event::file_selected(png("b.png")), &mut model);

    let _ = app.update(upload_result(2, Ok("https://s3/b.png".into())), &mut model);
    let messages_after_ack = model.messages.len();
    let _ = app.update(
        upload_result(1, Err(TransportError::Network("timeout".into()))),
        &mut model,
    );

    assert_eq!(model.messages.len(), messages_after_ack);
    assert_eq!(model.upload.remote_url(), Some("https://s3/b.png"));
    assert_eq!(model.state, AnalysisState::AwaitingCountryOrSend);
}

#[test]
fn test_ignore_policy_drops_selection_while_busy() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let _ = app.update(
        Event::configure(Config {
            busy_selection: BusySelectionPolicy::Ignore,
            ..Config::default()
        }),
        &mut model,
    );
    let _ = app.update(Event::file_selected(png("a.png")), &mut model);
    let messages_before = model.messages.len();
    assert!(!app.view(&model).upload_enabled);

    let update = app.update(Event::file_selected(png("b.png")), &mut model);

    assert!(http_bodies(update.effects).is_empty());
    assert_eq!(model.messages.len(), messages_before);
    assert_eq!(model.upload.current_token(), Some(UploadToken(1)));
}

#[test]
fn test_selection_during_prediction_uploads_after_it_resolves() {
    let app = AppTester::<App, Effect>::default();
    let mut model = ungated_model(&app);
    let _ = app.update(Event::file_selected(png("a.png")), &mut model);
    let _ = app.update(upload_result(1, Ok("https://s3/a.png".into())), &mut model);
    let _ = app.update(Event::SendRequested { text: String::new() }, &mut model);
    assert_eq!(model.state, AnalysisState::Predicting);

    let update = app.update(Event::file_selected(png("b.png")), &mut model);
    assert!(http_bodies(update.effects).is_empty());
    assert_eq!(model.state, AnalysisState::Predicting);
    assert_eq!(
        model.messages.last().unwrap().content,
        UPLOADED_IMAGE_MESSAGE
    );
    assert_eq!(
        model.upload.current().map(|p| p.status().clone()),
        Some(UploadStatus::Queued)
    );

    let update = app.update(
        Event::PredictResponse {
            request_id: RequestId("p".into()),
            outcome: Ok("Compliant.".into()),
        },
        &mut model,
    );

    let bodies = http_bodies(update.effects);
    assert_eq!(bodies.len(), 1);
    assert!(String::from_utf8_lossy(&bodies[0]).contains("filename=\"b.png\""));
    assert_eq!(model.state, AnalysisState::Uploading);
    assert!(model
        .messages
        .all()
        .iter()
        .any(|m| m.content == "Compliant."));
}

#[test]
fn test_selection_during_upload_replaces_preview() {
    let app = AppTester::<App, Effect>::default();
    let mut model = Model::default();
    let _ = app.update(Event::file_selected(png("a.png")), &mut model);
    let _ = app.update(Event::file_selected(png("b.png")), &mut model);

    let view = app.view(&model);
    assert_eq!(view.preview.unwrap().caption, "Uploading b.png...");
    let image_messages: Vec<_> = model
        .messages
        .all()
        .iter()
        .filter_map(|m| m.image_url.as_deref())
        .collect();
    assert_eq!(image_messages, vec!["blob:a.png", "blob:b.png"]);
}
