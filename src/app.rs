//! The application core: a state machine over exactly four phases
//! (idle, loading, success, failure) plus the lifecycle of the single
//! held image handle.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use uuid::Uuid;

use crate::analysis::{self, AnalysisError, ClientConfig};
use crate::capabilities::{Capabilities, HttpResult};
use crate::encoding::{self, EncodedImage};
use crate::normalize::AnalysisResult;
use crate::{AppError, ErrorKind};

/// The image currently on screen. Dropping the entry alone is not enough:
/// the shell-side object URL must be revoked, which `App::release_image`
/// guarantees on replacement and reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldImage {
    pub handle_id: String,
    pub mime_type: String,
    pub size_bytes: usize,
    pub object_url: Option<String>,
}

/// Exactly one phase at a time; a loading phase owns the id of the one
/// request whose reply it will accept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Loading {
        request_id: String,
    },
    Success {
        result: AnalysisResult,
    },
    Failure {
        message: String,
    },
}

impl Phase {
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Loading { .. } => "loading",
            Self::Success { .. } => "success",
            Self::Failure { .. } => "failure",
        }
    }
}

#[derive(Default)]
pub struct Model {
    pub config: Option<ClientConfig>,
    pub startup_error: Option<AppError>,
    pub phase: Phase,
    pub image: Option<HeldImage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Event {
    #[default]
    Noop,

    /// Delivered once by the shell with the out-of-band credential.
    Started {
        api_key: Option<String>,
    },

    /// A file arrived from the picker or a drag-and-drop.
    ImageSelected {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        mime_type: String,
    },

    /// Shell finished creating a display URL for a held image.
    ObjectUrlCreated {
        handle_id: String,
        url: String,
    },

    /// Outcome of the analysis round-trip.
    AnalysisResponse {
        request_id: String,
        result: Box<HttpResult>,
    },

    /// Full reset back to the uploader.
    ResetRequested,
}

impl Event {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Noop => "noop",
            Self::Started { .. } => "started",
            Self::ImageSelected { .. } => "image_selected",
            Self::ObjectUrlCreated { .. } => "object_url_created",
            Self::AnalysisResponse { .. } => "analysis_response",
            Self::ResetRequested => "reset_requested",
        }
    }

    #[must_use]
    pub const fn is_user_initiated(&self) -> bool {
        matches!(self, Self::ImageSelected { .. } | Self::ResetRequested)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JustificationView {
    pub category: String,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceView {
    pub uri: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewState {
    Uploader,
    Analyzing {
        image_url: Option<String>,
    },
    Result {
        image_url: Option<String>,
        location: String,
        confidence: String,
        justification: Vec<JustificationView>,
        sources: Vec<SourceView>,
    },
    Error {
        message: String,
        can_retry: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewModel {
    pub state: ViewState,
    pub is_analyzing: bool,
}

#[derive(Default)]
pub struct App;

impl App {
    fn handle_started(api_key: Option<String>, model: &mut Model) {
        match ClientConfig::new(api_key.unwrap_or_default()) {
            Ok(config) => {
                model.config = Some(config);
                model.startup_error = None;
            }
            Err(e) => {
                let app_error: AppError = e.into();
                error!(error = %app_error, "refusing to initialize without a credential");
                model.startup_error = Some(app_error);
            }
        }
    }

    fn handle_image_selected(
        data: Vec<u8>,
        mime_type: String,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        if model.startup_error.is_some() {
            debug!("image selected while unconfigured; ignoring");
            return;
        }

        // Selection is accepted only from Idle or Failure. Loading is the
        // re-entrancy guard (one analysis in flight at a time); a result
        // on screen must be dismissed through a reset first.
        match model.phase {
            Phase::Idle | Phase::Failure { .. } => {}
            Phase::Loading { .. } => {
                debug!("analysis already in flight; ignoring selection");
                return;
            }
            Phase::Success { .. } => {
                debug!("result still on screen; ignoring selection");
                return;
            }
        }

        if !encoding::is_image_mime(&mime_type) {
            debug!(%mime_type, "non-image selection silently ignored");
            return;
        }

        let Some(config) = model.config.clone() else {
            let app_error =
                AppError::new(ErrorKind::Configuration, "client was never initialized");
            error!(error = %app_error, "image selected before startup event");
            model.startup_error = Some(app_error);
            caps.render.render();
            return;
        };

        Self::release_image(model, caps);

        let dispatch = EncodedImage::from_bytes(&data, mime_type.clone())
            .map_err(AnalysisError::Read)
            .and_then(|image| analysis::build_request(&config, &image));

        let handle_id = Uuid::new_v4().to_string();
        model.image = Some(HeldImage {
            handle_id: handle_id.clone(),
            mime_type: mime_type.clone(),
            size_bytes: data.len(),
            object_url: None,
        });
        caps.object_url
            .create(data, mime_type, move |url| Event::ObjectUrlCreated {
                handle_id,
                url,
            });

        match dispatch {
            Ok(request) => {
                let request_id = request.request_id().to_string();
                model.phase = Phase::Loading {
                    request_id: request_id.clone(),
                };
                caps.http.send(request, move |result| Event::AnalysisResponse {
                    request_id,
                    result: Box::new(result),
                });
            }
            Err(e) => {
                let app_error: AppError = e.into();
                error!(error = %app_error, "analysis request never left the core");
                model.phase = Phase::Failure {
                    message: app_error.user_facing_message(),
                };
            }
        }

        caps.render.render();
    }

    fn handle_object_url_created(
        handle_id: &str,
        url: String,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        match &mut model.image {
            Some(image) if image.handle_id == handle_id => {
                image.object_url = Some(url);
                caps.render.render();
            }
            _ => {
                // The image was replaced or reset while the shell was
                // creating the URL; revoke it so nothing leaks.
                debug!("revoking object URL for a released image handle");
                caps.object_url.revoke(url);
            }
        }
    }

    fn handle_analysis_response(
        request_id: &str,
        result: HttpResult,
        model: &mut Model,
        caps: &Capabilities,
    ) {
        let expected = match &model.phase {
            Phase::Loading { request_id } => request_id,
            _ => {
                debug!("analysis reply arrived outside loading; discarding");
                return;
            }
        };
        if expected != request_id {
            debug!("stale analysis reply discarded");
            return;
        }

        match analysis::process_reply(result) {
            Ok(result) => {
                model.phase = Phase::Success { result };
            }
            Err(e) => {
                let app_error: AppError = e.into();
                model.phase = Phase::Failure {
                    message: app_error.user_facing_message(),
                };
            }
        }

        caps.render.render();
    }

    fn release_image(model: &mut Model, caps: &Capabilities) {
        if let Some(image) = model.image.take() {
            if let Some(url) = image.object_url {
                caps.object_url.revoke(url);
            }
        }
    }
}

impl crux_core::App for App {
    type Event = Event;
    type Model = Model;
    type ViewModel = ViewModel;
    type Capabilities = Capabilities;

    fn update(&self, event: Event, model: &mut Model, caps: &Capabilities) {
        debug!(
            event = event.name(),
            user_initiated = event.is_user_initiated(),
            phase = model.phase.name(),
            "update"
        );

        match event {
            Event::Noop => {}

            Event::Started { api_key } => {
                Self::handle_started(api_key, model);
                caps.render.render();
            }

            Event::ImageSelected { data, mime_type } => {
                Self::handle_image_selected(data, mime_type, model, caps);
            }

            Event::ObjectUrlCreated { handle_id, url } => {
                Self::handle_object_url_created(&handle_id, url, model, caps);
            }

            Event::AnalysisResponse { request_id, result } => {
                Self::handle_analysis_response(&request_id, *result, model, caps);
            }

            Event::ResetRequested => {
                Self::release_image(model, caps);
                model.phase = Phase::Idle;
                caps.render.render();
            }
        }
    }

    fn view(&self, model: &Model) -> ViewModel {
        if let Some(startup_error) = &model.startup_error {
            return ViewModel {
                state: ViewState::Error {
                    message: startup_error.user_facing_message(),
                    can_retry: startup_error.kind.is_retryable(),
                },
                is_analyzing: false,
            };
        }

        let image_url = model
            .image
            .as_ref()
            .and_then(|image| image.object_url.clone());

        let state = match &model.phase {
            Phase::Idle => ViewState::Uploader,
            Phase::Loading { .. } => ViewState::Analyzing { image_url },
            Phase::Success { result } => ViewState::Result {
                image_url,
                location: result.location.clone(),
                confidence: result.confidence.clone(),
                justification: result
                    .justification
                    .iter()
                    .map(|(category, details)| JustificationView {
                        category: category.clone(),
                        details: details.clone(),
                    })
                    .collect(),
                sources: result
                    .sources
                    .iter()
                    .map(|source| SourceView {
                        uri: source.uri.clone(),
                        title: source.display_title(),
                    })
                    .collect(),
            },
            Phase::Failure { message } => ViewState::Error {
                message: message.clone(),
                can_retry: true,
            },
        };

        ViewModel {
            is_analyzing: model.phase.is_loading(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capabilities::Effect;
    use crux_core::testing::AppTester;

    const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x01, 0x02];

    fn started_app() -> (AppTester<App, Effect>, Model) {
        let app = AppTester::<App, Effect>::default();
        let mut model = Model::default();
        app.update(
            Event::Started {
                api_key: Some("test-key".to_string()),
            },
            &mut model,
        );
        (app, model)
    }

    fn select_jpeg(app: &AppTester<App, Effect>, model: &mut Model) {
        app.update(
            Event::ImageSelected {
                data: JPEG_BYTES.to_vec(),
                mime_type: "image/jpeg".to_string(),
            },
            model,
        );
    }

    #[test]
    fn test_started_with_key_is_idle_uploader() {
        let (app, model) = started_app();
        assert!(model.config.is_some());
        assert!(model.startup_error.is_none());
        assert_eq!(app.view(&model).state, ViewState::Uploader);
    }

    #[test]
    fn test_started_without_key_is_fatal() {
        let app = AppTester::<App, Effect>::default();
        let mut model = Model::default();
        app.update(Event::Started { api_key: None }, &mut model);

        assert!(model.config.is_none());
        assert!(model.startup_error.is_some());
        match app.view(&model).state {
            ViewState::Error { can_retry, .. } => assert!(!can_retry),
            other => panic!("expected error view, got {other:?}"),
        }

        // Selection is refused while unconfigured.
        select_jpeg(&app, &mut model);
        assert_eq!(model.phase, Phase::Idle);
        assert!(model.image.is_none());
    }

    #[test]
    fn test_select_enters_loading_synchronously() {
        let (app, mut model) = started_app();

        let update = app.update(
            Event::ImageSelected {
                data: JPEG_BYTES.to_vec(),
                mime_type: "image/jpeg".to_string(),
            },
            &mut model,
        );

        assert!(model.phase.is_loading());
        assert!(model.image.is_some());
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Http(_))));
        assert!(update
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ObjectUrl(_))));
        assert!(update.effects.iter().any(|e| matches!(e, Effect::Render(_))));
        assert!(app.view(&model).is_analyzing);
    }

    #[test]
    fn test_non_image_selection_is_ignored() {
        let (app, mut model) = started_app();

        let update = app.update(
            Event::ImageSelected {
                data: b"hello".to_vec(),
                mime_type: "text/plain".to_string(),
            },
            &mut model,
        );

        assert_eq!(model.phase, Phase::Idle);
        assert!(model.image.is_none());
        assert!(update.effects.is_empty());
    }

    #[test]
    fn test_second_select_while_loading_is_noop() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let first_request_id = match &model.phase {
            Phase::Loading { request_id } => request_id.clone(),
            other => panic!("expected loading, got {other:?}"),
        };
        let first_handle = model.image.as_ref().unwrap().handle_id.clone();

        let update = app.update(
            Event::ImageSelected {
                data: JPEG_BYTES.to_vec(),
                mime_type: "image/png".to_string(),
            },
            &mut model,
        );

        assert_eq!(
            model.phase,
            Phase::Loading {
                request_id: first_request_id
            }
        );
        assert_eq!(model.image.as_ref().unwrap().handle_id, first_handle);
        assert!(update.effects.is_empty());
    }

    #[test]
    fn test_select_while_result_on_screen_is_ignored() {
        let (app, mut model) = started_app();
        model.phase = Phase::Success {
            result: crate::normalize::normalize(&serde_json::json!({
                "location": "Porto, Portugal",
                "confidence": "80%",
                "justification": [
                    { "category": "Street", "details": ["calçada pavement"] }
                ]
            })),
        };

        let update = app.update(
            Event::ImageSelected {
                data: JPEG_BYTES.to_vec(),
                mime_type: "image/jpeg".to_string(),
            },
            &mut model,
        );

        assert!(matches!(model.phase, Phase::Success { .. }));
        assert!(update.effects.is_empty());
    }

    #[test]
    fn test_select_from_failure_replaces_and_releases_prior_image() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let first_handle = model.image.as_ref().unwrap().handle_id.clone();
        app.update(
            Event::ObjectUrlCreated {
                handle_id: first_handle.clone(),
                url: "blob:first".to_string(),
            },
            &mut model,
        );
        model.phase = Phase::Failure {
            message: "boom".to_string(),
        };

        let update = app.update(
            Event::ImageSelected {
                data: JPEG_BYTES.to_vec(),
                mime_type: "image/png".to_string(),
            },
            &mut model,
        );

        assert!(model.phase.is_loading());
        let held = model.image.as_ref().unwrap();
        assert_ne!(held.handle_id, first_handle);
        assert!(held.object_url.is_none());
        // One revoke for the replaced handle, one create for the new one.
        assert!(
            update
                .effects
                .iter()
                .filter(|e| matches!(e, Effect::ObjectUrl(_)))
                .count()
                >= 2
        );
    }

    #[test]
    fn test_empty_image_fails_locally() {
        let (app, mut model) = started_app();

        app.update(
            Event::ImageSelected {
                data: Vec::new(),
                mime_type: "image/png".to_string(),
            },
            &mut model,
        );

        match &model.phase {
            Phase::Failure { message } => {
                assert!(message.contains("could not be read"));
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_object_url_attaches_to_current_image() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let handle_id = model.image.as_ref().unwrap().handle_id.clone();

        app.update(
            Event::ObjectUrlCreated {
                handle_id,
                url: "blob:abc".to_string(),
            },
            &mut model,
        );

        assert_eq!(
            model.image.as_ref().unwrap().object_url.as_deref(),
            Some("blob:abc")
        );
    }

    #[test]
    fn test_late_object_url_is_revoked() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let handle_id = model.image.as_ref().unwrap().handle_id.clone();
        app.update(Event::ResetRequested, &mut model);

        let update = app.update(
            Event::ObjectUrlCreated {
                handle_id,
                url: "blob:late".to_string(),
            },
            &mut model,
        );

        assert!(model.image.is_none());
        assert!(update
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ObjectUrl(_))));
    }

    #[test]
    fn test_reset_from_any_phase_yields_idle_without_image() {
        let (app, mut model) = started_app();

        // From Loading.
        select_jpeg(&app, &mut model);
        app.update(Event::ResetRequested, &mut model);
        assert_eq!(model.phase, Phase::Idle);
        assert!(model.image.is_none());

        // From Failure.
        model.phase = Phase::Failure {
            message: "boom".to_string(),
        };
        app.update(Event::ResetRequested, &mut model);
        assert_eq!(model.phase, Phase::Idle);

        // From Idle it stays Idle.
        app.update(Event::ResetRequested, &mut model);
        assert_eq!(model.phase, Phase::Idle);
        assert_eq!(app.view(&model).state, ViewState::Uploader);
    }

    #[test]
    fn test_reset_revokes_held_object_url() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let handle_id = model.image.as_ref().unwrap().handle_id.clone();
        app.update(
            Event::ObjectUrlCreated {
                handle_id,
                url: "blob:held".to_string(),
            },
            &mut model,
        );

        let update = app.update(Event::ResetRequested, &mut model);

        assert!(model.image.is_none());
        assert!(update
            .effects
            .iter()
            .any(|e| matches!(e, Effect::ObjectUrl(_))));
    }

    #[test]
    fn test_stale_response_is_discarded() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);

        let update = app.update(
            Event::AnalysisResponse {
                request_id: "some-other-request".to_string(),
                result: Box::new(Err(crate::capabilities::TransportError::Cancelled)),
            },
            &mut model,
        );

        assert!(model.phase.is_loading());
        assert!(update.effects.is_empty());
    }

    #[test]
    fn test_response_after_reset_is_discarded() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let request_id = match &model.phase {
            Phase::Loading { request_id } => request_id.clone(),
            other => panic!("expected loading, got {other:?}"),
        };
        app.update(Event::ResetRequested, &mut model);

        app.update(
            Event::AnalysisResponse {
                request_id,
                result: Box::new(Err(crate::capabilities::TransportError::Cancelled)),
            },
            &mut model,
        );

        assert_eq!(model.phase, Phase::Idle);
    }

    #[test]
    fn test_transport_failure_lands_in_failure_phase() {
        let (app, mut model) = started_app();
        select_jpeg(&app, &mut model);
        let request_id = match &model.phase {
            Phase::Loading { request_id } => request_id.clone(),
            other => panic!("expected loading, got {other:?}"),
        };

        app.update(
            Event::AnalysisResponse {
                request_id,
                result: Box::new(Err(crate::capabilities::TransportError::Network {
                    message: "connection refused".to_string(),
                })),
            },
            &mut model,
        );

        match &model.phase {
            Phase::Failure { message } => {
                assert!(message.contains("try again with a different image"));
                assert!(!message.contains("connection refused"));
            }
            other => panic!("expected failure, got {other:?}"),
        }

        match app.view(&model).state {
            ViewState::Error { can_retry, .. } => assert!(can_retry),
            other => panic!("expected error view, got {other:?}"),
        }
    }
}
