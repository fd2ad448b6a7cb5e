mod http;
mod object_url;

pub use self::http::{
    Http, HttpError, HttpHeaders, HttpMethod, HttpOperation, HttpRequest, HttpResponse,
    HttpResult, TransportError, ValidatedUrl,
};
pub use self::object_url::{ObjectUrl, ObjectUrlOperation, ObjectUrlOutput};

// We use Crux's built-in Render capability directly because it provides
// all necessary functionality for triggering view updates.
pub use crux_core::render::Render;

use crate::app::Event;

pub type AppHttp = Http<Event>;
pub type AppObjectUrl = ObjectUrl<Event>;
pub type AppRender = Render<Event>;

#[derive(crux_core::macros::Effect)]
pub struct Capabilities {
    pub render: Render<Event>,
    pub http: Http<Event>,
    pub object_url: ObjectUrl<Event>,
}
