use utoipa::OpenApi;

use crate::routes::{auth, chat, health, profile};

#[derive(OpenApi)]
#[openapi(info(
    title = "parley-server",
    description = "parley-server API",
    version = "0.1.0",
))]
pub struct ApiDoc;

pub fn get_docs() -> utoipa::openapi::OpenApi {
    let mut root = ApiDoc::openapi();
    root.merge(health::HealthApi::openapi());
    root.merge(auth::AuthApi::openapi());
    root.merge(profile::ProfileApi::openapi());
    root.merge(chat::ChatApi::openapi());
    root
}
