use crate::config::Config;
use crate::error::Error;
use crate::io_struct::ChatReqInput;
use crate::state::AppState;
use actix_web::http::{StatusCode, header};
use actix_web::{HttpRequest, HttpResponse, HttpServer, ResponseError, get, post, web};
use serde_json::json;

const MAX_PAYLOAD_SIZE: usize = 32 * 1024 * 1024;

impl ResponseError for Error {
    fn status_code(&self) -> StatusCode {
        match self {
            Error::UnknownModel { .. } => StatusCode::NOT_FOUND,
            Error::Configuration { .. } => StatusCode::BAD_REQUEST,
            Error::Authorization { .. } => StatusCode::UNAUTHORIZED,
            Error::Provider { .. } | Error::Protocol { .. } => StatusCode::BAD_GATEWAY,
            Error::PullInProgress => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let mut response = HttpResponse::build(status);
        if let Error::Authorization { .. } = self {
            response.insert_header((header::WWW_AUTHENTICATE, "Bearer"));
        }
        response.json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": status.as_u16(),
            }
        }))
    }
}

#[get("/health")]
pub async fn health(_req: HttpRequest) -> HttpResponse {
    HttpResponse::Ok().body("Ok")
}

#[get("/v1/models")]
pub async fn list_models(_req: HttpRequest, app_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(app_state.list_models())
}

#[post("/v1/chat/completions")]
pub async fn chat_completions(
    req: HttpRequest,
    body: web::Json<ChatReqInput>,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let authorization = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    app_state.verify_authorization(authorization)?;
    app_state.chat_completions(body.into_inner()).await
}

fn json_error_handler(
    err: actix_web::error::JsonPayloadError,
    _req: &HttpRequest,
) -> actix_web::Error {
    Error::configuration(format!("invalid request body: {}", err)).into()
}

/// Routes and extractor settings, shared by [`startup`] and the tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(MAX_PAYLOAD_SIZE)
            .error_handler(json_error_handler),
    )
    .service(health)
    .service(list_models)
    .service(chat_completions);
}

pub async fn startup(config: Config, app_state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(app_state);

    log::info!(
        "Starting server at {}:{} with {} models",
        config.host,
        config.port,
        app_state.registry.models().len()
    );

    HttpServer::new(move || {
        actix_web::App::new()
            .wrap(actix_web::middleware::Logger::default())
            .app_data(app_state.clone())
            .configure(configure)
    })
    .bind((config.host, config.port))?
    .run()
    .await?;

    std::io::Result::Ok(())
}
