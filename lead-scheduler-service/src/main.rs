use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use chrono::NaiveDate;
use dialogue_flow::{InMemorySessionStorage, PostgresSessionStorage, SessionStorage};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use lead_scheduler_service::agent::{ChatAgent, Step};
use lead_scheduler_service::nlu::RigLanguageService;
use lead_scheduler_service::scheduling::{
    Appointment, Availability, BookingService, InMemoryAppointmentStore, InMemoryLeadStore, Shift,
};

/// Hard bound on a whole turn, including every chained step and collaborator
/// call; the per-call collaborator timeout is tighter
const TURN_TIMEOUT: Duration = Duration::from_secs(60);

const MAX_MESSAGE_LENGTH: usize = 2000;

#[derive(Clone)]
struct AppState {
    agent: Arc<ChatAgent>,
    booking: Arc<BookingService>,
}

#[derive(Debug, Deserialize)]
struct ChatMessageRequest {
    session_id: Option<String>,
    message: String,
}

#[derive(Debug, Serialize)]
struct ChatMessageResponse {
    session_id: String,
    response: String,
    conversation_mode: String,
}

#[derive(Debug, Deserialize)]
struct ChatResetRequest {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct ChatResetResponse {
    session_id: String,
    message: String,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "snake_case")]
enum BlockScope {
    FullDay,
    Morning,
    Afternoon,
}

#[derive(Debug, Deserialize)]
struct BlockRequest {
    date: NaiveDate,
    scope: BlockScope,
}

#[derive(Debug, Deserialize)]
struct UnblockRequest {
    date: NaiveDate,
}

/// Initialize structured tracing; `LOG_FORMAT=pretty` switches the JSON
/// output to human-readable logs for development
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "lead_scheduler_service=debug,dialogue_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    if std::env::var("OPENROUTER_API_KEY").is_err() {
        warn!("OPENROUTER_API_KEY not set; language calls will rely on deterministic fallbacks");
    }

    // Session state: PostgreSQL when DATABASE_URL is set, in-memory otherwise
    let session_storage: Arc<dyn SessionStorage<Step>> =
        if let Ok(database_url) = std::env::var("DATABASE_URL") {
            match PostgresSessionStorage::connect(&database_url).await {
                Ok(storage) => {
                    info!("Using PostgreSQL session storage");
                    Arc::new(storage)
                }
                Err(err) => {
                    error!(
                        "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                        err
                    );
                    Arc::new(InMemorySessionStorage::new())
                }
            }
        } else {
            info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
            Arc::new(InMemorySessionStorage::new())
        };

    let appointments = Arc::new(InMemoryAppointmentStore::new());
    let leads = Arc::new(InMemoryLeadStore::new());
    let booking = Arc::new(BookingService::new(appointments.clone(), leads));
    let availability = Arc::new(Availability::new(appointments));
    let nlu = Arc::new(RigLanguageService::new());

    let agent = Arc::new(ChatAgent::new(
        session_storage,
        booking.clone(),
        availability,
        nlu,
    ));

    let app_state = AppState { agent, booking };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/chat/message", post(send_message))
        .route("/chat/reset", post(reset_session))
        .route("/appointments", get(list_appointments))
        .route("/appointments/block", post(block_date))
        .route("/appointments/unblock", post(unblock_date))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();

    info!("Server running on http://0.0.0.0:3000");

    axum::serve(listener, app).await.unwrap();
}

async fn health_check() -> &'static str {
    "OK"
}

async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<ChatMessageResponse>, StatusCode> {
    if request.message.is_empty() || request.message.len() > MAX_MESSAGE_LENGTH {
        return Err(StatusCode::BAD_REQUEST);
    }

    let session_id = request
        .session_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    info!(
        session_id = %session_id,
        content_length = %request.message.len(),
        "Processing chat message"
    );

    let reply = match tokio::time::timeout(
        TURN_TIMEOUT,
        state.agent.handle_turn(&session_id, &request.message),
    )
    .await
    {
        Ok(Ok(reply)) => reply,
        Ok(Err(err)) => {
            error!(session_id = %session_id, error = %err, "Failed to process turn");
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
        Err(_) => {
            error!(session_id = %session_id, "Turn processing timed out");
            return Err(StatusCode::GATEWAY_TIMEOUT);
        }
    };

    Ok(Json(ChatMessageResponse {
        session_id,
        response: reply.outbound_text,
        conversation_mode: reply.mode.as_str().to_string(),
    }))
}

async fn reset_session(
    State(state): State<AppState>,
    Json(request): Json<ChatResetRequest>,
) -> Result<Json<ChatResetResponse>, StatusCode> {
    if let Err(err) = state.agent.reset_session(&request.session_id).await {
        error!(session_id = %request.session_id, error = %err, "Failed to reset session");
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(ChatResetResponse {
        session_id: request.session_id,
        message: "Sessão resetada com sucesso. Envie uma mensagem para começar nova conversa."
            .to_string(),
    }))
}

async fn list_appointments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, StatusCode> {
    match state.booking.list_all(None).await {
        Ok(appointments) => Ok(Json(appointments)),
        Err(err) => {
            error!(error = %err, "Failed to list appointments");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn block_date(
    State(state): State<AppState>,
    Json(request): Json<BlockRequest>,
) -> Result<StatusCode, StatusCode> {
    let result = match request.scope {
        BlockScope::FullDay => state.booking.block_full_day(request.date).await,
        BlockScope::Morning => state.booking.block_shift(request.date, Shift::Morning).await,
        BlockScope::Afternoon => {
            state
                .booking
                .block_shift(request.date, Shift::Afternoon)
                .await
        }
    };

    match result {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(err) => {
            error!(date = %request.date, error = %err, "Failed to block date");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

async fn unblock_date(
    State(state): State<AppState>,
    Json(request): Json<UnblockRequest>,
) -> Result<StatusCode, StatusCode> {
    match state.booking.unblock_date(request.date).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(err) => {
            error!(date = %request.date, error = %err, "Failed to unblock date");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
