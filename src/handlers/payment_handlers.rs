use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use axum::{
    Json,
    extract::{Multipart, Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::AppState;
use crate::models::payment_models::FormView;
use crate::models::plan_models::{Plan, PlanId, PLANS};
use crate::payment::form::{self, lock_form, FormError, PaymentForm};
use crate::utils::data_uri::UploadedImage;

const SCREENSHOT_FIELD: &str = "screenshot";

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({"error": message.into()})))
}

/// One hosted payment form and the flag its completion callback raises.
pub struct FormSession {
    pub form: Mutex<PaymentForm>,
    pub completed: Arc<AtomicBool>,
    last_seen: Mutex<Instant>,
}

impl FormSession {
    pub fn new(id: Uuid) -> Self {
        let completed = Arc::new(AtomicBool::new(false));
        let flag = completed.clone();
        let form = PaymentForm::new(move || {
            flag.store(true, Ordering::SeqCst);
            tracing::info!(form_id = %id, "Payment confirmed, handing over to account activation");
        });
        Self {
            form: Mutex::new(form),
            completed,
            last_seen: Mutex::new(Instant::now()),
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        let last_seen = *self.last_seen.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        now.saturating_duration_since(last_seen)
    }

    pub fn view(&self) -> FormView {
        lock_form(&self.form).view()
    }
}

#[derive(Serialize)]
pub struct FormResponse {
    pub id: Uuid,
    pub view: FormView,
    pub completed: bool,
}

#[derive(Deserialize)]
pub struct SelectPlanRequest {
    pub plan: String,
}

#[derive(Deserialize)]
pub struct TransactionCodeRequest {
    pub transaction_code: String,
}

fn find_session(state: &AppState, id: Uuid) -> Result<Arc<FormSession>, ApiError> {
    state
        .forms
        .get(&id)
        .map(|entry| {
            let session = entry.value().clone();
            session.touch();
            session
        })
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "Payment form not found"))
}

fn gate_error(e: FormError) -> ApiError {
    match e {
        FormError::AlreadyVerifying | FormError::AlreadyVerified => {
            api_error(StatusCode::CONFLICT, e.to_string())
        }
        FormError::CodeTooShort | FormError::MissingScreenshot => {
            api_error(StatusCode::UNPROCESSABLE_ENTITY, e.to_string())
        }
    }
}

fn form_response(id: Uuid, session: &FormSession) -> FormResponse {
    FormResponse {
        id,
        view: session.view(),
        completed: session.completed.load(Ordering::SeqCst),
    }
}

pub async fn list_plans() -> Json<Vec<Plan>> {
    Json(PLANS.to_vec())
}

pub async fn create_form(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<FormResponse>), ApiError> {
    if state.forms.len() >= state.config.max_form_sessions {
        tracing::warn!(live = state.forms.len(), "Payment form limit reached");
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "Too many open payment forms, try again later",
        ));
    }
    let id = Uuid::new_v4();
    let session = Arc::new(FormSession::new(id));
    let response = form_response(id, &session);
    state.forms.insert(id, session);
    tracing::debug!(form_id = %id, "Created payment form");
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn get_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FormResponse>, ApiError> {
    let session = find_session(&state, id)?;
    Ok(Json(form_response(id, &session)))
}

pub async fn delete_form(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.forms.remove(&id) {
        Some(_) => {
            tracing::debug!(form_id = %id, "Discarded payment form");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(api_error(StatusCode::NOT_FOUND, "Payment form not found")),
    }
}

pub async fn select_plan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<SelectPlanRequest>,
) -> Result<Json<FormView>, ApiError> {
    let plan = request
        .plan
        .parse::<PlanId>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e.to_string()))?;
    let session = find_session(&state, id)?;
    let mut form = lock_form(&session.form);
    form.select_plan(plan);
    Ok(Json(form.view()))
}

pub async fn update_transaction_code(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(request): Json<TransactionCodeRequest>,
) -> Result<Json<FormView>, ApiError> {
    let session = find_session(&state, id)?;
    let mut form = lock_form(&session.form);
    form.set_transaction_code(&request.transaction_code);
    Ok(Json(form.view()))
}

pub async fn upload_screenshot(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    mut multipart: Multipart,
) -> Result<Json<FormView>, ApiError> {
    let session = find_session(&state, id)?;

    let mut image = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some(SCREENSHOT_FIELD) {
            continue;
        }
        let content_type = field.content_type().map(str::to_string);
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, format!("Failed to read screenshot: {}", e)))?;
        tracing::debug!(form_id = %id, size = bytes.len(), content_type = ?content_type, "Received screenshot");
        let encoded = UploadedImage::encode(bytes.to_vec(), content_type, file_name)
            .await
            .map_err(|e| {
                tracing::error!("Failed to encode screenshot: {}", e);
                api_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to process screenshot")
            })?;
        image = Some(encoded);
        break;
    }

    let image = image.ok_or_else(|| {
        api_error(StatusCode::BAD_REQUEST, format!("Missing '{}' file field", SCREENSHOT_FIELD))
    })?;

    let mut form = lock_form(&session.form);
    form.upload_screenshot(image);
    Ok(Json(form.view()))
}

pub async fn verify_payment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<FormView>, ApiError> {
    let session = find_session(&state, id)?;

    // Closed gates are answered without spending an attempt.
    let gate = lock_form(&session.form).check_submit();
    gate.map_err(gate_error)?;

    if state.verify_limiter.check_key(&id).is_err() {
        tracing::warn!(form_id = %id, "Verification rate limit exceeded");
        return Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "Too many verification attempts, try again later",
        ));
    }

    // Spawned so a client hanging up cannot leave the form stuck verifying.
    let task_session = session.clone();
    let verifier = state.verifier.clone();
    let attempt = tokio::spawn(async move {
        form::submit(&task_session.form, verifier.as_ref()).await
    });

    match attempt.await {
        Ok(Ok(_)) => Ok(Json(session.view())),
        Ok(Err(e)) => Err(gate_error(e)),
        Err(e) => {
            tracing::error!(form_id = %id, "Verification task failed: {}", e);
            lock_form(&session.form).abort_verification();
            Err(api_error(StatusCode::INTERNAL_SERVER_ERROR, "Verification failed"))
        }
    }
}
