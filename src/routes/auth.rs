use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::auth::{LoginRequest, PatientSetupRequest, RegisterClinicRequest};
use crate::services::auth::AuthService;
use crate::services::metrics::LOGINS_COUNTER;
use crate::AppState;

pub async fn register_clinic(
    State(state): State<AppState>,
    Json(body): Json<RegisterClinicRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (token, admin, clinic) = AuthService::register_clinic(&state.db, &state.config, &body).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "token": token,
            "user": admin,
            "clinic": clinic,
        })),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let result = AuthService::staff_login(&state.db, &state.config, &body.email, &body.password).await;

    let status = if result.is_ok() { "success" } else { "failure" };
    LOGINS_COUNTER.with_label_values(&["staff", status]).inc();

    let (token, user) = result?;
    Ok(Json(json!({ "token": token, "user": user })))
}

pub async fn patient_setup(
    State(state): State<AppState>,
    Json(body): Json<PatientSetupRequest>,
) -> Result<Json<Value>, ApiError> {
    let (token, patient) = AuthService::patient_setup(&state.db, &state.config, &body).await?;
    Ok(Json(json!({ "token": token, "patient": patient })))
}

pub async fn patient_login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let result =
        AuthService::patient_login(&state.db, &state.config, &body.email, &body.password).await;

    let status = if result.is_ok() { "success" } else { "failure" };
    LOGINS_COUNTER.with_label_values(&["patient", status]).inc();

    let (token, patient) = result?;
    Ok(Json(json!({ "token": token, "patient": patient })))
}
