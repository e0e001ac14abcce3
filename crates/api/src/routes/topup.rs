//! Top-up creation, payment callback and merchant listing endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use gateway::{Charge, PaymentNotification};
use serde::{Deserialize, Serialize};
use topup::CreateTopup;
use topup_store::{MerchantId, TopupRequestDetail};

use crate::AppState;
use crate::auth::AdminUser;
use crate::error::ApiError;

const CREATED_MESSAGE: &str = "Please complete the payment at the link above using a virtual account from BCA, BRI, or BNI";

// -- Request types --

#[derive(Debug, Deserialize)]
pub struct CreateTopupRequest {
    pub id_merchant: String,
    #[serde(alias = "id_supplier")]
    pub id_supliyer: String,
    pub item_name: String,
    pub amount: i64,
}

// -- Response types --

/// Envelope shared by every top-up response.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    fn new(message: impl Into<String>, data: T) -> Json<Self> {
        Json(Self {
            message: message.into(),
            data,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct CallbackResult {
    pub order_id: String,
    pub outcome: &'static str,
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(inner)| inner)
        .map_err(|e| ApiError::BadRequest(e.body_text()))
}

// -- Handlers --

/// POST /topup — create a pending top-up and return the gateway charge.
#[tracing::instrument(skip(state, payload), fields(user_id = %admin.0.user_id))]
pub async fn create(
    admin: AdminUser,
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateTopupRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ApiResponse<Charge>>), ApiError> {
    let req = body(payload)?;
    let charge = state
        .topup_service
        .create(CreateTopup::new(
            req.id_merchant,
            req.id_supliyer,
            req.item_name,
            req.amount,
        ))
        .await?;

    Ok((StatusCode::CREATED, ApiResponse::new(CREATED_MESSAGE, charge)))
}

/// POST /topup/callback — apply a gateway payment notification.
#[tracing::instrument(skip(state, payload))]
pub async fn callback(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<PaymentNotification>, JsonRejection>,
) -> Result<Json<ApiResponse<CallbackResult>>, ApiError> {
    let notification = body(payload)?;
    let outcome = state.settlement.handle_notification(&notification).await?;

    Ok(ApiResponse::new(
        "Notification processed",
        CallbackResult {
            order_id: notification.order_id,
            outcome: outcome.as_str(),
        },
    ))
}

/// GET /topup/merchant/{id} — list a merchant's top-ups with supplier names.
#[tracing::instrument(skip(state), fields(user_id = %admin.0.user_id))]
pub async fn list_by_merchant(
    admin: AdminUser,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<TopupRequestDetail>>>, ApiError> {
    let merchant_id = MerchantId::new(id);
    if merchant_id.is_blank() {
        return Err(ApiError::BadRequest("merchant id is required".to_string()));
    }

    let topups = state.topup_service.get_by_merchant(&merchant_id).await?;
    Ok(ApiResponse::new("Top-up list", topups))
}
