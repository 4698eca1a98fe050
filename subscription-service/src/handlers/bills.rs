use crate::dtos::PaymentSettledResponse;
use crate::models::Bill;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

pub async fn get_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<Bill>, AppError> {
    Ok(Json(state.settlement.get_bill(bill_id).await?))
}

pub async fn list_user_bills(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> Result<Json<Vec<Bill>>, AppError> {
    Ok(Json(state.settlement.bills_for_user(user_id).await?))
}

/// Payment confirmation: settle the bill and reactivate its subscription.
pub async fn pay_bill(
    State(state): State<AppState>,
    Path(bill_id): Path<Uuid>,
) -> Result<Json<PaymentSettledResponse>, AppError> {
    tracing::info!(bill_id = %bill_id, "Settling bill payment");

    let settled = state.settlement.settle_payment(bill_id).await?;

    Ok(Json(PaymentSettledResponse::from(settled)))
}
