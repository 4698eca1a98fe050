use crate::dtos::{CreateSubscriptionRequest, SubscriptionCreatedResponse};
use crate::models::Subscription;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;

/// Subscribe a user to a product. Responds with the subscription and its
/// prepaid first bill.
pub async fn create_subscription(
    State(state): State<AppState>,
    Json(payload): Json<CreateSubscriptionRequest>,
) -> Result<(StatusCode, Json<SubscriptionCreatedResponse>), AppError> {
    let (subscription, initial_bill) = state
        .subscriptions
        .create_subscription(payload.user_id, payload.product_id)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(SubscriptionCreatedResponse {
            subscription,
            initial_bill,
        }),
    ))
}

pub async fn get_subscription(
    State(state): State<AppState>,
    Path(subscription_id): Path<Uuid>,
) -> Result<Json<Subscription>, AppError> {
    Ok(Json(
        state.subscriptions.get_subscription(subscription_id).await?,
    ))
}
