//! Donation and donor read endpoints.

use super::ApiError;
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use gvp_core::entities::{Donation, DonationStatus, DonorAggregate};
use rust_decimal::Decimal;
use serde::Serialize;
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonationResponse {
    pub tx_hash: String,
    pub campaign_id: Uuid,
    /// Masked when the donor asked to stay anonymous.
    pub donor_address: Option<String>,
    pub amount: Decimal,
    pub message: Option<String>,
    pub status: &'static str,
    pub block_number: Option<i64>,
    pub announced_at: Option<PrimitiveDateTime>,
    pub settled_at: Option<PrimitiveDateTime>,
}

fn to_response(donation: Donation) -> DonationResponse {
    DonationResponse {
        donor_address: (!donation.is_anonymous).then(|| donation.donor_address.clone()),
        tx_hash: donation.tx_hash,
        campaign_id: donation.campaign_id,
        amount: donation.amount,
        message: donation.message,
        status: match donation.status {
            DonationStatus::Pending => "pending",
            DonationStatus::Confirmed => "confirmed",
            DonationStatus::Failed => "failed",
            DonationStatus::Orphaned => "orphaned",
        },
        block_number: donation.block_number,
        announced_at: donation.announced_at,
        settled_at: donation.settled_at,
    }
}

/// `GET /donations/{tx_hash}` — one donation by its transaction hash.
pub async fn get_donation(
    State(state): State<AppState>,
    Path(tx_hash): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let donation = Donation::get_by_tx_hash(&state.db, &tx_hash)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound("donation"))?;
    Ok(Json(to_response(donation)))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DonorResponse {
    pub address: String,
    pub total_donated: Decimal,
    pub donation_count: i64,
    pub first_donation_at: PrimitiveDateTime,
    pub last_donation_at: PrimitiveDateTime,
}

/// `GET /donors/{address}` — lifetime aggregate for one donor address.
pub async fn get_donor(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let aggregate = DonorAggregate::get(&state.db, &address)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound("donor"))?;
    Ok(Json(DonorResponse {
        address: aggregate.address,
        total_donated: aggregate.total_donated,
        donation_count: aggregate.donation_count,
        first_donation_at: aggregate.first_donation_at,
        last_donation_at: aggregate.last_donation_at,
    }))
}
