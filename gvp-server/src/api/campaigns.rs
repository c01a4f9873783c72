//! Campaign endpoints: creation plus cached read views, leaderboards and
//! recent feeds.

use super::ApiError;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use gvp_core::entities::{Campaign, CampaignStatus};
use gvp_core::events::SubscribeRequest;
use gvp_core::processors::stream_listener::campaign_stream_id;
use gvp_sdk::objects::DonationSummary;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use time::PrimitiveDateTime;
use uuid::Uuid;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaignRequest {
    pub title: String,
    pub target_amount: Decimal,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignView {
    pub id: Uuid,
    pub title: String,
    pub target_amount: Decimal,
    pub current_amount: Decimal,
    pub donor_count: i64,
    pub status: &'static str,
    pub created_at: PrimitiveDateTime,
    pub completed_at: Option<PrimitiveDateTime>,
}

fn to_view(campaign: Campaign) -> CampaignView {
    CampaignView {
        id: campaign.id,
        title: campaign.title,
        target_amount: campaign.target_amount,
        current_amount: campaign.current_amount,
        donor_count: campaign.donor_count,
        status: match campaign.status {
            CampaignStatus::Active => "active",
            CampaignStatus::Completed => "completed",
        },
        created_at: campaign.created_at,
        completed_at: campaign.completed_at,
    }
}

/// `POST /campaigns` — create an active campaign and subscribe the stream
/// listener to its donation stream.
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if request.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }
    if request.target_amount <= Decimal::ZERO {
        return Err(ApiError::Validation(
            "targetAmount must be positive".into(),
        ));
    }

    let campaign = Campaign::create(&state.db, request.title.trim(), request.target_amount)
        .await
        .map_err(ApiError::internal)?;

    tracing::info!(
        campaign_id = %campaign.id,
        target_amount = %campaign.target_amount,
        "Campaign created"
    );

    let subscribe = SubscribeRequest {
        stream_id: campaign_stream_id(campaign.id),
    };
    if state.subscribe_tx.send(subscribe).await.is_err() {
        // The listener picks the stream up from the DB on its next
        // reconnect, so creation still succeeds.
        tracing::warn!(campaign_id = %campaign.id, "Stream listener unavailable for subscribe");
    }

    Ok((StatusCode::CREATED, Json(to_view(campaign))))
}

/// `GET /campaigns/{id}` — campaign view, served from the cache when warm.
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    match state.cache.get_campaign_view(id).await {
        Ok(Some(cached)) => {
            return Ok((
                [(header::CONTENT_TYPE, "application/json")],
                cached,
            )
                .into_response());
        }
        Ok(None) => {}
        Err(e) => tracing::warn!(error = %e, "Campaign view cache read failed"),
    }

    let campaign = Campaign::get(&state.db, id)
        .await
        .map_err(ApiError::internal)?
        .ok_or(ApiError::NotFound("campaign"))?;

    let view = to_view(campaign);
    match serde_json::to_string(&view) {
        Ok(json) => {
            if let Err(e) = state
                .cache
                .set_campaign_view(id, &json, state.campaign_ttl_secs)
                .await
            {
                tracing::warn!(error = %e, "Campaign view cache write failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "Campaign view serialization failed"),
    }

    Ok(Json(view).into_response())
}

#[derive(Deserialize)]
pub struct LeaderboardQuery {
    #[serde(default = "default_top")]
    pub top: isize,
}

fn default_top() -> isize {
    10
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub address: String,
    pub score: f64,
}

/// `GET /campaigns/{id}/leaderboard` — top donors for one campaign.
pub async fn campaign_leaderboard(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    leaderboard(&state, Some(id), query.top).await
}

/// `GET /leaderboard` — top donors across all campaigns.
pub async fn global_leaderboard(
    State(state): State<AppState>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    leaderboard(&state, None, query.top).await
}

async fn leaderboard(
    state: &AppState,
    campaign_id: Option<Uuid>,
    top: isize,
) -> Result<Json<Vec<LeaderboardEntry>>, ApiError> {
    let entries = state
        .cache
        .leaderboard(campaign_id, top.clamp(1, 100))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(
        entries
            .into_iter()
            .map(|(address, score)| LeaderboardEntry { address, score })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct FeedQuery {
    #[serde(default = "default_feed_count")]
    pub count: i64,
}

fn default_feed_count() -> i64 {
    20
}

/// `GET /campaigns/{id}/feed` — recent donations for one campaign.
pub async fn campaign_feed(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    feed(&state, Some(id), query.count).await
}

/// `GET /feed` — recent donations across all campaigns.
pub async fn global_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<impl IntoResponse, ApiError> {
    feed(&state, None, query.count).await
}

async fn feed(
    state: &AppState,
    campaign_id: Option<Uuid>,
    count: i64,
) -> Result<Json<Vec<DonationSummary>>, ApiError> {
    let entries = state
        .cache
        .recent_feed(campaign_id, count.clamp(1, 100))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(entries))
}
