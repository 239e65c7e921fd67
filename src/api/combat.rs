//! Combat API endpoints
//!
//! Reads are public; every mutation needs a bearer token and is checked
//! by the combat gate.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::error::{ApiError, Caller, JsonBody};
use super::AppState;
use crate::combat::{
    ActionOutcome, ActionRequest, ActionResult, Amount, Combat, Combatant, DamageEntry,
    SavingThrow,
};
use crate::session::StartCombatRequest;

/// Build combat router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/combat/start", post(start_combat))
        .route("/combat/session/{session_id}", get(session_combats))
        .route("/combat/{combat_id}", get(get_combat))
        .route("/combat/{combat_id}/action", post(process_action))
        .route("/combat/{combat_id}/next-turn", post(next_turn))
        .route("/combat/{combat_id}/end", post(end_combat))
        .route(
            "/combat/{combat_id}/combatant/{combatant_id}/save",
            post(saving_throw),
        )
        .route(
            "/combat/{combat_id}/combatant/{combatant_id}/damage",
            post(apply_damage),
        )
        .route(
            "/combat/{combat_id}/combatant/{combatant_id}/heal",
            post(heal),
        )
}

async fn start_combat(
    State(state): State<AppState>,
    Caller(caller): Caller,
    JsonBody(req): JsonBody<StartCombatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let combat = state.combat.start_combat(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(combat)))
}

async fn get_combat(
    State(state): State<AppState>,
    Path(combat_id): Path<String>,
) -> Result<Json<Combat>, ApiError> {
    Ok(Json(state.combat.get_combat(&combat_id).await?))
}

async fn session_combats(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Json<Vec<Combat>> {
    Json(state.combat.session_combats(&session_id).await)
}

async fn process_action(
    State(state): State<AppState>,
    Path(combat_id): Path<String>,
    Caller(caller): Caller,
    JsonBody(req): JsonBody<ActionRequest>,
) -> Result<Json<ActionResult>, ApiError> {
    let outcome = state.combat.process_action(&caller, &combat_id, req).await?;
    Ok(Json(outcome.result))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NextTurnResponse {
    /// Omitted once the combat has ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub combat: Option<Combat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<Combatant>,
    pub ended: bool,
}

async fn next_turn(
    State(state): State<AppState>,
    Path(combat_id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<NextTurnResponse>, ApiError> {
    let advance = state.combat.next_turn(&caller, &combat_id).await?;
    Ok(Json(NextTurnResponse {
        combat: (!advance.ended).then_some(advance.combat),
        current: advance.current,
        ended: advance.ended,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EndCombatResponse {
    pub combat_id: String,
    pub ended: bool,
}

async fn end_combat(
    State(state): State<AppState>,
    Path(combat_id): Path<String>,
    Caller(caller): Caller,
) -> Result<Json<EndCombatResponse>, ApiError> {
    let combat = state.combat.end_combat(&caller, &combat_id).await?;
    Ok(Json(EndCombatResponse {
        combat_id: combat.id,
        ended: true,
    }))
}

async fn saving_throw(
    State(state): State<AppState>,
    Path((combat_id, combatant_id)): Path<(String, String)>,
    Caller(caller): Caller,
    JsonBody(save): JsonBody<SavingThrow>,
) -> Result<Json<ActionResult>, ApiError> {
    let outcome = state
        .combat
        .saving_throw(&caller, &combat_id, &combatant_id, &save)
        .await?;
    Ok(Json(outcome.result))
}

#[derive(Debug, Deserialize)]
pub struct DamageRequest {
    pub damage: Vec<DamageEntry>,
}

#[derive(Debug, Deserialize)]
pub struct HealRequest {
    pub amount: Amount,
}

/// Total applied and the combatant's HP afterwards
#[derive(Debug, Serialize)]
pub struct EffectResponse {
    pub total: i32,
    pub hp: i32,
    pub description: String,
}

impl EffectResponse {
    fn from_outcome(outcome: ActionOutcome, total: Option<i32>) -> Self {
        Self {
            total: total.unwrap_or(0),
            hp: outcome.result.target_hp.unwrap_or(0),
            description: outcome.result.description,
        }
    }
}

async fn apply_damage(
    State(state): State<AppState>,
    Path((combat_id, combatant_id)): Path<(String, String)>,
    Caller(caller): Caller,
    JsonBody(req): JsonBody<DamageRequest>,
) -> Result<Json<EffectResponse>, ApiError> {
    let outcome = state
        .combat
        .apply_damage(&caller, &combat_id, &combatant_id, &req.damage)
        .await?;
    let total = outcome.result.damage;
    Ok(Json(EffectResponse::from_outcome(outcome, total)))
}

async fn heal(
    State(state): State<AppState>,
    Path((combat_id, combatant_id)): Path<(String, String)>,
    Caller(caller): Caller,
    JsonBody(req): JsonBody<HealRequest>,
) -> Result<Json<EffectResponse>, ApiError> {
    let outcome = state
        .combat
        .heal(&caller, &combat_id, &combatant_id, &req.amount)
        .await?;
    let total = outcome.result.healing;
    Ok(Json(EffectResponse::from_outcome(outcome, total)))
}
