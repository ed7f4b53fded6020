use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{require_role, require_staff, CurrentUser};
use crate::error::AppError;
use crate::models::delivery::Delivery;
use crate::models::user::Role;
use crate::notify::{Audience, PushMessage};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/payments/pending-proofs", get(pending_proofs))
        .route("/payments/:id/proof", post(submit_proof))
        .route("/payments/:id/review", put(review_proof))
        .route("/payments/:id/cash", post(confirm_cash))
        .route("/payments/:id/delivery-photo", post(delivery_photo))
}

/// Short human reference for a delivery, FCFA-receipt style.
fn short_ref(id: Uuid) -> String {
    let simple = id.simple().to_string();
    simple[simple.len() - 6..].to_uppercase()
}

fn check_image_size(data: &str, max_bytes: usize) -> Result<(), AppError> {
    if data.is_empty() {
        return Err(AppError::Validation("image required".to_string()));
    }
    if data.len() > max_bytes {
        return Err(AppError::Validation(format!(
            "image too large (max {} bytes encoded)",
            max_bytes
        )));
    }
    Ok(())
}

#[derive(Deserialize)]
pub struct ProofRequest {
    pub proof: String,
}

async fn submit_proof(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ProofRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Client])?;
    check_image_size(&payload.proof, state.config.proof_max_bytes)?;

    let delivery = state.deliveries.submit_proof(id, user.id, payload.proof)?;

    state.notifier.dispatch(
        Audience::ActiveStaff,
        PushMessage {
            title: "Preuve de paiement recue".to_string(),
            body: format!("Livraison #{} — verification requise", short_ref(id)),
            data: json!({ "type": "payment_proof", "delivery_id": id }),
        },
    );

    info!(delivery_id = %id, "payment proof submitted");
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct ReviewRequest {
    pub action: String,
    #[serde(default)]
    pub reason: Option<String>,
}

async fn review_proof(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_staff(&user)?;

    let approve = match payload.action.as_str() {
        "valider" => true,
        "rejeter" => false,
        _ => {
            return Err(AppError::Validation(
                "action must be 'valider' or 'rejeter'".to_string(),
            ))
        }
    };

    let delivery = state
        .deliveries
        .review_proof(id, user.id, approve, payload.reason.clone())?;

    let message = if approve {
        PushMessage {
            title: "Paiement confirme !".to_string(),
            body: "Votre paiement a ete verifie. Un livreur va prendre en charge votre colis."
                .to_string(),
            data: json!({ "type": "payment_verified", "delivery_id": id }),
        }
    } else {
        PushMessage {
            title: "Preuve de paiement rejetee".to_string(),
            body: payload
                .reason
                .unwrap_or_else(|| "La preuve soumise n'est pas valide.".to_string()),
            data: json!({ "type": "payment_rejected", "delivery_id": id }),
        }
    };
    state
        .notifier
        .dispatch(Audience::User(delivery.client), message);

    info!(delivery_id = %id, approve, by = %user.id, "payment proof reviewed");
    Ok(Json(delivery))
}

#[derive(Deserialize, Default)]
pub struct CashRequest {
    #[serde(default)]
    pub photo: Option<String>,
}

async fn confirm_cash(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CashRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Courier])?;
    if let Some(photo) = &payload.photo {
        check_image_size(photo, state.config.proof_max_bytes)?;
    }

    let delivery = state.deliveries.confirm_cash(id, user.id, payload.photo)?;

    state.notifier.dispatch(
        Audience::ActiveAdmins,
        PushMessage {
            title: "Paiement cash confirme".to_string(),
            body: format!("Livraison #{} — cash recu par le livreur", short_ref(id)),
            data: json!({ "type": "cash_confirmed", "delivery_id": id }),
        },
    );

    info!(delivery_id = %id, courier = %user.id, "cash payment confirmed");
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct PhotoRequest {
    pub photo: String,
}

async fn delivery_photo(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<PhotoRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Courier])?;
    check_image_size(&payload.photo, state.config.proof_max_bytes)?;

    let delivery = state
        .deliveries
        .attach_delivery_photo(id, user.id, payload.photo)?;

    info!(delivery_id = %id, "delivery photo attached");
    Ok(Json(delivery))
}

async fn pending_proofs(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Delivery>>, AppError> {
    require_staff(&user)?;
    Ok(Json(state.deliveries.pending_proofs()))
}
