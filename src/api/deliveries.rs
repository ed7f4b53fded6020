use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::auth::{require_role, require_staff, CurrentUser};
use crate::error::AppError;
use crate::models::delivery::{
    Delivery, DeliveryStatus, PackageCategory, PaymentMethod, PaymentStatus, Zone,
};
use crate::models::user::{GeoPoint, Role, User};
use crate::notify::{Audience, PushMessage};
use crate::pricing::PriceQuote;
use crate::state::AppState;
use crate::store::deliveries::DeliveryPatch;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deliveries", post(create_delivery).get(list_deliveries))
        .route("/deliveries/available", get(available_deliveries))
        .route("/deliveries/stats", get(stats))
        .route("/deliveries/mine", get(my_deliveries))
        .route("/deliveries/history", get(courier_history))
        .route("/deliveries/active", get(active_delivery))
        .route(
            "/deliveries/:id",
            get(get_delivery).patch(edit_delivery).delete(cancel_delivery),
        )
        .route("/deliveries/:id/claim", post(claim_delivery))
        .route("/deliveries/:id/assign", post(assign_courier))
        .route("/deliveries/:id/status", put(update_status))
        .route("/couriers", get(list_couriers))
        .route("/pricing/quote", get(price_quote))
}

#[derive(Deserialize)]
pub struct CreateDeliveryRequest {
    pub pickup_address: String,
    pub dropoff_address: String,
    #[serde(default)]
    pub pickup: Option<GeoPoint>,
    #[serde(default)]
    pub dropoff: Option<GeoPoint>,
    #[serde(default)]
    pub description: Option<String>,
    pub category: PackageCategory,
    pub zone: Zone,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    /// Staff-only override, required for quote-priced categories.
    #[serde(default)]
    pub price: Option<u64>,
    /// Staff creating on behalf of a client.
    #[serde(default)]
    pub client_id: Option<Uuid>,
}

async fn create_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Json(payload): Json<CreateDeliveryRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Client, Role::Dispatcher, Role::Admin])?;

    if payload.pickup_address.trim().is_empty() || payload.dropoff_address.trim().is_empty() {
        return Err(AppError::Validation(
            "pickup and dropoff addresses are required".to_string(),
        ));
    }

    let client = match payload.client_id {
        Some(client_id) if user.role.is_staff() => {
            let target = state
                .users
                .find(client_id)
                .ok_or_else(|| AppError::NotFound("client not found".to_string()))?;
            target.id
        }
        _ => user.id,
    };

    let (base_price, zone_surcharge, price) =
        match state.pricing.quote(payload.category, payload.zone) {
            PriceQuote::Fixed {
                base_price,
                zone_surcharge,
                total,
            } => {
                // Staff may override the tariff total; client-supplied
                // prices are ignored.
                let total = payload
                    .price
                    .filter(|_| user.role.is_staff())
                    .unwrap_or(total);
                (base_price, zone_surcharge, total)
            }
            PriceQuote::QuoteRequired => {
                let supplied = payload
                    .price
                    .filter(|_| user.role.is_staff())
                    .ok_or_else(|| {
                        AppError::Validation(
                            "this category is priced on quote; staff must set the price"
                                .to_string(),
                        )
                    })?;
                (supplied, 0, supplied)
            }
        };

    let now = Utc::now();
    let delivery = Delivery {
        id: Uuid::new_v4(),
        client,
        courier: None,
        pickup_address: payload.pickup_address,
        dropoff_address: payload.dropoff_address,
        pickup: payload.pickup.unwrap_or_default(),
        dropoff: payload.dropoff.unwrap_or_default(),
        description: payload.description.unwrap_or_default(),
        category: payload.category,
        zone: payload.zone,
        status: DeliveryStatus::Pending,
        base_price,
        zone_surcharge,
        price,
        payment_method: payload.payment_method.unwrap_or(PaymentMethod::Cash),
        payment_status: PaymentStatus::NotRequired,
        payment_proof: None,
        delivery_photo: None,
        courier_position: GeoPoint::default(),
        watchdog_alerted: false,
        created_at: now,
        updated_at: now,
    };

    // Persist first; notification failures never roll back the record.
    state.deliveries.insert(delivery.clone());
    state.metrics.deliveries_created_total.inc();

    state.notifier.dispatch(
        Audience::AllActiveCouriers,
        PushMessage {
            title: "Nouvelle mission disponible !".to_string(),
            body: format!(
                "{} -> {} — {} FCFA",
                delivery.pickup_address, delivery.dropoff_address, delivery.price
            ),
            data: json!({ "type": "new_delivery", "delivery_id": delivery.id }),
        },
    );

    info!(delivery_id = %delivery.id, client = %client, "delivery created");
    Ok(Json(delivery))
}

async fn claim_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Courier])?;

    let delivery = match state.deliveries.claim(id, user.id) {
        Ok(delivery) => delivery,
        Err(err) => {
            state.metrics.claims_total.with_label_values(&["lost"]).inc();
            return Err(err);
        }
    };
    state.metrics.claims_total.with_label_values(&["won"]).inc();

    state.notifier.dispatch(
        Audience::User(delivery.client),
        PushMessage {
            title: "Livreur assigne !".to_string(),
            body: format!("{} prend en charge votre livraison", user.name),
            data: json!({ "type": "courier_assigned", "delivery_id": delivery.id }),
        },
    );

    info!(delivery_id = %delivery.id, courier = %user.id, "delivery claimed");
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub courier_id: Uuid,
}

async fn assign_courier(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_staff(&user)?;

    let courier = state
        .users
        .find(payload.courier_id)
        .filter(|target| target.role == Role::Courier)
        .ok_or_else(|| AppError::NotFound("courier not found".to_string()))?;

    let delivery = state.deliveries.assign(id, courier.id)?;

    // Exactly the two parties, never a broadcast.
    state.notifier.dispatch(
        Audience::User(delivery.client),
        PushMessage {
            title: "Livreur assigne !".to_string(),
            body: format!("{} prend en charge votre livraison", courier.name),
            data: json!({ "type": "courier_assigned", "delivery_id": delivery.id }),
        },
    );
    state.notifier.dispatch(
        Audience::User(courier.id),
        PushMessage {
            title: "Mission assignee !".to_string(),
            body: format!(
                "Nouvelle mission : {} -> {}",
                delivery.pickup_address, delivery.dropoff_address
            ),
            data: json!({ "type": "mission_assigned", "delivery_id": delivery.id }),
        },
    );

    info!(delivery_id = %delivery.id, courier = %courier.id, by = %user.id, "courier assigned");
    Ok(Json(delivery))
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: DeliveryStatus,
}

/// Client-facing message for each courier-reachable status.
pub fn status_message(status: DeliveryStatus) -> Option<(&'static str, &'static str)> {
    match status {
        DeliveryStatus::InTransit => Some((
            "Livraison en cours !",
            "Votre livreur est en route vers vous",
        )),
        DeliveryStatus::Delivered => Some((
            "Colis livre !",
            "Votre colis a ete livre avec succes. Merci !",
        )),
        DeliveryStatus::Cancelled => {
            Some(("Livraison annulee", "Votre livraison a ete annulee"))
        }
        _ => None,
    }
}

async fn update_status(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Courier])?;

    let delivery = state.deliveries.transition(id, user.id, payload.status)?;

    if let Some((title, body)) = status_message(delivery.status) {
        state.notifier.dispatch(
            Audience::User(delivery.client),
            PushMessage {
                title: title.to_string(),
                body: body.to_string(),
                data: json!({
                    "type": "status_changed",
                    "status": delivery.status,
                    "delivery_id": delivery.id,
                }),
            },
        );
    }

    info!(delivery_id = %delivery.id, status = %delivery.status, "status updated");
    Ok(Json(delivery))
}

async fn edit_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
    Json(patch): Json<DeliveryPatch>,
) -> Result<Json<Delivery>, AppError> {
    require_staff(&user)?;
    let delivery = state.deliveries.edit(id, patch)?;
    Ok(Json(delivery))
}

async fn cancel_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, AppError> {
    let delivery = state
        .deliveries
        .get(id)
        .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

    let authorized = delivery.client == user.id || user.role.is_staff();
    if !authorized {
        return Err(AppError::Forbidden("not your delivery".to_string()));
    }

    let delivery = state.deliveries.cancel(id)?;

    // Staff cancelling on the client's behalf tells the client; a client
    // cancelling their own delivery tells no one.
    if user.role.is_staff() {
        state.notifier.dispatch(
            Audience::User(delivery.client),
            PushMessage {
                title: "Livraison annulee".to_string(),
                body: format!(
                    "Votre livraison de {} vers {} a ete annulee.",
                    delivery.pickup_address, delivery.dropoff_address
                ),
                data: json!({
                    "type": "status_changed",
                    "status": DeliveryStatus::Cancelled,
                    "delivery_id": delivery.id,
                }),
            },
        );
    }

    info!(delivery_id = %delivery.id, by = %user.id, "delivery cancelled");
    Ok(Json(json!({ "cancelled": true })))
}

async fn get_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<Delivery>, AppError> {
    let delivery = state
        .deliveries
        .get(id)
        .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

    let involved = delivery.client == user.id
        || delivery.courier == Some(user.id)
        || user.role.is_staff();
    if !involved {
        return Err(AppError::Forbidden("access denied".to_string()));
    }

    Ok(Json(delivery))
}

async fn available_deliveries(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Delivery>>, AppError> {
    require_role(&user, &[Role::Courier, Role::Admin])?;
    Ok(Json(state.deliveries.available()))
}

#[derive(Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub status: Option<DeliveryStatus>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
}

async fn list_deliveries(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<ListFilter>,
) -> Result<Json<Vec<Delivery>>, AppError> {
    require_staff(&user)?;
    Ok(Json(state.deliveries.list(filter.status, filter.date)))
}

async fn stats(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(filter): Query<ListFilter>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_staff(&user)?;
    let stats = state.deliveries.stats(filter.date);
    let active_couriers = state.users.count_active_couriers();
    Ok(Json(json!({
        "stats": stats,
        "active_couriers": active_couriers,
        "date_filter": filter.date,
    })))
}

async fn my_deliveries(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Delivery>>, AppError> {
    require_role(&user, &[Role::Client])?;
    Ok(Json(state.deliveries.by_client(user.id)))
}

async fn courier_history(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<Delivery>>, AppError> {
    require_role(&user, &[Role::Courier])?;
    Ok(Json(state.deliveries.by_courier(user.id)))
}

async fn active_delivery(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Delivery>, AppError> {
    require_role(&user, &[Role::Courier])?;
    state
        .deliveries
        .active_for(user.id)
        .map(Json)
        .ok_or_else(|| AppError::NotFound("no active delivery".to_string()))
}

#[derive(Serialize)]
struct CourierView {
    #[serde(flatten)]
    user: User,
    available: bool,
}

async fn list_couriers(
    State(state): State<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> Result<Json<Vec<CourierView>>, AppError> {
    require_staff(&user)?;

    let busy = state.deliveries.busy_couriers();
    let couriers = state
        .users
        .couriers()
        .into_iter()
        .map(|courier| {
            let available = courier.active && !busy.contains(&courier.id);
            CourierView {
                user: courier,
                available,
            }
        })
        .collect();

    Ok(Json(couriers))
}

#[derive(Deserialize)]
pub struct QuoteQuery {
    pub category: PackageCategory,
    pub zone: Zone,
}

async fn price_quote(
    State(state): State<Arc<AppState>>,
    CurrentUser(_user): CurrentUser,
    Query(query): Query<QuoteQuery>,
) -> Json<PriceQuote> {
    Json(state.pricing.quote(query.category, query.zone))
}
