use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::DeliveryStatus;
use crate::models::user::{GeoPoint, User};
use crate::state::AppState;

/// Events a connected client may send.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientEvent {
    JoinDeliveryRoom { id: Uuid },
    PositionUpdate { id: Uuid, lat: f64, lng: f64 },
    StatusChange { id: Uuid, status: DeliveryStatus },
}

/// Events the server pushes into a room or back to a single connection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerEvent {
    Joined {
        id: Uuid,
        message: String,
    },
    Error {
        message: String,
    },
    PositionUpdated {
        id: Uuid,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    },
    StatusUpdated {
        id: Uuid,
        status: DeliveryStatus,
        timestamp: DateTime<Utc>,
    },
}

/// A room broadcast stamped with the originating connection, so position
/// echoes can be filtered out on the sender's own socket.
#[derive(Debug, Clone)]
pub struct RoomEvent {
    pub origin: Uuid,
    pub event: ServerEvent,
}

#[derive(Deserialize)]
pub struct WsAuth {
    pub token: String,
}

/// Connection-level auth happens here, before the upgrade: an unknown or
/// suspended credential refuses the connection outright.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(auth): Query<WsAuth>,
) -> Result<Response, AppError> {
    let user = state
        .users
        .find_by_token(&auth.token)
        .filter(|user| user.active)
        .ok_or_else(|| AppError::Unauthorized("invalid token".to_string()))?;

    Ok(ws
        .on_upgrade(move |socket| handle_socket(socket, state, user))
        .into_response())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: User) {
    let conn_id = Uuid::new_v4();
    let (mut sink, mut stream) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<ServerEvent>(64);

    state.metrics.realtime_connections.inc();
    info!(user_id = %user.id, conn_id = %conn_id, "realtime client connected");

    let writer = tokio::spawn(async move {
        while let Some(event) = out_rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize ws event");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // The delivery room this connection has joined, plus the task forwarding
    // that room's broadcasts onto this socket.
    let mut joined: Option<(Uuid, JoinHandle<()>)> = None;

    while let Some(Ok(message)) = stream.next().await {
        let text = match message {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        let event = match serde_json::from_str::<ClientEvent>(&text) {
            Ok(event) => event,
            Err(err) => {
                let _ = out_tx
                    .send(ServerEvent::Error {
                        message: format!("unrecognized event: {err}"),
                    })
                    .await;
                continue;
            }
        };

        match event {
            ClientEvent::JoinDeliveryRoom { id } => {
                match authorize_join(&state, &user, id) {
                    Ok(()) => {
                        if let Some((_, forwarder)) = joined.take() {
                            forwarder.abort();
                        }
                        let forwarder =
                            spawn_room_forwarder(&state, id, conn_id, out_tx.clone());
                        joined = Some((id, forwarder));

                        debug!(user_id = %user.id, delivery_id = %id, "joined delivery room");
                        let _ = out_tx
                            .send(ServerEvent::Joined {
                                id,
                                message: "connected to delivery".to_string(),
                            })
                            .await;
                    }
                    Err(err) => {
                        let _ = out_tx
                            .send(ServerEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
            }
            ClientEvent::PositionUpdate { id, lat, lng } => {
                if let Err(err) = handle_position(&state, &user, conn_id, id, lat, lng) {
                    let _ = out_tx
                        .send(ServerEvent::Error {
                            message: err.to_string(),
                        })
                        .await;
                }
            }
            ClientEvent::StatusChange { id, status } => {
                match state.deliveries.transition(id, user.id, status) {
                    Ok(delivery) => {
                        // Everyone in the room converges on the authoritative
                        // status, the sender included.
                        let _ = state.room(id).send(RoomEvent {
                            origin: conn_id,
                            event: ServerEvent::StatusUpdated {
                                id,
                                status: delivery.status,
                                timestamp: Utc::now(),
                            },
                        });
                        debug!(delivery_id = %id, status = %delivery.status, "status via realtime");
                    }
                    Err(err) => {
                        let _ = out_tx
                            .send(ServerEvent::Error {
                                message: err.to_string(),
                            })
                            .await;
                    }
                }
            }
        }
    }

    if let Some((_, forwarder)) = joined.take() {
        forwarder.abort();
    }
    writer.abort();
    state.metrics.realtime_connections.dec();
    info!(user_id = %user.id, conn_id = %conn_id, "realtime client disconnected");
}

/// Only the delivery's client or courier may join its room; everyone else
/// gets an explicit error event rather than a silent drop.
fn authorize_join(state: &AppState, user: &User, delivery_id: Uuid) -> Result<(), AppError> {
    let delivery = state
        .deliveries
        .get(delivery_id)
        .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

    let involved = delivery.client == user.id || delivery.courier == Some(user.id);
    if !involved {
        return Err(AppError::Forbidden("access denied".to_string()));
    }
    Ok(())
}

/// Position updates are courier-originated: persisted to the live-position
/// field, then rebroadcast to everyone in the room except the sender.
fn handle_position(
    state: &AppState,
    user: &User,
    conn_id: Uuid,
    delivery_id: Uuid,
    lat: f64,
    lng: f64,
) -> Result<(), AppError> {
    let delivery = state
        .deliveries
        .get(delivery_id)
        .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

    if delivery.courier != Some(user.id) {
        return Err(AppError::Forbidden(
            "only the courier reports positions".to_string(),
        ));
    }

    state
        .deliveries
        .set_position(delivery_id, GeoPoint { lat, lng })?;

    let _ = state.room(delivery_id).send(RoomEvent {
        origin: conn_id,
        event: ServerEvent::PositionUpdated {
            id: delivery_id,
            lat,
            lng,
            timestamp: Utc::now(),
        },
    });
    Ok(())
}

fn spawn_room_forwarder(
    state: &AppState,
    delivery_id: Uuid,
    conn_id: Uuid,
    out_tx: mpsc::Sender<ServerEvent>,
) -> JoinHandle<()> {
    let mut rx = state.room(delivery_id).subscribe();
    tokio::spawn(async move {
        while let Ok(room_event) = rx.recv().await {
            // The courier does not need its own position echoed back.
            let own_position = room_event.origin == conn_id
                && matches!(room_event.event, ServerEvent::PositionUpdated { .. });
            if own_position {
                continue;
            }
            if out_tx.send(room_event.event).await.is_err() {
                break;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use uuid::Uuid;

    use super::{
        authorize_join, handle_position, spawn_room_forwarder, ClientEvent, RoomEvent, ServerEvent,
    };
    use crate::config::Config;
    use crate::error::AppError;
    use crate::models::delivery::{
        Delivery, DeliveryStatus, PackageCategory, PaymentMethod, PaymentStatus, Zone,
    };
    use crate::models::user::{GeoPoint, Role, User};
    use crate::notify::RecordingSink;
    use crate::state::AppState;

    fn test_config() -> Config {
        Config {
            http_port: 0,
            log_level: "info".to_string(),
            event_buffer_size: 16,
            watchdog_interval: Duration::from_secs(300),
            watchdog_threshold: Duration::from_secs(1800),
            proof_max_bytes: 7_000_000,
        }
    }

    fn test_state() -> Arc<AppState> {
        Arc::new(AppState::new(test_config(), Arc::new(RecordingSink::new())))
    }

    fn room_delivery(client: Uuid, courier: Option<Uuid>) -> Delivery {
        let now = Utc::now();
        Delivery {
            id: Uuid::new_v4(),
            client,
            courier,
            pickup_address: "a".to_string(),
            dropoff_address: "b".to_string(),
            pickup: GeoPoint::default(),
            dropoff: GeoPoint::default(),
            description: String::new(),
            category: PackageCategory::Leger,
            zone: Zone::Zone1,
            status: if courier.is_some() {
                DeliveryStatus::Claimed
            } else {
                DeliveryStatus::Pending
            },
            base_price: 1000,
            zone_surcharge: 0,
            price: 1000,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::NotRequired,
            payment_proof: None,
            delivery_photo: None,
            courier_position: GeoPoint::default(),
            watchdog_alerted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn registered(state: &AppState, name: &str, role: Role) -> User {
        let (user, _) = state.users.register(name.into(), "7".into(), role);
        user
    }

    #[test]
    fn only_the_deliverys_parties_may_join_its_room() {
        let state = test_state();
        let client = registered(&state, "Awa", Role::Client);
        let courier = registered(&state, "Moussa", Role::Courier);
        let outsider = registered(&state, "Issa", Role::Client);

        let delivery = room_delivery(client.id, Some(courier.id));
        let id = delivery.id;
        state.deliveries.insert(delivery);

        assert!(authorize_join(&state, &client, id).is_ok());
        assert!(authorize_join(&state, &courier, id).is_ok());

        match authorize_join(&state, &outsider, id) {
            Err(AppError::Forbidden(_)) => {}
            other => panic!("outsider join: {other:?}"),
        }
        match authorize_join(&state, &client, Uuid::new_v4()) {
            Err(AppError::NotFound(_)) => {}
            other => panic!("unknown delivery join: {other:?}"),
        }
    }

    #[tokio::test]
    async fn only_the_courier_reports_positions() {
        let state = test_state();
        let client = registered(&state, "Awa", Role::Client);
        let courier = registered(&state, "Moussa", Role::Courier);

        let delivery = room_delivery(client.id, Some(courier.id));
        let id = delivery.id;
        state.deliveries.insert(delivery);

        let result = handle_position(&state, &client, Uuid::new_v4(), id, 11.17, -4.29);
        assert!(matches!(result, Err(AppError::Forbidden(_))));
        let untouched = state.deliveries.get(id).unwrap();
        assert_eq!(untouched.courier_position, GeoPoint::default());

        handle_position(&state, &courier, Uuid::new_v4(), id, 11.17, -4.29).unwrap();
        let updated = state.deliveries.get(id).unwrap();
        assert_eq!(updated.courier_position, GeoPoint { lat: 11.17, lng: -4.29 });
    }

    #[tokio::test]
    async fn position_broadcast_skips_the_sender_but_reaches_the_room() {
        let state = test_state();
        let client = registered(&state, "Awa", Role::Client);
        let courier = registered(&state, "Moussa", Role::Courier);

        let delivery = room_delivery(client.id, Some(courier.id));
        let id = delivery.id;
        state.deliveries.insert(delivery);

        let courier_conn = Uuid::new_v4();
        let client_conn = Uuid::new_v4();
        let (courier_tx, mut courier_rx) = mpsc::channel::<ServerEvent>(8);
        let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(8);
        let _a = spawn_room_forwarder(&state, id, courier_conn, courier_tx);
        let _b = spawn_room_forwarder(&state, id, client_conn, client_tx);

        handle_position(&state, &courier, courier_conn, id, 11.17, -4.29).unwrap();

        let received = timeout(Duration::from_millis(200), client_rx.recv())
            .await
            .expect("client connection should receive the position")
            .unwrap();
        match received {
            ServerEvent::PositionUpdated { id: got, lat, lng, .. } => {
                assert_eq!(got, id);
                assert_eq!(lat, 11.17);
                assert_eq!(lng, -4.29);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The courier's own socket gets no echo.
        assert!(
            timeout(Duration::from_millis(100), courier_rx.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn status_broadcast_reaches_the_sender_too() {
        let state = test_state();
        let client = registered(&state, "Awa", Role::Client);
        let courier = registered(&state, "Moussa", Role::Courier);

        let delivery = room_delivery(client.id, Some(courier.id));
        let id = delivery.id;
        state.deliveries.insert(delivery);

        let courier_conn = Uuid::new_v4();
        let client_conn = Uuid::new_v4();
        let (courier_tx, mut courier_rx) = mpsc::channel::<ServerEvent>(8);
        let (client_tx, mut client_rx) = mpsc::channel::<ServerEvent>(8);
        let _a = spawn_room_forwarder(&state, id, courier_conn, courier_tx);
        let _b = spawn_room_forwarder(&state, id, client_conn, client_tx);

        // Realtime status changes go through the same transition table as
        // the REST path.
        let transitioned = state
            .deliveries
            .transition(id, courier.id, DeliveryStatus::InTransit)
            .unwrap();
        assert_eq!(transitioned.status, DeliveryStatus::InTransit);

        state
            .room(id)
            .send(RoomEvent {
                origin: courier_conn,
                event: ServerEvent::StatusUpdated {
                    id,
                    status: transitioned.status,
                    timestamp: Utc::now(),
                },
            })
            .unwrap();

        for rx in [&mut courier_rx, &mut client_rx] {
            let received = timeout(Duration::from_millis(200), rx.recv())
                .await
                .expect("every room member should see the status")
                .unwrap();
            assert!(matches!(
                received,
                ServerEvent::StatusUpdated {
                    status: DeliveryStatus::InTransit,
                    ..
                }
            ));
        }
    }

    #[tokio::test]
    async fn illegal_realtime_status_change_is_rejected() {
        let state = test_state();
        let client = registered(&state, "Awa", Role::Client);
        let courier = registered(&state, "Moussa", Role::Courier);

        let delivery = room_delivery(client.id, Some(courier.id));
        let id = delivery.id;
        state.deliveries.insert(delivery);

        let result = state
            .deliveries
            .transition(id, courier.id, DeliveryStatus::Delivered);
        assert!(matches!(result, Err(AppError::InvalidTransition { .. })));
        assert_eq!(state.deliveries.get(id).unwrap().status, DeliveryStatus::Claimed);
    }

    #[test]
    fn client_events_use_the_wire_names() {
        let id = Uuid::new_v4();
        let join: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"joinDeliveryRoom","id":"{id}"}}"#
        ))
        .unwrap();
        assert!(matches!(join, ClientEvent::JoinDeliveryRoom { .. }));

        let position: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"positionUpdate","id":"{id}","lat":11.17,"lng":-4.29}}"#
        ))
        .unwrap();
        assert!(matches!(position, ClientEvent::PositionUpdate { .. }));

        let status: ClientEvent = serde_json::from_str(&format!(
            r#"{{"event":"statusChange","id":"{id}","status":"in_transit"}}"#
        ))
        .unwrap();
        match status {
            ClientEvent::StatusChange { status, .. } => {
                assert_eq!(status, DeliveryStatus::InTransit);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn server_events_tag_with_camel_case() {
        let event = ServerEvent::PositionUpdated {
            id: Uuid::new_v4(),
            lat: 0.0,
            lng: 0.0,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""event":"positionUpdated""#));

        let joined = ServerEvent::Joined {
            id: Uuid::new_v4(),
            message: "connected".to_string(),
        };
        let json = serde_json::to_string(&joined).unwrap();
        assert!(json.contains(r#""event":"joined""#));
    }
}
