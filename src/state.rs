use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::ws::RoomEvent;
use crate::config::Config;
use crate::notify::{Notifier, PushSink};
use crate::observability::metrics::Metrics;
use crate::pricing::PricingTable;
use crate::store::deliveries::DeliveryStore;
use crate::store::users::UserDirectory;

pub struct AppState {
    pub config: Config,
    pub deliveries: DeliveryStore,
    pub users: UserDirectory,
    pub pricing: PricingTable,
    pub notifier: Notifier,
    /// Per-delivery broadcast rooms for the realtime channel.
    pub rooms: DashMap<Uuid, broadcast::Sender<RoomEvent>>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, sink: Arc<dyn PushSink>) -> Self {
        let users = UserDirectory::new();
        let notifier = Notifier::new(users.clone(), sink);

        Self {
            config,
            deliveries: DeliveryStore::new(),
            users,
            pricing: PricingTable::with_defaults(),
            notifier,
            rooms: DashMap::new(),
            metrics: Metrics::new(),
        }
    }

    /// Sender for a delivery's room, created on first join.
    pub fn room(&self, delivery_id: Uuid) -> broadcast::Sender<RoomEvent> {
        self.rooms
            .entry(delivery_id)
            .or_insert_with(|| broadcast::channel(self.config.event_buffer_size).0)
            .clone()
    }
}
