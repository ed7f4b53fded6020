use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::user::GeoPoint;

/// Package weight tier. Drives the base-price lookup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageCategory {
    Leger,
    Moyen,
    Lourd,
    TresLourd,
}

/// Delivery distance tier. Drives the zone surcharge.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Zone {
    #[serde(rename = "zone_1")]
    Zone1,
    #[serde(rename = "zone_2")]
    Zone2,
    #[serde(rename = "zone_3")]
    Zone3,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Claimed,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// Legal courier-driven transitions. `Pending -> Cancelled` goes through
    /// the cancel operation, not this table.
    pub fn allowed_transitions(self) -> &'static [DeliveryStatus] {
        match self {
            DeliveryStatus::Claimed => &[DeliveryStatus::InTransit, DeliveryStatus::Cancelled],
            DeliveryStatus::InTransit => &[DeliveryStatus::Delivered],
            _ => &[],
        }
    }

    /// A delivery in one of these states occupies its courier.
    pub fn is_active_mission(self) -> bool {
        matches!(self, DeliveryStatus::Claimed | DeliveryStatus::InTransit)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Claimed => "claimed",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    MobileMoney,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    NotRequired,
    ProofSubmitted,
    Verified,
    Rejected,
}

/// Client-submitted payment evidence plus the staff verdict stamped on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProof {
    pub data: String,
    pub submitted_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_by: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPhoto {
    pub data: String,
    pub taken_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: Uuid,
    pub client: Uuid,
    pub courier: Option<Uuid>,
    pub pickup_address: String,
    pub dropoff_address: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub description: String,
    pub category: PackageCategory,
    pub zone: Zone,
    pub status: DeliveryStatus,
    pub base_price: u64,
    pub zone_surcharge: u64,
    pub price: u64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_proof: Option<PaymentProof>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivery_photo: Option<DeliveryPhoto>,
    pub courier_position: GeoPoint,
    pub watchdog_alerted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
