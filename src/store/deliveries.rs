use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::delivery::{
    Delivery, DeliveryPhoto, DeliveryStatus, PackageCategory, PaymentMethod, PaymentProof,
    PaymentStatus, Zone,
};
use crate::models::user::GeoPoint;

/// Caller-supplied fields for a staff edit; absent fields are untouched.
#[derive(Debug, Default, Deserialize)]
pub struct DeliveryPatch {
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub description: Option<String>,
    pub category: Option<PackageCategory>,
    pub zone: Option<Zone>,
    pub price: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub pending: usize,
    pub claimed: usize,
    pub in_transit: usize,
    pub delivered: usize,
    pub cancelled: usize,
    pub revenue: u64,
    pub revenue_today: u64,
    pub revenue_all_time: u64,
}

/// The delivery ledger. Every mutation goes through a method that holds the
/// entry's exclusive guard for the whole check-then-write, so preconditions
/// and writes cannot interleave with a concurrent writer on the same record.
#[derive(Clone, Default)]
pub struct DeliveryStore {
    deliveries: Arc<DashMap<Uuid, Delivery>>,
}

impl DeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, delivery: Delivery) {
        self.deliveries.insert(delivery.id, delivery);
    }

    pub fn get(&self, id: Uuid) -> Option<Delivery> {
        self.deliveries.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }

    /// Atomic claim. The conditional update runs under the entry's exclusive
    /// guard: of two concurrent claimants exactly one observes
    /// `pending && courier.is_none()` and wins. A read-then-save pair here
    /// would let both pass the check and double-assign the job.
    ///
    /// A missing id and an already-taken delivery report the same conflict,
    /// so a losing claimant learns nothing about why it lost.
    pub fn claim(&self, id: Uuid, courier: Uuid) -> Result<Delivery, AppError> {
        if self.active_for(courier).is_some() {
            return Err(AppError::Conflict(
                "you already have an active mission; finish it before accepting another"
                    .to_string(),
            ));
        }

        let claimed = {
            let Some(mut delivery) = self.deliveries.get_mut(&id) else {
                return Err(AppError::Conflict(
                    "this delivery is no longer available".to_string(),
                ));
            };

            if delivery.status != DeliveryStatus::Pending || delivery.courier.is_some() {
                return Err(AppError::Conflict(
                    "this delivery is no longer available".to_string(),
                ));
            }

            delivery.courier = Some(courier);
            delivery.status = DeliveryStatus::Claimed;
            delivery.updated_at = Utc::now();
            delivery.clone()
        };

        // The fast-path check above cannot see a second claim by the same
        // courier racing on a different delivery. Re-check after winning and
        // yield the higher-id claim, so exactly one mission survives.
        let double_claimed = self.deliveries.iter().any(|entry| {
            let other = entry.value();
            other.id < id
                && other.courier == Some(courier)
                && other.status.is_active_mission()
        });
        if double_claimed {
            self.release_claim(id, courier);
            return Err(AppError::Conflict(
                "you already have an active mission; finish it before accepting another"
                    .to_string(),
            ));
        }

        Ok(claimed)
    }

    fn release_claim(&self, id: Uuid, courier: Uuid) {
        if let Some(mut delivery) = self.deliveries.get_mut(&id) {
            if delivery.status == DeliveryStatus::Claimed && delivery.courier == Some(courier) {
                delivery.courier = None;
                delivery.status = DeliveryStatus::Pending;
                delivery.updated_at = Utc::now();
            }
        }
    }

    /// Dispatcher-directed assignment. Single-writer in practice, but the
    /// pending check still runs under the entry guard in case a concurrent
    /// claim beat it.
    pub fn assign(&self, id: Uuid, courier: Uuid) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(
                "this delivery is no longer available".to_string(),
            ));
        }

        delivery.courier = Some(courier);
        delivery.status = DeliveryStatus::Claimed;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    /// Courier-driven status transition, checked against the transition
    /// table. Only the assigned courier may move the delivery.
    pub fn transition(
        &self,
        id: Uuid,
        actor: Uuid,
        requested: DeliveryStatus,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.courier != Some(actor) {
            return Err(AppError::Forbidden(
                "you are not the courier for this delivery".to_string(),
            ));
        }

        let allowed = delivery.status.allowed_transitions();
        if !allowed.contains(&requested) {
            return Err(AppError::InvalidTransition {
                from: delivery.status,
                requested,
                allowed,
            });
        }

        delivery.status = requested;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    pub fn edit(&self, id: Uuid, patch: DeliveryPatch) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(
                "cannot edit a delivery a courier has already taken".to_string(),
            ));
        }

        if let Some(value) = patch.pickup_address {
            delivery.pickup_address = value;
        }
        if let Some(value) = patch.dropoff_address {
            delivery.dropoff_address = value;
        }
        if let Some(value) = patch.description {
            delivery.description = value;
        }
        if let Some(value) = patch.category {
            delivery.category = value;
        }
        if let Some(value) = patch.zone {
            delivery.zone = value;
        }
        if let Some(value) = patch.price {
            delivery.price = value;
        }
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    /// Cancellation is only reachable from `pending`; once a courier is
    /// engaged the status machine is the only way out.
    pub fn cancel(&self, id: Uuid) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.status != DeliveryStatus::Pending {
            return Err(AppError::Conflict(
                "cannot cancel: a courier has already taken this delivery".to_string(),
            ));
        }

        delivery.status = DeliveryStatus::Cancelled;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    pub fn set_position(&self, id: Uuid, position: GeoPoint) -> Result<(), AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;
        delivery.courier_position = position;
        Ok(())
    }

    // ── payment sub-workflow ────────────────────────────────────────────────

    /// Client submits mobile-money proof. Re-submission after a rejection
    /// re-enters `proof_submitted` with a fresh timestamp.
    pub fn submit_proof(&self, id: Uuid, client: Uuid, data: String) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .filter(|entry| entry.client == client)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.payment_method != PaymentMethod::MobileMoney {
            return Err(AppError::Validation(
                "this payment method does not take a proof".to_string(),
            ));
        }

        delivery.payment_proof = Some(PaymentProof {
            data,
            submitted_at: Utc::now(),
            verified_by: None,
            verified_at: None,
            rejection_reason: None,
        });
        delivery.payment_status = PaymentStatus::ProofSubmitted;
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    /// Staff verdict on a pending proof. `approve` stamps the verifier,
    /// otherwise the reason lands on the proof.
    pub fn review_proof(
        &self,
        id: Uuid,
        verifier: Uuid,
        approve: bool,
        reason: Option<String>,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.payment_status != PaymentStatus::ProofSubmitted {
            return Err(AppError::Validation(
                "no payment proof is pending".to_string(),
            ));
        }

        let proof = delivery
            .payment_proof
            .as_mut()
            .ok_or_else(|| AppError::Internal("proof_submitted without a proof".to_string()))?;

        if approve {
            proof.verified_by = Some(verifier);
            proof.verified_at = Some(Utc::now());
            delivery.payment_status = PaymentStatus::Verified;
        } else {
            proof.rejection_reason =
                Some(reason.unwrap_or_else(|| "Preuve non conforme".to_string()));
            delivery.payment_status = PaymentStatus::Rejected;
        }
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    /// Courier confirms cash settled on delivery; verified directly with no
    /// staff step.
    pub fn confirm_cash(
        &self,
        id: Uuid,
        courier: Uuid,
        photo: Option<String>,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .filter(|entry| entry.courier == Some(courier))
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        if delivery.payment_method != PaymentMethod::Cash {
            return Err(AppError::Validation(
                "not applicable for this payment method".to_string(),
            ));
        }

        delivery.payment_status = PaymentStatus::Verified;
        if let Some(data) = photo {
            delivery.payment_proof = Some(PaymentProof {
                data,
                submitted_at: Utc::now(),
                verified_by: Some(courier),
                verified_at: Some(Utc::now()),
                rejection_reason: None,
            });
        }
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    /// Pure attachment, no state transition.
    pub fn attach_delivery_photo(
        &self,
        id: Uuid,
        courier: Uuid,
        photo: String,
    ) -> Result<Delivery, AppError> {
        let mut delivery = self
            .deliveries
            .get_mut(&id)
            .filter(|entry| entry.courier == Some(courier))
            .ok_or_else(|| AppError::NotFound("delivery not found".to_string()))?;

        delivery.delivery_photo = Some(DeliveryPhoto {
            data: photo,
            taken_at: Utc::now(),
        });
        delivery.updated_at = Utc::now();
        Ok(delivery.clone())
    }

    // ── query surfaces ──────────────────────────────────────────────────────

    /// Unclaimed deliveries, newest first.
    pub fn available(&self) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| {
                entry.value().status == DeliveryStatus::Pending && entry.value().courier.is_none()
            })
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn list(&self, status: Option<DeliveryStatus>, date: Option<NaiveDate>) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| {
                let delivery = entry.value();
                status.is_none_or(|wanted| delivery.status == wanted)
                    && date.is_none_or(|day| delivery.created_at.date_naive() == day)
            })
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn by_client(&self, client: Uuid) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().client == client)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    pub fn by_courier(&self, courier: Uuid) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().courier == Some(courier))
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// The courier's single {claimed, in_transit} delivery, if any.
    pub fn active_for(&self, courier: Uuid) -> Option<Delivery> {
        self.deliveries
            .iter()
            .find(|entry| {
                let delivery = entry.value();
                delivery.courier == Some(courier) && delivery.status.is_active_mission()
            })
            .map(|entry| entry.value().clone())
    }

    /// Couriers currently occupied by an active mission.
    pub fn busy_couriers(&self) -> Vec<Uuid> {
        self.deliveries
            .iter()
            .filter(|entry| entry.value().status.is_active_mission())
            .filter_map(|entry| entry.value().courier)
            .collect()
    }

    /// Deliveries awaiting proof verification, oldest submission first.
    pub fn pending_proofs(&self) -> Vec<Delivery> {
        let mut rows: Vec<Delivery> = self
            .deliveries
            .iter()
            .filter(|entry| entry.value().payment_status == PaymentStatus::ProofSubmitted)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by_key(|delivery| {
            delivery
                .payment_proof
                .as_ref()
                .map(|proof| proof.submitted_at)
        });
        rows
    }

    pub fn stats(&self, date: Option<NaiveDate>) -> DeliveryStats {
        let today = Utc::now().date_naive();
        let mut stats = DeliveryStats {
            total: 0,
            pending: 0,
            claimed: 0,
            in_transit: 0,
            delivered: 0,
            cancelled: 0,
            revenue: 0,
            revenue_today: 0,
            revenue_all_time: 0,
        };

        for entry in self.deliveries.iter() {
            let delivery = entry.value();
            let in_range = date.is_none_or(|day| delivery.created_at.date_naive() == day);

            if in_range {
                stats.total += 1;
                match delivery.status {
                    DeliveryStatus::Pending => stats.pending += 1,
                    DeliveryStatus::Claimed => stats.claimed += 1,
                    DeliveryStatus::InTransit => stats.in_transit += 1,
                    DeliveryStatus::Delivered => stats.delivered += 1,
                    DeliveryStatus::Cancelled => stats.cancelled += 1,
                }
            }

            if delivery.status == DeliveryStatus::Delivered {
                stats.revenue_all_time += delivery.price;
                if in_range {
                    stats.revenue += delivery.price;
                }
                if delivery.created_at.date_naive() == today {
                    stats.revenue_today += delivery.price;
                }
            }
        }

        stats
    }

    // ── watchdog support ────────────────────────────────────────────────────

    /// Unassigned deliveries older than `cutoff` that have not been flagged.
    pub fn stale_unassigned(&self, cutoff: chrono::DateTime<Utc>) -> Vec<Delivery> {
        self.deliveries
            .iter()
            .filter(|entry| {
                let delivery = entry.value();
                delivery.status == DeliveryStatus::Pending
                    && delivery.courier.is_none()
                    && !delivery.watchdog_alerted
                    && delivery.created_at < cutoff
            })
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn mark_watchdog_alerted(&self, id: Uuid) {
        if let Some(mut delivery) = self.deliveries.get_mut(&id) {
            delivery.watchdog_alerted = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::DeliveryStore;
    use crate::error::AppError;
    use crate::models::delivery::{
        Delivery, DeliveryStatus, PackageCategory, PaymentMethod, PaymentStatus, Zone,
    };
    use crate::models::user::GeoPoint;

    fn pending_delivery(client: Uuid) -> Delivery {
        Delivery {
            id: Uuid::new_v4(),
            client,
            courier: None,
            pickup_address: "Rue 12, Bobo".to_string(),
            dropoff_address: "Avenue de la Nation".to_string(),
            pickup: GeoPoint::default(),
            dropoff: GeoPoint::default(),
            description: String::new(),
            category: PackageCategory::Leger,
            zone: Zone::Zone1,
            status: DeliveryStatus::Pending,
            base_price: 1000,
            zone_surcharge: 0,
            price: 1000,
            payment_method: PaymentMethod::Cash,
            payment_status: PaymentStatus::NotRequired,
            payment_proof: None,
            delivery_photo: None,
            courier_position: GeoPoint::default(),
            watchdog_alerted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn concurrent_claims_elect_exactly_one_winner() {
        let store = DeliveryStore::new();
        let delivery = pending_delivery(Uuid::new_v4());
        let id = delivery.id;
        store.insert(delivery);

        let couriers: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
        let mut handles = Vec::new();
        for courier in couriers {
            let store = store.clone();
            handles.push(std::thread::spawn(move || store.claim(id, courier)));
        }

        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let winners = results.iter().filter(|result| result.is_ok()).count();
        assert_eq!(winners, 1);

        let settled = store.get(id).unwrap();
        assert_eq!(settled.status, DeliveryStatus::Claimed);
        assert!(settled.courier.is_some());
    }

    #[test]
    fn concurrent_claims_by_one_courier_keep_a_single_mission() {
        for _ in 0..50 {
            let store = DeliveryStore::new();
            let first = pending_delivery(Uuid::new_v4());
            let second = pending_delivery(Uuid::new_v4());
            let ids = [first.id, second.id];
            store.insert(first);
            store.insert(second);

            let courier = Uuid::new_v4();
            let handles: Vec<_> = ids
                .iter()
                .map(|&id| {
                    let store = store.clone();
                    std::thread::spawn(move || store.claim(id, courier))
                })
                .collect();

            let results: Vec<_> = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();

            let winners = results.iter().filter(|result| result.is_ok()).count();
            assert_eq!(winners, 1);

            let active = ids
                .iter()
                .filter(|&&id| {
                    let delivery = store.get(id).unwrap();
                    delivery.courier == Some(courier) && delivery.status.is_active_mission()
                })
                .count();
            assert_eq!(active, 1);
        }
    }

    #[test]
    fn losing_claim_does_not_reveal_why() {
        let store = DeliveryStore::new();
        let delivery = pending_delivery(Uuid::new_v4());
        let id = delivery.id;
        store.insert(delivery);

        let winner = Uuid::new_v4();
        store.claim(id, winner).unwrap();

        let taken = store.claim(id, Uuid::new_v4()).unwrap_err();
        let missing = store.claim(Uuid::new_v4(), Uuid::new_v4()).unwrap_err();

        match (&taken, &missing) {
            (AppError::Conflict(a), AppError::Conflict(b)) => assert_eq!(a, b),
            other => panic!("expected matching conflicts, got {other:?}"),
        }
    }

    #[test]
    fn courier_cannot_hold_two_active_missions() {
        let store = DeliveryStore::new();
        let first = pending_delivery(Uuid::new_v4());
        let second = pending_delivery(Uuid::new_v4());
        let (first_id, second_id) = (first.id, second.id);
        store.insert(first);
        store.insert(second);

        let courier = Uuid::new_v4();
        store.claim(first_id, courier).unwrap();

        let err = store.claim(second_id, courier).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // Delivering the first frees the courier.
        store
            .transition(first_id, courier, DeliveryStatus::InTransit)
            .unwrap();
        store
            .transition(first_id, courier, DeliveryStatus::Delivered)
            .unwrap();
        store.claim(second_id, courier).unwrap();
    }

    #[test]
    fn skipping_a_state_is_rejected_with_the_legal_targets() {
        let store = DeliveryStore::new();
        let delivery = pending_delivery(Uuid::new_v4());
        let id = delivery.id;
        store.insert(delivery);

        let courier = Uuid::new_v4();
        store.claim(id, courier).unwrap();

        let err = store
            .transition(id, courier, DeliveryStatus::Delivered)
            .unwrap_err();
        match err {
            AppError::InvalidTransition { allowed, .. } => {
                assert_eq!(
                    allowed,
                    &[DeliveryStatus::InTransit, DeliveryStatus::Cancelled]
                );
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn only_the_assigned_courier_may_transition() {
        let store = DeliveryStore::new();
        let delivery = pending_delivery(Uuid::new_v4());
        let id = delivery.id;
        store.insert(delivery);

        store.claim(id, Uuid::new_v4()).unwrap();
        let err = store
            .transition(id, Uuid::new_v4(), DeliveryStatus::InTransit)
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));
    }

    #[test]
    fn cancel_is_pending_only() {
        let store = DeliveryStore::new();
        let delivery = pending_delivery(Uuid::new_v4());
        let id = delivery.id;
        store.insert(delivery);

        store.claim(id, Uuid::new_v4()).unwrap();
        let err = store.cancel(id).unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[test]
    fn rejected_proof_can_be_resubmitted_and_verified() {
        let store = DeliveryStore::new();
        let client = Uuid::new_v4();
        let mut delivery = pending_delivery(client);
        delivery.payment_method = PaymentMethod::MobileMoney;
        let id = delivery.id;
        store.insert(delivery);

        store.submit_proof(id, client, "img-1".to_string()).unwrap();
        let staff = Uuid::new_v4();
        let rejected = store
            .review_proof(id, staff, false, Some("blurry".to_string()))
            .unwrap();
        assert_eq!(rejected.payment_status, PaymentStatus::Rejected);

        let resubmitted = store.submit_proof(id, client, "img-2".to_string()).unwrap();
        assert_eq!(resubmitted.payment_status, PaymentStatus::ProofSubmitted);
        assert!(resubmitted
            .payment_proof
            .as_ref()
            .unwrap()
            .rejection_reason
            .is_none());

        let verified = store.review_proof(id, staff, true, None).unwrap();
        assert_eq!(verified.payment_status, PaymentStatus::Verified);
        assert_eq!(
            verified.payment_proof.as_ref().unwrap().verified_by,
            Some(staff)
        );
    }

    #[test]
    fn cash_confirmation_requires_cash_method() {
        let store = DeliveryStore::new();
        let mut delivery = pending_delivery(Uuid::new_v4());
        delivery.payment_method = PaymentMethod::MobileMoney;
        let id = delivery.id;
        store.insert(delivery);

        let courier = Uuid::new_v4();
        store.claim(id, courier).unwrap();
        let err = store.confirm_cash(id, courier, None).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn pending_proofs_come_back_oldest_first() {
        let store = DeliveryStore::new();
        let client = Uuid::new_v4();

        let mut ids = Vec::new();
        for _ in 0..3 {
            let mut delivery = pending_delivery(client);
            delivery.payment_method = PaymentMethod::MobileMoney;
            ids.push(delivery.id);
            store.insert(delivery);
        }
        for id in &ids {
            store.submit_proof(*id, client, "img".to_string()).unwrap();
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let queue = store.pending_proofs();
        let queue_ids: Vec<_> = queue.iter().map(|delivery| delivery.id).collect();
        assert_eq!(queue_ids, ids);
    }
}
