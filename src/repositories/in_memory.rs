use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::OrderRepository;
use crate::errors::ServiceError;
use crate::models::order::Order;

/// Process-local order store used for `storage_backend = "in-memory"` and tests.
#[derive(Debug, Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
    by_number: DashMap<String, Uuid>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        Ok(self.orders.get(&id).map(|entry| entry.value().clone()))
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let id = match self.by_number.get(order_number) {
            Some(entry) => *entry.value(),
            None => return Ok(None),
        };
        self.find_by_id(id).await
    }

    async fn find_by_payment_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Order>, ServiceError> {
        Ok(self
            .orders
            .iter()
            .find(|entry| entry.value().external_payment_ref() == Some(external_ref))
            .map(|entry| entry.value().clone()))
    }

    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        // Claim the order number first so two inserts cannot share it.
        match self.by_number.entry(order.order_number().to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(ServiceError::Conflict(format!(
                    "order number {} already exists",
                    order.order_number()
                )))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(order.id());
            }
        }
        self.orders.insert(order.id(), order.clone());
        Ok(())
    }

    async fn update(&self, order: &Order) -> Result<Order, ServiceError> {
        let mut entry = self
            .orders
            .get_mut(&order.id())
            .ok_or(ServiceError::OrderNotFound(order.id()))?;

        if entry.version != order.version {
            return Err(ServiceError::ConcurrentModification(order.id()));
        }

        let mut stored = order.clone();
        stored.version += 1;
        *entry = stored.clone();
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::order::{Address, LineItem, OrderDraft};
    use crate::models::order_status::PaymentOutcome;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn order(number: &str) -> Order {
        let draft = OrderDraft {
            customer_id: None,
            customer_email: "jane@example.com".into(),
            shipping_address: Address {
                full_name: "Jane Doe".into(),
                line1: "1 King St W".into(),
                line2: None,
                city: "Toronto".into(),
                province: "ON".into(),
                postal_code: "M5H 1A1".into(),
                country: "CA".into(),
                phone: None,
            },
            billing_address: None,
            line_items: vec![LineItem {
                id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                product_name: "Hoodie".into(),
                product_size: None,
                product_image_url: None,
                unit_price: dec!(25.00),
                quantity: 1,
            }],
            shipping_cost: dec!(0),
            currency: "CAD".into(),
            tax_rate: dec!(0.13),
        };
        let now = Utc::now();
        let mut order = Order::new_pending(draft, number.to_string(), now).unwrap();
        order
            .attach_authorization(format!("pi_{number}"), "requires_payment_method".into(), now)
            .unwrap();
        order
    }

    #[tokio::test]
    async fn lookups_by_id_number_and_ref() {
        let repo = InMemoryOrderRepository::new();
        let order = order("ORD-1");
        repo.insert(&order).await.unwrap();

        assert!(repo.find_by_id(order.id()).await.unwrap().is_some());
        assert!(repo.find_by_order_number("ORD-1").await.unwrap().is_some());
        assert!(repo.find_by_payment_ref("pi_ORD-1").await.unwrap().is_some());
        assert!(repo.find_by_payment_ref("pi_missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn duplicate_order_number_is_rejected() {
        let repo = InMemoryOrderRepository::new();
        repo.insert(&order("ORD-1")).await.unwrap();
        assert_matches!(
            repo.insert(&order("ORD-1")).await,
            Err(ServiceError::Conflict(_))
        );
        assert_eq!(repo.len(), 1);
    }

    #[tokio::test]
    async fn stale_update_is_a_concurrent_modification() {
        let repo = InMemoryOrderRepository::new();
        let original = order("ORD-1");
        repo.insert(&original).await.unwrap();

        let mut first = original.clone();
        first.apply_payment_outcome(&PaymentOutcome::Processing, Utc::now());
        let saved = repo.update(&first).await.unwrap();
        assert_eq!(saved.version(), 2);

        let mut second = original.clone();
        second.apply_payment_outcome(&PaymentOutcome::Succeeded, Utc::now());
        assert_matches!(
            repo.update(&second).await,
            Err(ServiceError::ConcurrentModification(id)) if id == original.id()
        );
    }
}
