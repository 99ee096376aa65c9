use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order::Order;

pub mod in_memory;
pub mod order_repository;

pub use in_memory::InMemoryOrderRepository;
pub use order_repository::SeaOrmOrderRepository;

/// Storage for order aggregates.
///
/// `update` is an optimistic write: it succeeds only when the stored version
/// still equals `order.version()`, and on success returns the order carrying
/// the bumped version. A stale write yields
/// [`ServiceError::ConcurrentModification`].
#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError>;

    async fn find_by_order_number(&self, order_number: &str)
        -> Result<Option<Order>, ServiceError>;

    async fn find_by_payment_ref(&self, external_ref: &str)
        -> Result<Option<Order>, ServiceError>;

    async fn insert(&self, order: &Order) -> Result<(), ServiceError>;

    async fn update(&self, order: &Order) -> Result<Order, ServiceError>;
}
