use async_trait::async_trait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder, Set, SqlErr,
    TransactionTrait,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::OrderRepository;
use crate::entities::{order, order_line_item};
use crate::errors::ServiceError;
use crate::models::order::{Address, LineItem, Order};
use crate::models::totals::OrderTotals;

/// Order storage on a relational database through sea-orm.
#[derive(Debug, Clone)]
pub struct SeaOrmOrderRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmOrderRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn load(&self, model: Option<order::Model>) -> Result<Option<Order>, ServiceError> {
        let Some(model) = model else {
            return Ok(None);
        };

        let items = order_line_item::Entity::find()
            .filter(order_line_item::Column::OrderId.eq(model.id))
            .order_by_asc(order_line_item::Column::Position)
            .all(&*self.db)
            .await?;

        to_domain(model, items).map(Some)
    }
}

fn encode_address(address: &Address) -> Result<String, ServiceError> {
    serde_json::to_string(address)
        .map_err(|e| ServiceError::InternalError(format!("failed to encode address: {e}")))
}

fn decode_address(raw: &str) -> Result<Address, ServiceError> {
    serde_json::from_str(raw)
        .map_err(|e| ServiceError::InternalError(format!("stored address is unreadable: {e}")))
}

fn to_domain(
    model: order::Model,
    items: Vec<order_line_item::Model>,
) -> Result<Order, ServiceError> {
    let billing_address = model
        .billing_address
        .as_deref()
        .map(decode_address)
        .transpose()?;

    Ok(Order {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        customer_email: model.customer_email,
        status: model.status.parse()?,
        totals: OrderTotals {
            sub_total: model.sub_total,
            tax: model.tax,
            shipping_cost: model.shipping_cost,
            total: model.total,
        },
        currency: model.currency,
        external_payment_ref: model.external_payment_ref,
        external_payment_status: model.external_payment_status,
        payment_error_message: model.payment_error_message,
        shipping_address: decode_address(&model.shipping_address)?,
        billing_address,
        line_items: items
            .into_iter()
            .map(|item| LineItem {
                id: item.id,
                product_id: item.product_id,
                product_name: item.product_name,
                product_size: item.product_size,
                product_image_url: item.product_image_url,
                unit_price: item.unit_price,
                quantity: item.quantity,
            })
            .collect(),
        created_date: model.created_date,
        updated_date: model.updated_date,
        version: model.version,
    })
}

fn to_active_model(order: &Order) -> Result<order::ActiveModel, ServiceError> {
    Ok(order::ActiveModel {
        id: Set(order.id),
        order_number: Set(order.order_number.clone()),
        customer_id: Set(order.customer_id),
        customer_email: Set(order.customer_email.clone()),
        status: Set(order.status.as_str().to_string()),
        sub_total: Set(order.totals.sub_total),
        tax: Set(order.totals.tax),
        shipping_cost: Set(order.totals.shipping_cost),
        total: Set(order.totals.total),
        currency: Set(order.currency.clone()),
        external_payment_ref: Set(order.external_payment_ref.clone()),
        external_payment_status: Set(order.external_payment_status.clone()),
        payment_error_message: Set(order.payment_error_message.clone()),
        shipping_address: Set(encode_address(&order.shipping_address)?),
        billing_address: Set(order
            .billing_address
            .as_ref()
            .map(encode_address)
            .transpose()?),
        created_date: Set(order.created_date),
        updated_date: Set(order.updated_date),
        version: Set(order.version),
    })
}

fn map_insert_error(err: DbErr, order_number: &str) -> ServiceError {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            ServiceError::Conflict(format!("order number {order_number} already exists"))
        }
        _ => ServiceError::DatabaseError(err),
    }
}

#[async_trait]
impl OrderRepository for SeaOrmOrderRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        let model = order::Entity::find_by_id(id).one(&*self.db).await?;
        self.load(model).await
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let model = order::Entity::find()
            .filter(order::Column::OrderNumber.eq(order_number))
            .one(&*self.db)
            .await?;
        self.load(model).await
    }

    async fn find_by_payment_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Order>, ServiceError> {
        let model = order::Entity::find()
            .filter(order::Column::ExternalPaymentRef.eq(external_ref))
            .one(&*self.db)
            .await?;
        self.load(model).await
    }

    #[instrument(skip(self, order), fields(order_id = %order.id(), order_number = %order.order_number()))]
    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        let order_model = to_active_model(order)?;
        let item_models: Vec<order_line_item::ActiveModel> = order
            .line_items
            .iter()
            .enumerate()
            .map(|(position, item)| order_line_item::ActiveModel {
                id: Set(item.id),
                order_id: Set(order.id),
                position: Set(position as i32),
                product_id: Set(item.product_id),
                product_name: Set(item.product_name.clone()),
                product_size: Set(item.product_size.clone()),
                product_image_url: Set(item.product_image_url.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
            })
            .collect();

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to begin order insert transaction");
            ServiceError::DatabaseError(e)
        })?;

        order::Entity::insert(order_model)
            .exec(&txn)
            .await
            .map_err(|e| map_insert_error(e, order.order_number()))?;

        if !item_models.is_empty() {
            order_line_item::Entity::insert_many(item_models)
                .exec(&txn)
                .await?;
        }

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit order insert transaction");
            ServiceError::DatabaseError(e)
        })?;

        debug!("Order persisted");
        Ok(())
    }

    #[instrument(skip(self, order), fields(order_id = %order.id(), version = order.version()))]
    async fn update(&self, order: &Order) -> Result<Order, ServiceError> {
        let next_version = order.version + 1;

        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(order.status.as_str()))
            .col_expr(
                order::Column::ExternalPaymentStatus,
                Expr::value(order.external_payment_status.clone()),
            )
            .col_expr(
                order::Column::PaymentErrorMessage,
                Expr::value(order.payment_error_message.clone()),
            )
            .col_expr(order::Column::UpdatedDate, Expr::value(order.updated_date))
            .col_expr(order::Column::Version, Expr::value(next_version))
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            let exists = order::Entity::find_by_id(order.id)
                .one(&*self.db)
                .await?
                .is_some();
            return Err(if exists {
                ServiceError::ConcurrentModification(order.id)
            } else {
                ServiceError::OrderNotFound(order.id)
            });
        }

        let mut stored = order.clone();
        stored.version = next_version;
        Ok(stored)
    }
}
