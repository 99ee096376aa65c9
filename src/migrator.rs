use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_orders_table::Migration),
            Box::new(m20240101_000002_create_order_line_items_table::Migration),
        ]
    }
}

mod m20240101_000001_create_orders_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000001_create_orders_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            // Aligned with entities::order Model
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Orders::OrderNumber).string().not_null())
                        .col(ColumnDef::new(Orders::CustomerId).uuid().null())
                        .col(ColumnDef::new(Orders::CustomerEmail).string().not_null())
                        .col(ColumnDef::new(Orders::Status).string().not_null())
                        .col(ColumnDef::new(Orders::SubTotal).decimal_len(19, 2).not_null())
                        .col(ColumnDef::new(Orders::Tax).decimal_len(19, 2).not_null())
                        .col(
                            ColumnDef::new(Orders::ShippingCost)
                                .decimal_len(19, 2)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Orders::Total).decimal_len(19, 2).not_null())
                        .col(ColumnDef::new(Orders::Currency).string_len(3).not_null())
                        .col(ColumnDef::new(Orders::ExternalPaymentRef).string().null())
                        .col(ColumnDef::new(Orders::ExternalPaymentStatus).string().null())
                        .col(ColumnDef::new(Orders::PaymentErrorMessage).text().null())
                        .col(ColumnDef::new(Orders::ShippingAddress).text().not_null())
                        .col(ColumnDef::new(Orders::BillingAddress).text().null())
                        .col(
                            ColumnDef::new(Orders::CreatedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .unique()
                        .name("idx_orders_order_number")
                        .table(Orders::Table)
                        .col(Orders::OrderNumber)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_external_payment_ref")
                        .table(Orders::Table)
                        .col(Orders::ExternalPaymentRef)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Orders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Orders {
        Table,
        Id,
        OrderNumber,
        CustomerId,
        CustomerEmail,
        Status,
        SubTotal,
        Tax,
        ShippingCost,
        Total,
        Currency,
        ExternalPaymentRef,
        ExternalPaymentStatus,
        PaymentErrorMessage,
        ShippingAddress,
        BillingAddress,
        CreatedDate,
        UpdatedDate,
        Version,
    }
}

mod m20240101_000002_create_order_line_items_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240101_000002_create_order_line_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(OrderLineItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderLineItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLineItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::Position).integer().not_null())
                        .col(ColumnDef::new(OrderLineItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderLineItems::ProductName).string().not_null())
                        .col(ColumnDef::new(OrderLineItems::ProductSize).string().null())
                        .col(ColumnDef::new(OrderLineItems::ProductImageUrl).string().null())
                        .col(
                            ColumnDef::new(OrderLineItems::UnitPrice)
                                .decimal_len(19, 2)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderLineItems::Quantity).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_line_items_order_id")
                                .from(OrderLineItems::Table, OrderLineItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade)
                                .on_update(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_line_items_order_id")
                        .table(OrderLineItems::Table)
                        .col(OrderLineItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderLineItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum OrderLineItems {
        Table,
        Id,
        OrderId,
        Position,
        ProductId,
        ProductName,
        ProductSize,
        ProductImageUrl,
        UnitPrice,
        Quantity,
    }

    #[derive(DeriveIden)]
    enum Orders {
        Table,
        Id,
    }
}
