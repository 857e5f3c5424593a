use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_products_table::Migration),
            Box::new(m20240301_000002_create_carts_tables::Migration),
            Box::new(m20240301_000003_create_orders_tables::Migration),
            Box::new(m20240301_000004_create_payments_table::Migration),
        ]
    }
}

mod m20240301_000001_create_products_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_products_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Products::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Products::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Products::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Products::Price)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::DiscountPercent)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Products::AvailableQuantity)
                                .integer()
                                .not_null()
                                .default(0)
                                .check(Expr::col(Products::AvailableQuantity).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Products::Status)
                                .string_len(32)
                                .not_null()
                                .default("active"),
                        )
                        .col(
                            ColumnDef::new(Products::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Products::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Products::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_products_status")
                        .table(Products::Table)
                        .col(Products::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Products::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub(super) enum Products {
        Table,
        Id,
        Name,
        Price,
        DiscountPercent,
        AvailableQuantity,
        Status,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_carts_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_carts_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Carts::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Carts::Id).uuid().not_null().primary_key())
                        .col(ColumnDef::new(Carts::UserId).uuid().not_null().unique_key())
                        .col(money(Carts::Subtotal))
                        .col(money(Carts::TotalDiscount))
                        .col(money(Carts::Tax))
                        .col(money(Carts::Total))
                        .col(ColumnDef::new(Carts::CouponCode).string_len(64).null())
                        .col(money(Carts::CouponDiscount))
                        .col(
                            ColumnDef::new(Carts::ExpiresAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Carts::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Carts::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_carts_expires_at")
                        .table(Carts::Table)
                        .col(Carts::ExpiresAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(CartItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(CartItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(CartItems::CartId).uuid().not_null())
                        .col(ColumnDef::new(CartItems::ProductId).uuid().not_null())
                        .col(
                            ColumnDef::new(CartItems::Quantity)
                                .integer()
                                .not_null()
                                .check(Expr::col(CartItems::Quantity).gte(1)),
                        )
                        .col(money(CartItems::Price))
                        .col(money(CartItems::DiscountPercent))
                        .col(ColumnDef::new(CartItems::Position).integer().not_null())
                        .col(
                            ColumnDef::new(CartItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(CartItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_cart_items_cart")
                                .from(CartItems::Table, CartItems::CartId)
                                .to(Carts::Table, Carts::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_cart_items_cart_product")
                        .table(CartItems::Table)
                        .col(CartItems::CartId)
                        .col(CartItems::ProductId)
                        .unique()
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(CartItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(Carts::Table).to_owned())
                .await
        }
    }

    fn money<T: IntoIden>(column: T) -> ColumnDef {
        ColumnDef::new(column)
            .decimal_len(16, 4)
            .not_null()
            .default(0)
            .to_owned()
    }

    #[derive(DeriveIden)]
    enum Carts {
        Table,
        Id,
        UserId,
        Subtotal,
        TotalDiscount,
        Tax,
        Total,
        CouponCode,
        CouponDiscount,
        ExpiresAt,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum CartItems {
        Table,
        Id,
        CartId,
        ProductId,
        Quantity,
        Price,
        DiscountPercent,
        Position,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_orders_tables {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Orders::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Orders::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Orders::OrderNumber)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Orders::UserId).uuid().not_null())
                        .col(ColumnDef::new(Orders::Status).string_len(32).not_null())
                        .col(
                            ColumnDef::new(Orders::Subtotal)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::TotalDiscount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::Tax).decimal_len(16, 4).not_null())
                        .col(
                            ColumnDef::new(Orders::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::CouponCode).string_len(64).null())
                        .col(
                            ColumnDef::new(Orders::PaymentMethod)
                                .string_len(16)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Orders::PaymentId).uuid().null())
                        .col(
                            ColumnDef::new(Orders::ShippingStreet)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCity)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingState)
                                .string_len(128)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingZip)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::ShippingCountry)
                                .string_len(64)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::Version)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(Orders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Orders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_orders_user_created")
                        .table(Orders::Table)
                        .col(Orders::UserId)
                        .col(Orders::CreatedAt)
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(OrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(OrderItems::Id)
                                .uuid()
                                .not_null()
                                .primary_key(),
                        )
                        .col(ColumnDef::new(OrderItems::OrderId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(OrderItems::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(OrderItems::Price)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(OrderItems::DiscountPercent)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(OrderItems::Position).integer().not_null())
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_order_items_order")
                                .from(OrderItems::Table, OrderItems::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_order_items_order_id")
                        .table(OrderItems::Table)
                        .col(OrderItems::OrderId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(OrderItems::Table).to_owned())
                .await?;
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
        UserId,
        Status,
        Subtotal,
        TotalDiscount,
        Tax,
        TotalAmount,
        CouponCode,
        PaymentMethod,
        PaymentId,
        ShippingStreet,
        ShippingCity,
        ShippingState,
        ShippingZip,
        ShippingCountry,
        Version,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    enum OrderItems {
        Table,
        Id,
        OrderId,
        ProductId,
        Quantity,
        Price,
        DiscountPercent,
        Position,
    }
}

mod m20240301_000004_create_payments_table {

    use super::m20240301_000003_create_orders_tables::Orders;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().not_null().primary_key())
                        .col(
                            ColumnDef::new(Payments::OrderId)
                                .uuid()
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(Payments::Method).string_len(16).not_null())
                        .col(ColumnDef::new(Payments::Details).json().not_null())
                        .col(ColumnDef::new(Payments::Status).string_len(16).not_null())
                        .col(
                            ColumnDef::new(Payments::Amount)
                                .decimal_len(16, 4)
                                .not_null()
                                .check(Expr::col(Payments::Amount).gte(0)),
                        )
                        .col(
                            ColumnDef::new(Payments::TransactionRef)
                                .string_len(128)
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Payments::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_payments_order")
                                .from(Payments::Table, Payments::OrderId)
                                .to(Orders::Table, Orders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .if_not_exists()
                        .name("idx_payments_status")
                        .table(Payments::Table)
                        .col(Payments::Status)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum Payments {
        Table,
        Id,
        OrderId,
        Method,
        Details,
        Status,
        Amount,
        TransactionRef,
        CreatedAt,
        UpdatedAt,
    }
}
