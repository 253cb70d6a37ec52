use crate::config::AppConfig;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr};
use std::time::Duration;
use tracing::info;

/// Establishes the database connection pool from application config.
pub async fn establish_connection_from_app_config(
    cfg: &AppConfig,
) -> Result<DatabaseConnection, DbErr> {
    let mut options = ConnectOptions::new(cfg.database_url.clone());
    options
        .max_connections(cfg.db_max_connections)
        .min_connections(cfg.db_min_connections)
        .connect_timeout(Duration::from_secs(cfg.db_connect_timeout_secs))
        .sqlx_logging(false);

    let db = Database::connect(options).await?;
    info!("Database connection established");
    Ok(db)
}

/// Creates the order tables when they do not exist yet.
///
/// Used on startup for SQLite deployments and by the test harness against
/// in-memory databases; Postgres deployments run the same DDL.
pub async fn init_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let schema = sea_orm::Schema::new(backend);

    let mut orders = schema.create_table_from_entity(crate::entities::order::Entity);
    orders.if_not_exists();
    db.execute(backend.build(&orders)).await?;

    let mut items = schema.create_table_from_entity(crate::entities::order_item::Entity);
    items.if_not_exists();
    db.execute(backend.build(&items)).await?;

    Ok(())
}
