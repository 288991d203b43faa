use sqlx::{migrate::Migrator, sqlite::SqlitePoolOptions, SqlitePool as Pool};
use storefront::shop::{Caller, Role, ShopSQLService};

static MIGRATOR: Migrator = sqlx::migrate!();
pub type AnyHow = Box<dyn std::error::Error>;

pub async fn new_service() -> Result<ShopSQLService, AnyHow> {
    Ok(ShopSQLService::new(restore_db().await?))
}

pub async fn restore_db() -> Result<Pool, AnyHow> {
    // a single connection so every statement sees the same in-memory database
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    MIGRATOR.run(&pool).await?;
    Ok(pool)
}

pub fn customer(account: &str) -> Caller {
    Caller {
        account: account.to_string(),
        role: Role::Customer,
    }
}

pub fn admin() -> Caller {
    Caller {
        account: "admin".to_string(),
        role: Role::Admin,
    }
}

pub fn developer() -> Caller {
    Caller {
        account: "dev".to_string(),
        role: Role::Developer,
    }
}
