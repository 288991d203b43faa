pub mod shop;
pub mod utils;

pub use shop::{Caller, Role, ShopError, ShopSQLService};
