use std::fmt::Display;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::models::{
    CartDocument, OrderDocument, OrderRequest, OrderUpdate, Product, ProductDocument,
    ReviewDocument, ReviewInput,
};
use crate::utils::query::PageQuery;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
    Developer,
}

impl Role {
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Admin | Role::Developer)
    }
}

/// Authenticated caller resolved upstream from the bearer token. The
/// services trust it verbatim; every role branch in the system goes through
/// [`Caller::require`] instead of ad hoc checks in each operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub account: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ManageCatalog,
    UpdateOrders,
    ModerateReviews,
}

impl Caller {
    pub fn require(&self, capability: Capability) -> Result<(), ShopError> {
        let allowed = match capability {
            Capability::ManageCatalog => self.role == Role::Admin,
            Capability::UpdateOrders | Capability::ModerateReviews => self.role.is_privileged(),
        };
        if allowed {
            Ok(())
        } else {
            Err(ShopError::Forbidden)
        }
    }

    pub fn owns(&self, account: &str) -> bool {
        self.account == account
    }
}

#[derive(Serialize, Deserialize, Debug, Default)]
pub struct ListProductsOptions {
    pub title: Option<String>,
    pub max_price: Option<f32>,
    pub min_price: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub enum ProductColumnOrder {
    CreatedAt,
    Price,
    Rating,
}

#[async_trait]
pub trait Catalog {
    type Id;
    type Query: Send + Sync;

    async fn create_product(
        &self,
        caller: &Caller,
        product: &Product,
    ) -> Result<ProductDocument<Self::Id>, ShopError>;

    async fn read_product(&self, id: Self::Id) -> Result<ProductDocument<Self::Id>, ShopError>;

    async fn update_product(
        &self,
        caller: &Caller,
        id: Self::Id,
        product: &Product,
    ) -> Result<ProductDocument<Self::Id>, ShopError>;

    async fn delete_product(&self, caller: &Caller, id: Self::Id) -> Result<(), ShopError>;

    async fn list_products(
        &self,
        query: &Self::Query,
    ) -> Result<Vec<ProductDocument<Self::Id>>, ShopError>;
}

/// The per-account selection of products prior to checkout. Line mutations
/// and the running-total adjustment commit together; stock is deliberately
/// not checked here (only the order workflow enforces it).
#[async_trait]
pub trait CartLedger {
    type Id;

    async fn create_cart(&self, caller: &Caller) -> Result<CartDocument<Self::Id>, ShopError>;

    async fn read_cart(&self, caller: &Caller) -> Result<CartDocument<Self::Id>, ShopError>;

    async fn add_item(
        &self,
        caller: &Caller,
        product_id: Self::Id,
        quantity: i32,
    ) -> Result<CartDocument<Self::Id>, ShopError>;

    async fn remove_item(
        &self,
        caller: &Caller,
        product_id: Self::Id,
    ) -> Result<CartDocument<Self::Id>, ShopError>;

    async fn set_item_quantity(
        &self,
        caller: &Caller,
        product_id: Self::Id,
        quantity: i32,
    ) -> Result<CartDocument<Self::Id>, ShopError>;

    async fn clear_and_recreate(&self, caller: &Caller)
        -> Result<CartDocument<Self::Id>, ShopError>;
}

/// Converts requested line items into a persisted order while adjusting
/// stock, and provides the compensating cancellation path. All steps of one
/// operation run inside a single storage transaction.
#[async_trait]
pub trait OrderWorkflow {
    type Id;

    async fn create_order(
        &self,
        caller: &Caller,
        request: &OrderRequest<Self::Id>,
    ) -> Result<OrderDocument<Self::Id>, ShopError>;

    async fn read_order(
        &self,
        caller: &Caller,
        id: Self::Id,
    ) -> Result<OrderDocument<Self::Id>, ShopError>;

    async fn list_orders(
        &self,
        caller: &Caller,
        page: &PageQuery,
    ) -> Result<Vec<OrderDocument<Self::Id>>, ShopError>;

    async fn update_order(
        &self,
        caller: &Caller,
        id: Self::Id,
        update: &OrderUpdate,
    ) -> Result<OrderDocument<Self::Id>, ShopError>;
}

/// Review CRUD; every mutation ends with a full recomputation of the owning
/// product's mean rating in the same transaction.
#[async_trait]
pub trait ReviewAggregator {
    type Id;

    async fn create_review(
        &self,
        caller: &Caller,
        product_id: Self::Id,
        input: &ReviewInput,
    ) -> Result<ReviewDocument<Self::Id>, ShopError>;

    async fn update_review(
        &self,
        caller: &Caller,
        id: Self::Id,
        input: &ReviewInput,
    ) -> Result<ReviewDocument<Self::Id>, ShopError>;

    async fn delete_review(&self, caller: &Caller, id: Self::Id) -> Result<(), ShopError>;
}

impl std::error::Error for ShopError {}

/// Failure taxonomy shared by every shop operation. All variants are
/// terminal; database causes collapse into `DatabaseError` without leaking
/// internal detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShopError {
    Unauthenticated,
    Forbidden,
    NotFound(String),
    InsufficientStock(String),
    Validation(String),
    DatabaseError,
    MappingError,
}

impl Display for ShopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unauthenticated => write!(f, "authentication required"),
            Self::Forbidden => write!(f, "caller is not allowed to perform this operation"),
            Self::NotFound(what) => write!(f, "not found: {}", what),
            Self::InsufficientStock(id) => {
                write!(f, "insufficient stock for product {}", id)
            }
            Self::Validation(msg) => write!(f, "{}", msg),
            Self::DatabaseError => write!(f, "storage unavailable"),
            Self::MappingError => write!(f, "stored data could not be decoded"),
        }
    }
}
