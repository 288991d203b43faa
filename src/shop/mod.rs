pub mod backend;
pub mod models;
pub mod payments;
pub mod service;

pub use backend::{
    Account, Id, ShopSQLService, SqlCartDocument, SqlListProductsQuery, SqlOrderDocument,
    SqlOrderRequest, SqlProductDocument, SqlReviewDocument,
};
pub use models::{
    Address, CartDocument, CartItemPayload, CartLine, OrderDocument, OrderItem, OrderLine,
    OrderRequest, OrderStatus, OrderUpdate, Product, ProductDocument, QuantityPayload,
    ReviewDocument, ReviewInput,
};
pub use service::{
    Caller, Capability, Catalog, CartLedger, ListProductsOptions, OrderWorkflow,
    ProductColumnOrder, ReviewAggregator, Role, ShopError,
};
