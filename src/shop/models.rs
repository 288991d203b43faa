use serde::{Deserialize, Serialize};
use serde_with::with_prefix;
use sqlx::types::chrono::NaiveDateTime;
use std::str::FromStr;

with_prefix!(address_prefix "address_");

/// Lifecycle of an order. The happy path walks forward only
/// (pending -> shipped -> delivered); `Canceled` is reachable from any
/// non-canceled state and triggers stock restoration.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Shipped,
    Delivered,
    Canceled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Canceled => "canceled",
        }
    }
}

impl FromStr for OrderStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            "canceled" => Ok(Self::Canceled),
            _ => Err(()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// Mutable product content, written by admins. Stock is also adjusted by the
/// order workflow; the derived rating lives on the document, never here.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Product {
    pub title: String,
    pub description: String,
    pub price: f32,
    pub stock_quantity: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProductDocument<Id> {
    pub id: Id,
    #[serde(flatten)]
    pub product: Product,
    pub average_rating: f32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CartLine<Id> {
    pub product_id: Id,
    pub quantity: i32,
}

/// One cart per account. `total_price` is maintained incrementally with each
/// line mutation, not recomputed at read time, so it reflects product prices
/// as they were when the items went in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CartDocument<Id> {
    pub id: Id,
    pub account: String,
    pub lines: Vec<CartLine<Id>>,
    pub total_price: f32,
    pub created_at: NaiveDateTime,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartItemPayload<Id> {
    pub product_id: Id,
    pub quantity: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityPayload {
    pub quantity: i32,
}

/// A requested line at checkout, before validation.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderItem<Id> {
    pub product_id: Id,
    pub order_quantity: i32,
}

/// A line frozen into an order, with the unit price captured at creation
/// time. Later product edits never touch it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderLine<Id> {
    pub product_id: Id,
    pub quantity: i32,
    pub unit_price: f32,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderRequest<Id> {
    pub products: Vec<OrderItem<Id>>,
    /// Client-computed total; verified against the server-side sum and
    /// rejected on mismatch.
    pub total_amount: Option<f32>,
    pub name: String,
    pub email: String,
    #[serde(flatten, with = "address_prefix")]
    pub address: Address,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OrderDocument<Id> {
    pub id: Id,
    pub account: String,
    pub name: String,
    pub email: String,
    #[serde(flatten, with = "address_prefix")]
    pub address: Address,
    pub lines: Vec<OrderLine<Id>>,
    pub total_amount: f32,
    pub status: OrderStatus,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Partial update for an order. Setting `status` to `Canceled` on a
/// non-canceled order is the one field change that carries a side effect
/// (stock restoration); everything else is applied verbatim.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct OrderUpdate {
    pub status: Option<OrderStatus>,
    pub name: Option<String>,
    pub email: Option<String>,
    #[serde(flatten, with = "address_prefix")]
    pub address: Option<Address>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReviewInput {
    pub rating: f32,
    pub comment: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ReviewDocument<Id> {
    pub id: Id,
    pub account: String,
    pub product_id: Id,
    pub rating: f32,
    pub comment: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
