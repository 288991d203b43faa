use serde::{Deserialize, Serialize};
use serde_with::with_prefix;

with_prefix!(order_by_prefix "order_by_");

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct OrderBy<F> {
    pub field: F,
    pub direction: Order,
}

/// Generic list query: optional limit, optional `order_by_field` /
/// `order_by_direction` pair and domain-specific filter options, all
/// flattened so the whole thing deserializes straight from a query string.
#[derive(Serialize, Deserialize, Debug)]
pub struct Query<Opts, OrdF>
where
    for<'a> OrdF: serde::Deserialize<'a> + Serialize,
{
    pub limit: Option<u16>,
    #[serde(flatten, with = "order_by_prefix")]
    pub order_by: Option<OrderBy<OrdF>>,
    #[serde(flatten)]
    pub options: Opts,
}

impl<Opts, OrdF> From<()> for Query<Opts, OrdF>
where
    Opts: Default,
    for<'a> OrdF: serde::Deserialize<'a> + Serialize,
{
    fn from(_: ()) -> Self {
        Query {
            limit: None,
            order_by: None,
            options: Default::default(),
        }
    }
}

/// 1-based page selection for history listings.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageQuery {
    pub page: Option<u16>,
    pub page_size: Option<u16>,
}

impl PageQuery {
    pub const DEFAULT_PAGE_SIZE: u16 = 20;

    pub fn limit_offset(&self) -> (u64, u64) {
        let size = self.page_size.unwrap_or(Self::DEFAULT_PAGE_SIZE).max(1);
        let page = self.page.unwrap_or(1).max(1);
        (u64::from(size), u64::from(page - 1) * u64::from(size))
    }
}
