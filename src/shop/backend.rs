use async_trait::async_trait;

use sea_query::{Cond, Expr, Iden, Order as OrderSql, Query as Qsql, SqliteQueryBuilder as QueryBuilder};
use sqlx::types::chrono::NaiveDateTime;
use sqlx::{sqlite::SqliteConnection, FromRow, SqlitePool as Pool};

use super::super::utils::query::{Order, PageQuery, Query};
use super::models::{
    Address, CartDocument, CartLine, OrderDocument, OrderLine, OrderRequest, OrderStatus,
    OrderUpdate, Product, ProductDocument, ReviewDocument, ReviewInput,
};
use super::service::{
    Caller, Capability, Catalog, CartLedger, ListProductsOptions, OrderWorkflow,
    ProductColumnOrder, ReviewAggregator, ShopError,
};

sea_query::sea_query_driver_sqlite!();
use sea_query_driver_sqlite::{bind_query, bind_query_as};

pub type Id = u32;
pub type Account = String;
pub type SqlProductDocument = ProductDocument<Id>;
pub type SqlCartDocument = CartDocument<Id>;
pub type SqlOrderDocument = OrderDocument<Id>;
pub type SqlOrderRequest = OrderRequest<Id>;
pub type SqlReviewDocument = ReviewDocument<Id>;
pub type SqlListProductsQuery = Query<ListProductsOptions, ProductColumnOrder>;

const MAX_COMMENT_LEN: usize = 1000;
// f32 cents survive sums well below this slack
const TOTAL_AMOUNT_EPSILON: f32 = 0.005;

impl From<Order> for OrderSql {
    fn from(order_service: Order) -> Self {
        match order_service {
            Order::Asc => OrderSql::Asc,
            Order::Desc => OrderSql::Desc,
        }
    }
}

#[derive(Clone)]
pub struct ShopSQLService {
    pool: Pool,
}

impl ShopSQLService {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn conn(&self) -> Result<sqlx::pool::PoolConnection<sqlx::Sqlite>, ShopError> {
        self.pool.acquire().await.map_err(|_| ShopError::DatabaseError)
    }

    async fn begin(&self) -> Result<sqlx::Transaction<'_, sqlx::Sqlite>, ShopError> {
        self.pool.begin().await.map_err(|_| ShopError::DatabaseError)
    }

    async fn cart_document(&self, account: &str) -> Result<SqlCartDocument, ShopError> {
        let mut conn = self.conn().await?;
        let cart = load_cart(&mut conn, account).await?;
        let lines = load_cart_lines(&mut conn, cart.id).await?;
        Ok(to_cart_document(cart, lines))
    }

    async fn order_document(&self, id: Id) -> Result<SqlOrderDocument, ShopError> {
        let mut conn = self.conn().await?;
        let order = load_order(&mut conn, id).await?;
        let lines = load_order_lines(&mut conn, order.id).await?;
        to_order_document(order, lines)
    }
}

#[async_trait]
impl Catalog for ShopSQLService {
    type Id = Id;
    type Query = SqlListProductsQuery;

    async fn create_product(
        &self,
        caller: &Caller,
        product: &Product,
    ) -> Result<SqlProductDocument, ShopError> {
        caller.require(Capability::ManageCatalog)?;
        validate_product(product)?;

        let (sql, values) = Qsql::insert()
            .into_table(ProductSchema::Table)
            .columns(vec![
                ProductSchema::Id,
                ProductSchema::Title,
                ProductSchema::Description,
                ProductSchema::Price,
                ProductSchema::StockQuantity,
            ])
            .values_panic(vec![
                rand::random::<Id>().into(),
                product.title.clone().into(),
                product.description.clone().into(),
                product.price.into(),
                product.stock_quantity.into(),
            ])
            .returning(Qsql::select().expr(Expr::asterisk()).take())
            .build(QueryBuilder);

        let mut conn = self.conn().await?;
        let row: ProductRow = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_one(&mut conn)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        Ok(row.to_document())
    }

    async fn read_product(&self, id: Id) -> Result<SqlProductDocument, ShopError> {
        let mut conn = self.conn().await?;
        let row = load_product(&mut conn, id).await?;
        Ok(row.to_document())
    }

    async fn update_product(
        &self,
        caller: &Caller,
        id: Id,
        product: &Product,
    ) -> Result<SqlProductDocument, ShopError> {
        caller.require(Capability::ManageCatalog)?;
        validate_product(product)?;

        let (sql, values) = Qsql::update()
            .table(ProductSchema::Table)
            .value(ProductSchema::Title, product.title.clone().into())
            .value(ProductSchema::Description, product.description.clone().into())
            .value(ProductSchema::Price, product.price.into())
            .value(ProductSchema::StockQuantity, product.stock_quantity.into())
            .value_expr(ProductSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"))
            .and_where(Expr::col(ProductSchema::Id).eq(id))
            .returning(Qsql::select().expr(Expr::asterisk()).take())
            .build(QueryBuilder);

        let mut conn = self.conn().await?;
        let row: ProductRow = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_one(&mut conn)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => ShopError::NotFound(id.to_string()),
                _ => ShopError::DatabaseError,
            })?;

        Ok(row.to_document())
    }

    async fn delete_product(&self, caller: &Caller, id: Id) -> Result<(), ShopError> {
        caller.require(Capability::ManageCatalog)?;

        let (sql, values) = Qsql::delete()
            .from_table(ProductSchema::Table)
            .and_where(Expr::col(ProductSchema::Id).eq(id))
            .build(QueryBuilder);

        let mut conn = self.conn().await?;
        let done = bind_query(sqlx::query(&sql), &values)
            .execute(&mut conn)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        if done.rows_affected() == 0 {
            return Err(ShopError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn list_products(
        &self,
        query: &Self::Query,
    ) -> Result<Vec<SqlProductDocument>, ShopError> {
        let (sql, values) = Qsql::select()
            .expr(Expr::asterisk())
            .from(ProductSchema::Table)
            .conditions(
                query.options.title.is_some(),
                |q| {
                    let title = query.options.title.as_ref().unwrap();
                    q.cond_where(Cond::all().add(Expr::cust_with_values(
                        "title LIKE ?",
                        vec![format!("%{}%", title)],
                    )));
                },
                |_| {},
            )
            .conditions(
                query.options.max_price.is_some(),
                |q| {
                    let max_price = query.options.max_price.unwrap();
                    q.cond_where(Expr::cust_with_values("price <= ?", vec![max_price]));
                },
                |_| {},
            )
            .conditions(
                query.options.min_price.is_some(),
                |q| {
                    let min_price = query.options.min_price.unwrap();
                    q.cond_where(Expr::cust_with_values("price >= ?", vec![min_price]));
                },
                |_| {},
            )
            .conditions(
                query.order_by.is_some(),
                |q| {
                    let order_by = query.order_by.as_ref().unwrap();
                    let column = match order_by.field {
                        ProductColumnOrder::CreatedAt => ProductSchema::CreatedAt,
                        ProductColumnOrder::Price => ProductSchema::Price,
                        ProductColumnOrder::Rating => ProductSchema::AverageRating,
                    };
                    q.order_by(column, OrderSql::from(order_by.direction));
                },
                |_| {},
            )
            .conditions(
                query.limit.is_some(),
                |q| {
                    q.limit(u64::from(query.limit.unwrap()));
                },
                |_| {},
            )
            .build(QueryBuilder);

        let mut conn = self.conn().await?;
        let rows: Vec<ProductRow> = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_all(&mut conn)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        Ok(rows.into_iter().map(|row| row.to_document()).collect())
    }
}

#[async_trait]
impl CartLedger for ShopSQLService {
    type Id = Id;

    async fn create_cart(&self, caller: &Caller) -> Result<SqlCartDocument, ShopError> {
        let mut conn = self.conn().await?;
        let cart = insert_cart(&mut conn, &caller.account).await?;
        Ok(to_cart_document(cart, vec![]))
    }

    async fn read_cart(&self, caller: &Caller) -> Result<SqlCartDocument, ShopError> {
        self.cart_document(&caller.account).await
    }

    async fn add_item(
        &self,
        caller: &Caller,
        product_id: Id,
        quantity: i32,
    ) -> Result<SqlCartDocument, ShopError> {
        validate_quantity(quantity)?;

        let mut tx = self.begin().await?;
        let product = load_product(&mut tx, product_id).await?;
        let cart = load_cart(&mut tx, &caller.account).await?;

        match load_cart_line(&mut tx, cart.id, product_id).await? {
            Some(line) => {
                set_line_quantity(&mut tx, cart.id, product_id, line.quantity + quantity).await?;
            }
            None => {
                insert_cart_line(&mut tx, cart.id, product_id, quantity).await?;
            }
        }
        adjust_cart_total(&mut tx, cart.id, product.price * quantity as f32).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        self.cart_document(&caller.account).await
    }

    async fn remove_item(
        &self,
        caller: &Caller,
        product_id: Id,
    ) -> Result<SqlCartDocument, ShopError> {
        let mut tx = self.begin().await?;
        let product = load_product(&mut tx, product_id).await?;
        let cart = load_cart(&mut tx, &caller.account).await?;
        let line = load_cart_line(&mut tx, cart.id, product_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(product_id.to_string()))?;

        delete_cart_line(&mut tx, cart.id, product_id).await?;
        adjust_cart_total(&mut tx, cart.id, -(product.price * line.quantity as f32)).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        self.cart_document(&caller.account).await
    }

    async fn set_item_quantity(
        &self,
        caller: &Caller,
        product_id: Id,
        quantity: i32,
    ) -> Result<SqlCartDocument, ShopError> {
        validate_quantity(quantity)?;

        let mut tx = self.begin().await?;
        let product = load_product(&mut tx, product_id).await?;
        let cart = load_cart(&mut tx, &caller.account).await?;
        let line = load_cart_line(&mut tx, cart.id, product_id)
            .await?
            .ok_or_else(|| ShopError::NotFound(product_id.to_string()))?;

        set_line_quantity(&mut tx, cart.id, product_id, quantity).await?;
        adjust_cart_total(
            &mut tx,
            cart.id,
            product.price * (quantity - line.quantity) as f32,
        )
        .await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        self.cart_document(&caller.account).await
    }

    async fn clear_and_recreate(&self, caller: &Caller) -> Result<SqlCartDocument, ShopError> {
        let mut tx = self.begin().await?;
        let cart = reset_cart(&mut tx, &caller.account).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;
        Ok(to_cart_document(cart, vec![]))
    }
}

#[async_trait]
impl OrderWorkflow for ShopSQLService {
    type Id = Id;

    async fn create_order(
        &self,
        caller: &Caller,
        request: &SqlOrderRequest,
    ) -> Result<SqlOrderDocument, ShopError> {
        validate_order_request(request)?;

        let mut tx = self.begin().await?;

        // validation pass over every line before any write
        let mut validated: Vec<(Id, i32, f32)> = Vec::with_capacity(request.products.len());
        for item in &request.products {
            let product = load_product(&mut tx, item.product_id).await?;
            if product.stock_quantity < item.order_quantity {
                return Err(ShopError::InsufficientStock(item.product_id.to_string()));
            }
            validated.push((item.product_id, item.order_quantity, product.price));
        }

        let computed_total: f32 = validated
            .iter()
            .map(|(_, quantity, price)| *quantity as f32 * price)
            .sum();
        if let Some(client_total) = request.total_amount {
            if (client_total - computed_total).abs() > TOTAL_AMOUNT_EPSILON {
                return Err(ShopError::Validation(format!(
                    "submitted total {} does not match the priced total {}",
                    client_total, computed_total
                )));
            }
        }

        let order_id = insert_order(&mut tx, &caller.account, request, computed_total).await?;
        for (position, (product_id, quantity, unit_price)) in validated.iter().enumerate() {
            insert_order_line(&mut tx, order_id, *product_id, *quantity, *unit_price, position)
                .await?;
        }

        // guarded decrement; a concurrent order that got there first rolls
        // the whole transaction back instead of driving stock negative
        for (product_id, quantity, _) in &validated {
            decrement_stock(&mut tx, *product_id, *quantity).await?;
        }

        reset_cart(&mut tx, &caller.account).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        self.order_document(order_id).await
    }

    async fn read_order(&self, caller: &Caller, id: Id) -> Result<SqlOrderDocument, ShopError> {
        let mut conn = self.conn().await?;
        let order = load_order(&mut conn, id).await?;
        if !caller.owns(&order.account) {
            caller.require(Capability::UpdateOrders)?;
        }
        let lines = load_order_lines(&mut conn, order.id).await?;
        to_order_document(order, lines)
    }

    async fn list_orders(
        &self,
        caller: &Caller,
        page: &PageQuery,
    ) -> Result<Vec<SqlOrderDocument>, ShopError> {
        let (limit, offset) = page.limit_offset();
        let (sql, values) = Qsql::select()
            .expr(Expr::asterisk())
            .from(OrderSchema::Table)
            .and_where(Expr::col(OrderSchema::Account).eq(caller.account.to_string()))
            .order_by(OrderSchema::CreatedAt, OrderSql::Desc)
            .limit(limit)
            .offset(offset)
            .build(QueryBuilder);

        let mut conn = self.conn().await?;
        let rows: Vec<OrderRow> = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_all(&mut conn)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        let mut documents = Vec::with_capacity(rows.len());
        for row in rows {
            let lines = load_order_lines(&mut conn, row.id).await?;
            documents.push(to_order_document(row, lines)?);
        }
        Ok(documents)
    }

    async fn update_order(
        &self,
        caller: &Caller,
        id: Id,
        update: &OrderUpdate,
    ) -> Result<SqlOrderDocument, ShopError> {
        caller.require(Capability::UpdateOrders)?;
        if let Some(address) = &update.address {
            validate_address(address)?;
        }

        let mut tx = self.begin().await?;
        let order = load_order(&mut tx, id).await?;
        let current: OrderStatus = order
            .status
            .parse()
            .map_err(|_| ShopError::MappingError)?;
        // repeat cancellation must not restore stock twice
        let cancelling =
            update.status == Some(OrderStatus::Canceled) && current != OrderStatus::Canceled;

        let (sql, values) = {
            let mut stmt = Qsql::update();
            stmt.table(OrderSchema::Table);
            if let Some(status) = update.status {
                stmt.value(OrderSchema::Status, status.as_str().into());
            }
            if let Some(name) = &update.name {
                stmt.value(OrderSchema::Name, name.clone().into());
            }
            if let Some(email) = &update.email {
                stmt.value(OrderSchema::Email, email.clone().into());
            }
            if let Some(address) = &update.address {
                stmt.value(OrderSchema::AddressStreet, address.street.clone().into());
                stmt.value(OrderSchema::AddressCity, address.city.clone().into());
                stmt.value(OrderSchema::AddressState, address.state.clone().into());
                stmt.value(
                    OrderSchema::AddressPostalCode,
                    address.postal_code.clone().into(),
                );
            }
            stmt.value_expr(OrderSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"));
            stmt.and_where(Expr::col(OrderSchema::Id).eq(id));
            stmt.build(QueryBuilder)
        };

        bind_query(sqlx::query(&sql), &values)
            .execute(&mut tx)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        if cancelling {
            let lines = load_order_lines(&mut tx, id).await?;
            for line in &lines {
                restore_stock(&mut tx, line.product_id, line.quantity).await?;
            }
        }
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        self.order_document(id).await
    }
}

#[async_trait]
impl ReviewAggregator for ShopSQLService {
    type Id = Id;

    async fn create_review(
        &self,
        caller: &Caller,
        product_id: Id,
        input: &ReviewInput,
    ) -> Result<SqlReviewDocument, ShopError> {
        validate_review(input)?;

        let mut tx = self.begin().await?;
        load_product(&mut tx, product_id).await?;

        let (sql, values) = Qsql::insert()
            .into_table(ReviewSchema::Table)
            .columns(vec![
                ReviewSchema::Id,
                ReviewSchema::Account,
                ReviewSchema::ProductId,
                ReviewSchema::Rating,
                ReviewSchema::Comment,
            ])
            .values_panic(vec![
                rand::random::<Id>().into(),
                caller.account.to_string().into(),
                product_id.into(),
                input.rating.into(),
                input.comment.clone().into(),
            ])
            .returning(Qsql::select().expr(Expr::asterisk()).take())
            .build(QueryBuilder);

        let row: ReviewRow = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_one(&mut tx)
            .await
            .map_err(|err| match err {
                sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
                    ShopError::Validation("this account has already reviewed this product".into())
                }
                _ => ShopError::DatabaseError,
            })?;

        recompute_average(&mut tx, product_id).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        Ok(row.to_document())
    }

    async fn update_review(
        &self,
        caller: &Caller,
        id: Id,
        input: &ReviewInput,
    ) -> Result<SqlReviewDocument, ShopError> {
        validate_review(input)?;

        let mut tx = self.begin().await?;
        let review = load_review(&mut tx, id).await?;
        if !caller.owns(&review.account) {
            return Err(ShopError::Forbidden);
        }

        let (sql, values) = Qsql::update()
            .table(ReviewSchema::Table)
            .value(ReviewSchema::Rating, input.rating.into())
            .value(ReviewSchema::Comment, input.comment.clone().into())
            .value_expr(ReviewSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"))
            .and_where(Expr::col(ReviewSchema::Id).eq(id))
            .returning(Qsql::select().expr(Expr::asterisk()).take())
            .build(QueryBuilder);

        let row: ReviewRow = bind_query_as(sqlx::query_as(&sql), &values)
            .fetch_one(&mut tx)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        recompute_average(&mut tx, review.product_id).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;

        Ok(row.to_document())
    }

    async fn delete_review(&self, caller: &Caller, id: Id) -> Result<(), ShopError> {
        let mut tx = self.begin().await?;
        let review = load_review(&mut tx, id).await?;
        if !caller.owns(&review.account) {
            // force-delete path
            caller.require(Capability::ModerateReviews)?;
        }

        let (sql, values) = Qsql::delete()
            .from_table(ReviewSchema::Table)
            .and_where(Expr::col(ReviewSchema::Id).eq(id))
            .build(QueryBuilder);

        bind_query(sqlx::query(&sql), &values)
            .execute(&mut tx)
            .await
            .map_err(|_| ShopError::DatabaseError)?;

        recompute_average(&mut tx, review.product_id).await?;
        tx.commit().await.map_err(|_| ShopError::DatabaseError)?;
        Ok(())
    }
}

async fn load_product(conn: &mut SqliteConnection, id: Id) -> Result<ProductRow, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(ProductSchema::Table)
        .and_where(Expr::col(ProductSchema::Id).eq(id))
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ShopError::NotFound(id.to_string()),
            _ => ShopError::DatabaseError,
        })
}

async fn load_cart(conn: &mut SqliteConnection, account: &str) -> Result<CartRow, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(CartSchema::Table)
        .and_where(Expr::col(CartSchema::Account).eq(account.to_string()))
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ShopError::NotFound(format!("cart for {}", account)),
            _ => ShopError::DatabaseError,
        })
}

async fn load_cart_lines(
    conn: &mut SqliteConnection,
    cart_id: Id,
) -> Result<Vec<CartLineRow>, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(CartLineSchema::Table)
        .and_where(Expr::col(CartLineSchema::CartId).eq(cart_id))
        .order_by(CartLineSchema::Position, OrderSql::Asc)
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_all(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)
}

async fn load_cart_line(
    conn: &mut SqliteConnection,
    cart_id: Id,
    product_id: Id,
) -> Result<Option<CartLineRow>, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(CartLineSchema::Table)
        .and_where(Expr::col(CartLineSchema::CartId).eq(cart_id))
        .and_where(Expr::col(CartLineSchema::ProductId).eq(product_id))
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)
}

async fn insert_cart_line(
    conn: &mut SqliteConnection,
    cart_id: Id,
    product_id: Id,
    quantity: i32,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::insert()
        .into_table(CartLineSchema::Table)
        .columns(vec![
            CartLineSchema::CartId,
            CartLineSchema::ProductId,
            CartLineSchema::Quantity,
            CartLineSchema::Position,
        ])
        .exprs_panic(vec![
            Expr::value(cart_id),
            Expr::value(product_id),
            Expr::value(quantity),
            // append at the end: insertion order is the line order
            Expr::cust_with_values(
                "(SELECT COUNT(*) FROM cart_lines WHERE cart_id = ?)",
                vec![cart_id],
            ),
        ])
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

async fn set_line_quantity(
    conn: &mut SqliteConnection,
    cart_id: Id,
    product_id: Id,
    quantity: i32,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::update()
        .table(CartLineSchema::Table)
        .value(CartLineSchema::Quantity, quantity.into())
        .and_where(Expr::col(CartLineSchema::CartId).eq(cart_id))
        .and_where(Expr::col(CartLineSchema::ProductId).eq(product_id))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

async fn delete_cart_line(
    conn: &mut SqliteConnection,
    cart_id: Id,
    product_id: Id,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::delete()
        .from_table(CartLineSchema::Table)
        .and_where(Expr::col(CartLineSchema::CartId).eq(cart_id))
        .and_where(Expr::col(CartLineSchema::ProductId).eq(product_id))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

async fn adjust_cart_total(
    conn: &mut SqliteConnection,
    cart_id: Id,
    delta: f32,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::update()
        .table(CartSchema::Table)
        .value_expr(
            CartSchema::TotalPrice,
            Expr::cust_with_values("total_price + ?", vec![delta]),
        )
        .and_where(Expr::col(CartSchema::Id).eq(cart_id))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

async fn insert_cart(conn: &mut SqliteConnection, account: &str) -> Result<CartRow, ShopError> {
    let (sql, values) = Qsql::insert()
        .into_table(CartSchema::Table)
        .columns(vec![
            CartSchema::Id,
            CartSchema::Account,
            CartSchema::TotalPrice,
        ])
        .values_panic(vec![
            rand::random::<Id>().into(),
            account.to_string().into(),
            0f32.into(),
        ])
        .returning(Qsql::select().expr(Expr::asterisk()).take())
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
                ShopError::Validation("a cart already exists for this account".into())
            }
            _ => ShopError::DatabaseError,
        })
}

/// Drops the account's cart (lines cascade) and attaches a fresh empty one.
async fn reset_cart(conn: &mut SqliteConnection, account: &str) -> Result<CartRow, ShopError> {
    let (sql, values) = Qsql::delete()
        .from_table(CartSchema::Table)
        .and_where(Expr::col(CartSchema::Account).eq(account.to_string()))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;

    insert_cart(conn, account).await
}

async fn insert_order(
    conn: &mut SqliteConnection,
    account: &str,
    request: &SqlOrderRequest,
    total_amount: f32,
) -> Result<Id, ShopError> {
    let id = rand::random::<Id>();
    let (sql, values) = Qsql::insert()
        .into_table(OrderSchema::Table)
        .columns(vec![
            OrderSchema::Id,
            OrderSchema::Account,
            OrderSchema::Name,
            OrderSchema::Email,
            OrderSchema::AddressStreet,
            OrderSchema::AddressCity,
            OrderSchema::AddressState,
            OrderSchema::AddressPostalCode,
            OrderSchema::TotalAmount,
            OrderSchema::Status,
        ])
        .values_panic(vec![
            id.into(),
            account.to_string().into(),
            request.name.clone().into(),
            request.email.clone().into(),
            request.address.street.clone().into(),
            request.address.city.clone().into(),
            request.address.state.clone().into(),
            request.address.postal_code.clone().into(),
            total_amount.into(),
            OrderStatus::Pending.as_str().into(),
        ])
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(id)
}

async fn insert_order_line(
    conn: &mut SqliteConnection,
    order_id: Id,
    product_id: Id,
    quantity: i32,
    unit_price: f32,
    position: usize,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::insert()
        .into_table(OrderLineSchema::Table)
        .columns(vec![
            OrderLineSchema::OrderId,
            OrderLineSchema::ProductId,
            OrderLineSchema::Quantity,
            OrderLineSchema::UnitPrice,
            OrderLineSchema::Position,
        ])
        .values_panic(vec![
            order_id.into(),
            product_id.into(),
            quantity.into(),
            unit_price.into(),
            (position as i32).into(),
        ])
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::Database(db) if db.message().contains("UNIQUE constraint failed") => {
                ShopError::Validation("duplicate product in order".into())
            }
            _ => ShopError::DatabaseError,
        })?;
    Ok(())
}

async fn load_order(conn: &mut SqliteConnection, id: Id) -> Result<OrderRow, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(OrderSchema::Table)
        .and_where(Expr::col(OrderSchema::Id).eq(id))
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ShopError::NotFound(id.to_string()),
            _ => ShopError::DatabaseError,
        })
}

async fn load_order_lines(
    conn: &mut SqliteConnection,
    order_id: Id,
) -> Result<Vec<OrderLineRow>, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(OrderLineSchema::Table)
        .and_where(Expr::col(OrderLineSchema::OrderId).eq(order_id))
        .order_by(OrderLineSchema::Position, OrderSql::Asc)
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_all(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)
}

async fn load_review(conn: &mut SqliteConnection, id: Id) -> Result<ReviewRow, ShopError> {
    let (sql, values) = Qsql::select()
        .expr(Expr::asterisk())
        .from(ReviewSchema::Table)
        .and_where(Expr::col(ReviewSchema::Id).eq(id))
        .build(QueryBuilder);

    bind_query_as(sqlx::query_as(&sql), &values)
        .fetch_one(&mut *conn)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => ShopError::NotFound(id.to_string()),
            _ => ShopError::DatabaseError,
        })
}

/// Single conditional update: the stock-floor guard makes concurrent
/// checkouts against the same product serialize on the row instead of both
/// passing a stale read.
async fn decrement_stock(
    conn: &mut SqliteConnection,
    product_id: Id,
    quantity: i32,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::update()
        .table(ProductSchema::Table)
        .value_expr(
            ProductSchema::StockQuantity,
            Expr::cust_with_values("stock_quantity - ?", vec![quantity]),
        )
        .value_expr(ProductSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"))
        .and_where(Expr::col(ProductSchema::Id).eq(product_id))
        .and_where(Expr::cust_with_values("stock_quantity >= ?", vec![quantity]))
        .build(QueryBuilder);

    let done = bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;

    if done.rows_affected() == 0 {
        return Err(ShopError::InsufficientStock(product_id.to_string()));
    }
    Ok(())
}

/// Exact inverse of [`decrement_stock`]. A product deleted since the order
/// was placed makes this a no-op.
async fn restore_stock(
    conn: &mut SqliteConnection,
    product_id: Id,
    quantity: i32,
) -> Result<(), ShopError> {
    let (sql, values) = Qsql::update()
        .table(ProductSchema::Table)
        .value_expr(
            ProductSchema::StockQuantity,
            Expr::cust_with_values("stock_quantity + ?", vec![quantity]),
        )
        .value_expr(ProductSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"))
        .and_where(Expr::col(ProductSchema::Id).eq(product_id))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

/// Full recomputation over the product's current reviews; the only writer of
/// `average_rating`.
async fn recompute_average(conn: &mut SqliteConnection, product_id: Id) -> Result<(), ShopError> {
    let (sql, values) = Qsql::update()
        .table(ProductSchema::Table)
        .value_expr(
            ProductSchema::AverageRating,
            Expr::cust_with_values(
                "COALESCE((SELECT AVG(rating) FROM reviews WHERE product_id = ?), 0)",
                vec![product_id],
            ),
        )
        .value_expr(ProductSchema::UpdatedAt, Expr::cust("CURRENT_TIMESTAMP"))
        .and_where(Expr::col(ProductSchema::Id).eq(product_id))
        .build(QueryBuilder);

    bind_query(sqlx::query(&sql), &values)
        .execute(&mut *conn)
        .await
        .map_err(|_| ShopError::DatabaseError)?;
    Ok(())
}

fn validate_product(product: &Product) -> Result<(), ShopError> {
    if product.title.trim().is_empty() {
        return Err(ShopError::Validation("product title must not be empty".into()));
    }
    if !product.price.is_finite() || product.price < 0.0 {
        return Err(ShopError::Validation("price must be a non-negative amount".into()));
    }
    if product.stock_quantity < 0 {
        return Err(ShopError::Validation("stock quantity must not be negative".into()));
    }
    Ok(())
}

fn validate_quantity(quantity: i32) -> Result<(), ShopError> {
    if quantity < 1 {
        return Err(ShopError::Validation("quantity must be at least 1".into()));
    }
    Ok(())
}

fn validate_address(address: &Address) -> Result<(), ShopError> {
    let postal_code = address.postal_code.trim();
    let well_formed = (3..=10).contains(&postal_code.len())
        && postal_code.chars().any(|c| c.is_ascii_alphanumeric())
        && postal_code
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == ' ');
    if !well_formed {
        return Err(ShopError::Validation("malformed postal code".into()));
    }
    Ok(())
}

fn validate_order_request(request: &SqlOrderRequest) -> Result<(), ShopError> {
    if request.products.is_empty() {
        return Err(ShopError::Validation("order has no line items".into()));
    }
    for item in &request.products {
        validate_quantity(item.order_quantity)?;
    }
    if request.name.trim().is_empty() {
        return Err(ShopError::Validation("name must not be empty".into()));
    }
    if !request.email.contains('@') {
        return Err(ShopError::Validation("malformed email address".into()));
    }
    validate_address(&request.address)
}

fn validate_review(input: &ReviewInput) -> Result<(), ShopError> {
    if !input.rating.is_finite() || !(0.0..=5.0).contains(&input.rating) {
        return Err(ShopError::Validation("rating must be between 0 and 5".into()));
    }
    if input.comment.chars().count() > MAX_COMMENT_LEN {
        return Err(ShopError::Validation(format!(
            "comment exceeds {} characters",
            MAX_COMMENT_LEN
        )));
    }
    Ok(())
}

fn to_cart_document(cart: CartRow, lines: Vec<CartLineRow>) -> SqlCartDocument {
    CartDocument {
        id: cart.id,
        account: cart.account,
        total_price: cart.total_price,
        created_at: cart.created_at,
        lines: lines
            .into_iter()
            .map(|line| CartLine {
                product_id: line.product_id,
                quantity: line.quantity,
            })
            .collect(),
    }
}

fn to_order_document(
    order: OrderRow,
    lines: Vec<OrderLineRow>,
) -> Result<SqlOrderDocument, ShopError> {
    let status: OrderStatus = order.status.parse().map_err(|_| ShopError::MappingError)?;
    Ok(OrderDocument {
        id: order.id,
        account: order.account,
        name: order.name,
        email: order.email,
        address: Address {
            street: order.address_street,
            city: order.address_city,
            state: order.address_state,
            postal_code: order.address_postal_code,
        },
        lines: lines
            .into_iter()
            .map(|line| OrderLine {
                product_id: line.product_id,
                quantity: line.quantity,
                unit_price: line.unit_price,
            })
            .collect(),
        total_amount: order.total_amount,
        status,
        created_at: order.created_at,
        updated_at: order.updated_at,
    })
}

#[derive(Debug, FromRow)]
pub struct ProductRow {
    pub id: Id,
    pub title: String,
    pub description: String,
    pub price: f32,
    pub stock_quantity: i32,
    pub average_rating: f32,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ProductRow {
    fn to_document(self) -> SqlProductDocument {
        ProductDocument {
            id: self.id,
            product: Product {
                title: self.title,
                description: self.description,
                price: self.price,
                stock_quantity: self.stock_quantity,
            },
            average_rating: self.average_rating,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub struct CartRow {
    pub id: Id,
    pub account: String,
    pub total_price: f32,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, FromRow)]
pub struct CartLineRow {
    pub cart_id: Id,
    pub product_id: Id,
    pub quantity: i32,
    pub position: i32,
}

#[derive(Debug, FromRow)]
pub struct OrderRow {
    pub id: Id,
    pub account: String,
    pub name: String,
    pub email: String,
    pub address_street: String,
    pub address_city: String,
    pub address_state: String,
    pub address_postal_code: String,
    pub total_amount: f32,
    pub status: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, FromRow)]
pub struct OrderLineRow {
    pub order_id: Id,
    pub product_id: Id,
    pub quantity: i32,
    pub unit_price: f32,
    pub position: i32,
}

#[derive(Debug, FromRow)]
pub struct ReviewRow {
    pub id: Id,
    pub account: String,
    pub product_id: Id,
    pub rating: f32,
    pub comment: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ReviewRow {
    fn to_document(self) -> SqlReviewDocument {
        ReviewDocument {
            id: self.id,
            account: self.account,
            product_id: self.product_id,
            rating: self.rating,
            comment: self.comment,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub enum ProductSchema {
    Table,
    Id,
    Title,
    Description,
    Price,
    StockQuantity,
    AverageRating,
    CreatedAt,
    UpdatedAt,
}

impl Iden for ProductSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "products",
                Self::Id => "id",
                Self::Title => "title",
                Self::Description => "description",
                Self::Price => "price",
                Self::StockQuantity => "stock_quantity",
                Self::AverageRating => "average_rating",
                Self::CreatedAt => "created_at",
                Self::UpdatedAt => "updated_at",
            }
        )
        .unwrap();
    }
}

pub enum CartSchema {
    Table,
    Id,
    Account,
    TotalPrice,
    _CreatedAt,
}

impl Iden for CartSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "carts",
                Self::Id => "id",
                Self::Account => "account",
                Self::TotalPrice => "total_price",
                Self::_CreatedAt => "created_at",
            }
        )
        .unwrap();
    }
}

pub enum CartLineSchema {
    Table,
    CartId,
    ProductId,
    Quantity,
    Position,
}

impl Iden for CartLineSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "cart_lines",
                Self::CartId => "cart_id",
                Self::ProductId => "product_id",
                Self::Quantity => "quantity",
                Self::Position => "position",
            }
        )
        .unwrap();
    }
}

pub enum OrderSchema {
    Table,
    Id,
    Account,
    Name,
    Email,
    AddressStreet,
    AddressCity,
    AddressState,
    AddressPostalCode,
    TotalAmount,
    Status,
    CreatedAt,
    UpdatedAt,
}

impl Iden for OrderSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "orders",
                Self::Id => "id",
                Self::Account => "account",
                Self::Name => "name",
                Self::Email => "email",
                Self::AddressStreet => "address_street",
                Self::AddressCity => "address_city",
                Self::AddressState => "address_state",
                Self::AddressPostalCode => "address_postal_code",
                Self::TotalAmount => "total_amount",
                Self::Status => "status",
                Self::CreatedAt => "created_at",
                Self::UpdatedAt => "updated_at",
            }
        )
        .unwrap();
    }
}

pub enum OrderLineSchema {
    Table,
    OrderId,
    ProductId,
    Quantity,
    UnitPrice,
    Position,
}

impl Iden for OrderLineSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "order_lines",
                Self::OrderId => "order_id",
                Self::ProductId => "product_id",
                Self::Quantity => "quantity",
                Self::UnitPrice => "unit_price",
                Self::Position => "position",
            }
        )
        .unwrap();
    }
}

pub enum ReviewSchema {
    Table,
    Id,
    Account,
    ProductId,
    Rating,
    Comment,
    CreatedAt,
    UpdatedAt,
}

impl Iden for ReviewSchema {
    fn unquoted(&self, s: &mut dyn std::fmt::Write) {
        write!(
            s,
            "{}",
            match self {
                Self::Table => "reviews",
                Self::Id => "id",
                Self::Account => "account",
                Self::ProductId => "product_id",
                Self::Rating => "rating",
                Self::Comment => "comment",
                Self::CreatedAt => "created_at",
                Self::UpdatedAt => "updated_at",
            }
        )
        .unwrap();
    }
}
