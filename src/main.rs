use serde::Serialize;
use serde_json::json;
use sqlx::{migrate::Migrator, SqlitePool as Pool};
use tide::{Body, Request, Response};

use reqwest::Url;
use storefront::shop::payments::{
    HttpPaymentGateway, PaymentError, PaymentGateway, PaymentIntentRequest,
};
use storefront::shop::{
    Caller, CartItemPayload, CartLedger, Catalog, Id, OrderUpdate, OrderWorkflow, Product,
    QuantityPayload, ReviewAggregator, ReviewInput, ShopError, ShopSQLService,
    SqlListProductsQuery, SqlOrderRequest,
};
use storefront::utils::jwt::jwt_middleware;
use storefront::utils::query::PageQuery;

static MIGRATOR: Migrator = sqlx::migrate!();

#[derive(Clone)]
struct AppState {
    shop: ShopSQLService,
    payments: HttpPaymentGateway,
}

fn caller(request: &Request<AppState>) -> Result<Caller, ShopError> {
    request
        .ext::<Caller>()
        .cloned()
        .ok_or(ShopError::Unauthenticated)
}

fn wrap_result<T: Serialize>(result: &Result<T, ShopError>) -> tide::Result {
    match result {
        Ok(result) => {
            let mut res = Response::new(200);
            res.set_body(Body::from_json(&result)?);
            Ok(res)
        }
        Err(err) => {
            let (status, code) = match err {
                ShopError::Unauthenticated => (401, "E_UNAUTHENTICATED"),
                ShopError::Forbidden => (403, "E_FORBIDDEN"),
                ShopError::NotFound(_) => (404, "E_NOT_FOUND"),
                ShopError::InsufficientStock(_) => (409, "E_INSUFFICIENT_STOCK"),
                ShopError::Validation(_) => (400, "E_VALIDATION"),
                ShopError::DatabaseError => (500, "E_DATABASE"),
                ShopError::MappingError => (500, "E_MAPPING"),
            };
            let mut res = Response::new(status);
            res.set_body(json!({
              "success": false,
              "error": code,
              "error_message": err.to_string()
            }));
            Ok(res)
        }
    }
}

async fn list_products(request: Request<AppState>) -> tide::Result {
    let query: SqlListProductsQuery = request.query()?;
    let shop = request.state().shop.clone();
    let result = shop.list_products(&query).await;
    wrap_result(&result)
}

async fn read_product(request: Request<AppState>) -> tide::Result {
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = shop.read_product(id).await;
    wrap_result(&result)
}

async fn create_product(mut request: Request<AppState>) -> tide::Result {
    let product: Product = request.body_json().await?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.create_product(&who, &product).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn update_product(mut request: Request<AppState>) -> tide::Result {
    let product: Product = request.body_json().await?;
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.update_product(&who, id, &product).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn delete_product(request: Request<AppState>) -> tide::Result {
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.delete_product(&who, id).await,
        Err(err) => Err(err),
    };
    wrap_result(&result.map(|_| json!({ "success": true })))
}

async fn create_cart(request: Request<AppState>) -> tide::Result {
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.create_cart(&who).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn read_cart(request: Request<AppState>) -> tide::Result {
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.read_cart(&who).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn add_cart_item(mut request: Request<AppState>) -> tide::Result {
    let payload: CartItemPayload<Id> = request.body_json().await?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => {
            shop.add_item(&who, payload.product_id, payload.quantity)
                .await
        }
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn set_cart_item_quantity(mut request: Request<AppState>) -> tide::Result {
    let payload: QuantityPayload = request.body_json().await?;
    let product_id: Id = request.param("product_id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => {
            shop.set_item_quantity(&who, product_id, payload.quantity)
                .await
        }
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn remove_cart_item(request: Request<AppState>) -> tide::Result {
    let product_id: Id = request.param("product_id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.remove_item(&who, product_id).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn create_order(mut request: Request<AppState>) -> tide::Result {
    let order: SqlOrderRequest = request.body_json().await?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.create_order(&who, &order).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn list_orders(request: Request<AppState>) -> tide::Result {
    let page: PageQuery = request.query()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.list_orders(&who, &page).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn read_order(request: Request<AppState>) -> tide::Result {
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.read_order(&who, id).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn update_order(mut request: Request<AppState>) -> tide::Result {
    let update: OrderUpdate = request.body_json().await?;
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.update_order(&who, id, &update).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn create_review(mut request: Request<AppState>) -> tide::Result {
    let input: ReviewInput = request.body_json().await?;
    let product_id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.create_review(&who, product_id, &input).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn update_review(mut request: Request<AppState>) -> tide::Result {
    let input: ReviewInput = request.body_json().await?;
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.update_review(&who, id, &input).await,
        Err(err) => Err(err),
    };
    wrap_result(&result)
}

async fn delete_review(request: Request<AppState>) -> tide::Result {
    let id: Id = request.param("id")?.parse()?;
    let shop = request.state().shop.clone();
    let result = match caller(&request) {
        Ok(who) => shop.delete_review(&who, id).await,
        Err(err) => Err(err),
    };
    wrap_result(&result.map(|_| json!({ "success": true })))
}

async fn create_payment_intent(mut request: Request<AppState>) -> tide::Result {
    let payload: PaymentIntentRequest = request.body_json().await?;
    if caller(&request).is_err() {
        return wrap_result::<()>(&Err(ShopError::Unauthenticated));
    }
    let payments = request.state().payments.clone();
    match payments.create_intent(&payload).await {
        Ok(intent) => {
            let mut res = Response::new(200);
            res.set_body(Body::from_json(&intent)?);
            Ok(res)
        }
        Err(PaymentError::Validation(msg)) => {
            let mut res = Response::new(400);
            res.set_body(json!({
              "success": false,
              "error": "E_VALIDATION",
              "error_message": msg
            }));
            Ok(res)
        }
        Err(PaymentError::Gateway) => {
            let mut res = Response::new(502);
            res.set_body(json!({
              "success": false,
              "error": "E_GATEWAY",
              "error_message": "payment gateway unavailable"
            }));
            Ok(res)
        }
    }
}

const DEFAULT_DB_FILE: &str = "sqlite:storefront.db";
const DEFAULT_PORT: &str = "5555";
const DEFAULT_GATEWAY: &str = "http://localhost:9900/intents";

#[async_std::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tide::log::start();

    let db_file = std::env::args()
        .skip(1)
        .next()
        .map(|f| format!("sqlite:{}", f))
        .unwrap_or(DEFAULT_DB_FILE.into());
    let port = std::env::var("PORT").unwrap_or(DEFAULT_PORT.into());
    let gateway = std::env::var("PAYMENT_GATEWAY_URL").unwrap_or(DEFAULT_GATEWAY.into());

    let conn = Pool::connect(&db_file).await?;
    MIGRATOR.run(&conn).await?;

    let mut app = tide::with_state(AppState {
        shop: ShopSQLService::new(conn),
        payments: HttpPaymentGateway::new(Url::parse(&gateway)?),
    });
    app.with(jwt_middleware);

    app.at("/")
        .get(|_| async move { Ok(json!({ "version": "1" })) });

    app.at("/products").get(list_products).post(create_product);
    app.at("/products/:id")
        .get(read_product)
        .put(update_product)
        .delete(delete_product);
    app.at("/products/:id/reviews").post(create_review);

    app.at("/cart").get(read_cart).post(create_cart);
    app.at("/cart/items").post(add_cart_item);
    app.at("/cart/items/:product_id")
        .put(set_cart_item_quantity)
        .delete(remove_cart_item);

    app.at("/orders").get(list_orders).post(create_order);
    app.at("/orders/:id").get(read_order).put(update_order);

    app.at("/reviews/:id").put(update_review).delete(delete_review);

    app.at("/payments/intent").post(create_payment_intent);

    let addr = format!("0.0.0.0:{}", port);
    tide::log::info!("listening on {}", addr);
    app.listen(addr).await?;
    Ok(())
}
