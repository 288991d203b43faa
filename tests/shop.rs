mod fixtures;
mod utils;

use utils::{admin, customer, developer, new_service, AnyHow};

use fixtures::shop::{fake_order_request, fake_product, fake_product_priced, fake_review};

use storefront::shop::{
    CartLedger, Catalog, Id, OrderItem, OrderStatus, OrderUpdate, OrderWorkflow, Product,
    ReviewAggregator, ShopError, ShopSQLService, SqlProductDocument,
};
use storefront::utils::query::PageQuery;

async fn seed_product(
    shop: &ShopSQLService,
    price: f32,
    stock_quantity: i32,
) -> Result<SqlProductDocument, AnyHow> {
    Ok(shop
        .create_product(&admin(), &fake_product_priced(price, stock_quantity))
        .await?)
}

async fn stock_of(shop: &ShopSQLService, id: Id) -> Result<i32, AnyHow> {
    Ok(shop.read_product(id).await?.product.stock_quantity)
}

async fn rating_of(shop: &ShopSQLService, id: Id) -> Result<f32, AnyHow> {
    Ok(shop.read_product(id).await?.average_rating)
}

#[cfg(test)]
pub mod catalog_test {
    use super::*;

    #[async_std::test]
    async fn create_and_read_product() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let product = fake_product();
        let doc = shop.create_product(&admin(), &product).await?;

        assert_eq!(doc.product, product);
        assert_eq!(doc.average_rating, 0.0);

        let read = shop.read_product(doc.id).await?;
        assert_eq!(read.product, product);
        Ok(())
    }

    #[async_std::test]
    async fn product_mutations_require_admin() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let result = shop.create_product(&customer("mallory"), &fake_product()).await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);

        // developers moderate orders and reviews, not the catalog
        let result = shop.create_product(&developer(), &fake_product()).await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);
        Ok(())
    }

    #[async_std::test]
    async fn update_product_replaces_content() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let doc = shop.create_product(&admin(), &fake_product()).await?;
        let replacement = fake_product_priced(42.0, 7);

        let updated = shop.update_product(&admin(), doc.id, &replacement).await?;
        assert_eq!(updated.id, doc.id);
        assert_eq!(updated.product, replacement);
        Ok(())
    }

    #[async_std::test]
    async fn delete_product_then_read_fails() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let doc = shop.create_product(&admin(), &fake_product()).await?;
        shop.delete_product(&admin(), doc.id).await?;

        let read = shop.read_product(doc.id).await;
        assert!(matches!(read.unwrap_err(), ShopError::NotFound(_)));
        Ok(())
    }

    #[async_std::test]
    async fn reject_negative_price() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let result = shop
            .create_product(&admin(), &fake_product_priced(-1.0, 5))
            .await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        Ok(())
    }
}

#[cfg(test)]
pub mod cart_test {
    use super::*;

    #[async_std::test]
    async fn create_cart_starts_empty() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let cart = shop.create_cart(&customer("ana")).await?;

        assert_eq!(cart.account, "ana");
        assert_eq!(cart.total_price, 0.0);
        assert!(cart.lines.is_empty());
        Ok(())
    }

    #[async_std::test]
    async fn second_cart_for_same_account_is_rejected() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        shop.create_cart(&customer("ana")).await?;

        let result = shop.create_cart(&customer("ana")).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        Ok(())
    }

    #[async_std::test]
    async fn totals_follow_add_and_remove() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        let mug = seed_product(&shop, 5.0, 10).await?;
        shop.create_cart(&ana).await?;

        let cart = shop.add_item(&ana, tea.id, 2).await?;
        assert_eq!(cart.total_price, 20.0);

        let cart = shop.add_item(&ana, mug.id, 1).await?;
        assert_eq!(cart.total_price, 25.0);

        let cart = shop.remove_item(&ana, tea.id).await?;
        assert_eq!(cart.total_price, 5.0);
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].product_id, mug.id);
        Ok(())
    }

    #[async_std::test]
    async fn adding_same_product_merges_lines() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        shop.create_cart(&ana).await?;

        shop.add_item(&ana, tea.id, 2).await?;
        let cart = shop.add_item(&ana, tea.id, 3).await?;

        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].quantity, 5);
        assert_eq!(cart.total_price, 50.0);
        Ok(())
    }

    #[async_std::test]
    async fn set_quantity_adjusts_total_by_delta() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        shop.create_cart(&ana).await?;
        shop.add_item(&ana, tea.id, 2).await?;

        let cart = shop.set_item_quantity(&ana, tea.id, 4).await?;
        assert_eq!(cart.lines[0].quantity, 4);
        assert_eq!(cart.total_price, 40.0);

        let cart = shop.set_item_quantity(&ana, tea.id, 1).await?;
        assert_eq!(cart.total_price, 10.0);
        Ok(())
    }

    #[async_std::test]
    async fn quantities_below_one_are_rejected() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        shop.create_cart(&ana).await?;
        shop.add_item(&ana, tea.id, 2).await?;

        let result = shop.add_item(&ana, tea.id, 0).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));

        let result = shop.set_item_quantity(&ana, tea.id, 0).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        Ok(())
    }

    #[async_std::test]
    async fn stock_is_not_enforced_at_add_time() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 3).await?;
        shop.create_cart(&ana).await?;

        // only checkout enforces availability
        let cart = shop.add_item(&ana, tea.id, 50).await?;
        assert_eq!(cart.lines[0].quantity, 50);
        Ok(())
    }

    #[async_std::test]
    async fn clear_and_recreate_leaves_a_fresh_cart() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        shop.create_cart(&ana).await?;
        shop.add_item(&ana, tea.id, 3).await?;

        let cart = shop.clear_and_recreate(&ana).await?;
        assert!(cart.lines.is_empty());
        assert_eq!(cart.total_price, 0.0);

        // also works when no cart exists yet
        let cart = shop.clear_and_recreate(&customer("bo")).await?;
        assert_eq!(cart.account, "bo");
        assert!(cart.lines.is_empty());
        Ok(())
    }

    #[async_std::test]
    async fn missing_cart_product_or_line_fails() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;

        let result = shop.add_item(&ana, tea.id, 1).await;
        assert!(matches!(result.unwrap_err(), ShopError::NotFound(_)));

        shop.create_cart(&ana).await?;
        let result = shop.add_item(&ana, Id::default(), 1).await;
        assert!(matches!(result.unwrap_err(), ShopError::NotFound(_)));

        let result = shop.remove_item(&ana, tea.id).await;
        assert!(matches!(result.unwrap_err(), ShopError::NotFound(_)));
        Ok(())
    }
}

#[cfg(test)]
pub mod order_test {
    use super::*;

    fn cancel() -> OrderUpdate {
        OrderUpdate {
            status: Some(OrderStatus::Canceled),
            ..Default::default()
        }
    }

    #[async_std::test]
    async fn checkout_decrements_stock_and_resets_cart() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        shop.create_cart(&ana).await?;
        shop.add_item(&ana, tea.id, 4).await?;

        let request = fake_order_request(vec![OrderItem {
            product_id: tea.id,
            order_quantity: 4,
        }]);
        let order = shop.create_order(&ana, &request).await?;

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.account, "ana");
        assert_eq!(order.total_amount, 40.0);
        assert_eq!(order.lines.len(), 1);
        assert_eq!(order.lines[0].quantity, 4);
        assert_eq!(order.lines[0].unit_price, 10.0);

        assert_eq!(stock_of(&shop, tea.id).await?, 6);

        let cart = shop.read_cart(&ana).await?;
        assert!(cart.lines.is_empty());
        assert_eq!(cart.total_price, 0.0);
        Ok(())
    }

    #[async_std::test]
    async fn insufficient_stock_leaves_everything_untouched() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 3).await?;

        let request = fake_order_request(vec![OrderItem {
            product_id: tea.id,
            order_quantity: 5,
        }]);
        let result = shop.create_order(&ana, &request).await;

        assert!(matches!(
            result.unwrap_err(),
            ShopError::InsufficientStock(_)
        ));
        assert_eq!(stock_of(&shop, tea.id).await?, 3);
        assert!(shop.list_orders(&ana, &PageQuery::default()).await?.is_empty());
        Ok(())
    }

    #[async_std::test]
    async fn validation_covers_all_lines_before_any_decrement() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        let mug = seed_product(&shop, 5.0, 1).await?;

        let request = fake_order_request(vec![
            OrderItem {
                product_id: tea.id,
                order_quantity: 2,
            },
            OrderItem {
                product_id: mug.id,
                order_quantity: 3,
            },
        ]);
        let result = shop.create_order(&ana, &request).await;

        assert!(matches!(
            result.unwrap_err(),
            ShopError::InsufficientStock(_)
        ));
        assert_eq!(stock_of(&shop, tea.id).await?, 10);
        assert_eq!(stock_of(&shop, mug.id).await?, 1);
        Ok(())
    }

    #[async_std::test]
    async fn client_total_is_reconciled_server_side() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;

        let mut request = fake_order_request(vec![OrderItem {
            product_id: tea.id,
            order_quantity: 2,
        }]);
        request.total_amount = Some(15.0);
        let result = shop.create_order(&ana, &request).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        assert_eq!(stock_of(&shop, tea.id).await?, 10);

        request.total_amount = Some(20.0);
        let order = shop.create_order(&ana, &request).await?;
        assert_eq!(order.total_amount, 20.0);
        Ok(())
    }

    #[async_std::test]
    async fn snapshot_survives_later_price_change() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;

        let order = shop
            .create_order(
                &ana,
                &fake_order_request(vec![OrderItem {
                    product_id: tea.id,
                    order_quantity: 2,
                }]),
            )
            .await?;

        shop.update_product(
            &admin(),
            tea.id,
            &Product {
                price: 99.0,
                ..fake_product_priced(99.0, 8)
            },
        )
        .await?;

        let read = shop.read_order(&ana, order.id).await?;
        assert_eq!(read.lines[0].unit_price, 10.0);
        assert_eq!(read.total_amount, 20.0);
        Ok(())
    }

    #[async_std::test]
    async fn cancellation_restores_stock_once() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;

        let order = shop
            .create_order(
                &ana,
                &fake_order_request(vec![OrderItem {
                    product_id: tea.id,
                    order_quantity: 2,
                }]),
            )
            .await?;
        assert_eq!(stock_of(&shop, tea.id).await?, 8);

        let canceled = shop.update_order(&developer(), order.id, &cancel()).await?;
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(stock_of(&shop, tea.id).await?, 10);

        // repeat cancellation is a stock no-op
        let canceled = shop.update_order(&developer(), order.id, &cancel()).await?;
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(stock_of(&shop, tea.id).await?, 10);
        Ok(())
    }

    #[async_std::test]
    async fn order_updates_require_privileged_role() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        let order = shop
            .create_order(
                &ana,
                &fake_order_request(vec![OrderItem {
                    product_id: tea.id,
                    order_quantity: 1,
                }]),
            )
            .await?;

        let result = shop.update_order(&ana, order.id, &cancel()).await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);
        assert_eq!(stock_of(&shop, tea.id).await?, 9);
        Ok(())
    }

    #[async_std::test]
    async fn plain_status_update_has_no_stock_side_effect() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        let order = shop
            .create_order(
                &ana,
                &fake_order_request(vec![OrderItem {
                    product_id: tea.id,
                    order_quantity: 3,
                }]),
            )
            .await?;

        let shipped = shop
            .update_order(
                &admin(),
                order.id,
                &OrderUpdate {
                    status: Some(OrderStatus::Shipped),
                    name: Some("recipient desk".to_string()),
                    ..Default::default()
                },
            )
            .await?;

        assert_eq!(shipped.status, OrderStatus::Shipped);
        assert_eq!(shipped.name, "recipient desk");
        assert_eq!(stock_of(&shop, tea.id).await?, 7);
        Ok(())
    }

    #[async_std::test]
    async fn orders_are_visible_to_owner_and_privileged_only() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;
        let order = shop
            .create_order(
                &ana,
                &fake_order_request(vec![OrderItem {
                    product_id: tea.id,
                    order_quantity: 1,
                }]),
            )
            .await?;

        let result = shop.read_order(&customer("bo"), order.id).await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);

        assert_eq!(shop.read_order(&ana, order.id).await?.id, order.id);
        assert_eq!(shop.read_order(&admin(), order.id).await?.id, order.id);
        Ok(())
    }

    #[async_std::test]
    async fn order_history_is_paged() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 30).await?;

        let mut created = Vec::new();
        for _ in 0..3 {
            let order = shop
                .create_order(
                    &ana,
                    &fake_order_request(vec![OrderItem {
                        product_id: tea.id,
                        order_quantity: 1,
                    }]),
                )
                .await?;
            created.push(order.id);
        }

        let first = shop
            .list_orders(
                &ana,
                &PageQuery {
                    page: Some(1),
                    page_size: Some(2),
                },
            )
            .await?;
        let second = shop
            .list_orders(
                &ana,
                &PageQuery {
                    page: Some(2),
                    page_size: Some(2),
                },
            )
            .await?;

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);

        let mut seen: Vec<Id> = first.iter().chain(second.iter()).map(|o| o.id).collect();
        seen.sort_unstable();
        created.sort_unstable();
        assert_eq!(seen, created);
        Ok(())
    }

    #[async_std::test]
    async fn malformed_requests_are_rejected() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let ana = customer("ana");
        let tea = seed_product(&shop, 10.0, 10).await?;

        let empty = fake_order_request(vec![]);
        let result = shop.create_order(&ana, &empty).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));

        let mut bad_email = fake_order_request(vec![OrderItem {
            product_id: tea.id,
            order_quantity: 1,
        }]);
        bad_email.email = "not-an-address".to_string();
        let result = shop.create_order(&ana, &bad_email).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));

        let mut bad_postal = fake_order_request(vec![OrderItem {
            product_id: tea.id,
            order_quantity: 1,
        }]);
        bad_postal.address.postal_code = "!!".to_string();
        let result = shop.create_order(&ana, &bad_postal).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        Ok(())
    }
}

#[cfg(test)]
pub mod review_test {
    use super::*;

    #[async_std::test]
    async fn average_follows_create_and_delete() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;

        shop.create_review(&customer("ana"), tea.id, &fake_review(4.0))
            .await?;
        let low = shop
            .create_review(&customer("bo"), tea.id, &fake_review(2.0))
            .await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 3.0);

        shop.delete_review(&customer("bo"), low.id).await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 4.0);
        Ok(())
    }

    #[async_std::test]
    async fn average_resets_when_last_review_goes() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;

        let review = shop
            .create_review(&customer("ana"), tea.id, &fake_review(5.0))
            .await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 5.0);

        shop.delete_review(&customer("ana"), review.id).await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 0.0);
        Ok(())
    }

    #[async_std::test]
    async fn update_triggers_recompute() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;
        let review = shop
            .create_review(&customer("ana"), tea.id, &fake_review(4.0))
            .await?;

        shop.update_review(&customer("ana"), review.id, &fake_review(5.0))
            .await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 5.0);
        Ok(())
    }

    #[async_std::test]
    async fn one_review_per_account_and_product() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;

        shop.create_review(&customer("ana"), tea.id, &fake_review(4.0))
            .await?;
        let result = shop
            .create_review(&customer("ana"), tea.id, &fake_review(1.0))
            .await;

        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));
        assert_eq!(rating_of(&shop, tea.id).await?, 4.0);
        Ok(())
    }

    #[async_std::test]
    async fn only_the_owner_edits_a_review() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;
        let review = shop
            .create_review(&customer("ana"), tea.id, &fake_review(4.0))
            .await?;

        let result = shop
            .update_review(&customer("bo"), review.id, &fake_review(1.0))
            .await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);

        let result = shop.delete_review(&customer("bo"), review.id).await;
        assert_eq!(result.unwrap_err(), ShopError::Forbidden);
        Ok(())
    }

    #[async_std::test]
    async fn privileged_force_delete_recomputes() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;

        shop.create_review(&customer("ana"), tea.id, &fake_review(4.0))
            .await?;
        let low = shop
            .create_review(&customer("bo"), tea.id, &fake_review(2.0))
            .await?;

        shop.delete_review(&developer(), low.id).await?;
        assert_eq!(rating_of(&shop, tea.id).await?, 4.0);
        Ok(())
    }

    #[async_std::test]
    async fn review_input_is_validated() -> Result<(), AnyHow> {
        let shop = new_service().await?;
        let tea = seed_product(&shop, 10.0, 10).await?;

        let result = shop
            .create_review(&customer("ana"), tea.id, &fake_review(5.5))
            .await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));

        let mut long = fake_review(3.0);
        long.comment = "x".repeat(1001);
        let result = shop.create_review(&customer("ana"), tea.id, &long).await;
        assert!(matches!(result.unwrap_err(), ShopError::Validation(_)));

        let result = shop
            .create_review(&customer("ana"), Id::default(), &fake_review(3.0))
            .await;
        assert!(matches!(result.unwrap_err(), ShopError::NotFound(_)));
        Ok(())
    }
}
