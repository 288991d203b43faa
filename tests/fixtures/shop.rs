use fake::faker::address::en::{CityName, StateName, StreetName, ZipCode};
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::Sentence;
use fake::faker::name::en::Name;
use fake::Fake;

use storefront::shop::{Address, Id, OrderItem, Product, ReviewInput, SqlOrderRequest};

pub fn fake_product() -> Product {
    Product {
        title: Name().fake(),
        description: Sentence(3..8).fake(),
        price: (100.0f32..1000.0f32).fake::<f32>(),
        stock_quantity: 10,
    }
}

pub fn fake_product_priced(price: f32, stock_quantity: i32) -> Product {
    Product {
        price,
        stock_quantity,
        ..fake_product()
    }
}

pub fn fake_address() -> Address {
    Address {
        street: StreetName().fake(),
        city: CityName().fake(),
        state: StateName().fake(),
        postal_code: ZipCode().fake(),
    }
}

pub fn fake_order_request(products: Vec<OrderItem<Id>>) -> SqlOrderRequest {
    SqlOrderRequest {
        products,
        total_amount: None,
        name: Name().fake(),
        email: SafeEmail().fake(),
        address: fake_address(),
    }
}

pub fn fake_review(rating: f32) -> ReviewInput {
    ReviewInput {
        rating,
        comment: Sentence(3..10).fake(),
    }
}
