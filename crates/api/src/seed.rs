//! Demo catalog for running without a database.

use common::Money;
use store::{Customer, InMemoryStore, NewProduct};

/// Principal linked to the demo customer.
pub const DEMO_PRINCIPAL: &str = "demo";

/// Seeds categories, brands, a few products and a demo customer.
pub async fn seed_demo_catalog(store: &InMemoryStore) {
    let men = store.insert_category("Men").await;
    let women = store.insert_category("Women").await;
    let accessories = store.insert_category("Accessories").await;
    store.insert_category("Shoes").await;

    let studio_slow = store.insert_brand("STUDIO SLOW").await;
    let abra = store.insert_brand("ABRA").await;
    let minimal = store.insert_brand("MINIMAL").await;

    store
        .insert_product(
            NewProduct::new("Oversized sweatshirt", Money::from_cents(5990), 20, men.id)
                .description("Relaxed cotton sweatshirt")
                .brand(studio_slow.id)
                .sizes(&["S", "M", "L", "XL"])
                .colors(&["Black", "White", "Grey"]),
        )
        .await;
    store
        .insert_product(
            NewProduct::new("Knitted turtleneck", Money::from_cents(7490), 15, women.id)
                .description("Warm merino turtleneck")
                .brand(abra.id)
                .sizes(&["XS", "S", "M", "L"])
                .colors(&["Beige", "Black"]),
        )
        .await;
    store
        .insert_product(
            NewProduct::new("Leather bag", Money::from_cents(12990), 8, accessories.id)
                .description("Minimal bag in full-grain leather")
                .brand(minimal.id)
                .colors(&["Black", "Brown"]),
        )
        .await;

    store
        .insert_customer(
            DEMO_PRINCIPAL,
            Customer::new("Demo Shopper", "demo@example.com", "555-0100"),
        )
        .await;

    tracing::info!(principal = DEMO_PRINCIPAL, "seeded demo catalog");
}
