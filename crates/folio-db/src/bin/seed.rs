//! # Seed Data Generator
//!
//! Populates a development database with a small catalog, a few offers and
//! the `SAVE10` coupon.
//!
//! ## Usage
//! ```bash
//! # Uses FOLIO_DATABASE_PATH or ./folio_dev.db
//! cargo run -p folio-db --bin seed
//!
//! # Specify database path
//! cargo run -p folio-db --bin seed -- --db ./data/folio.db
//! ```
//!
//! ## Generated Data
//! - Categories with and without a return-window override
//! - Books priced 150 - 900 with stock 0 - 40
//! - One product offer and one category offer, running 30 days
//! - `SAVE10`: 10% off orders of 500+, capped at 200, 100 uses
//! - `FLAT50`: 50 off any order, 20 uses

use chrono::{Duration, Utc};
use folio_core::coupon::NewCoupon;
use folio_core::{Caller, CouponType, Money, OfferTarget, Percent};
use folio_db::{Database, EngineConfig};
use std::env;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// (name, return window override, titles)
const CATEGORIES: &[(&str, Option<i64>, &[&str])] = &[
    (
        "Fiction",
        None,
        &[
            "The Glass Orchard",
            "Northern Lights Hotel",
            "A River Without Names",
            "Salt and Cedar",
            "The Clockmaker's Daughter",
        ],
    ),
    (
        "Science",
        None,
        &[
            "Small Numbers, Big Worlds",
            "The Patient Atom",
            "Tides of the Deep Ocean",
            "Field Guide to Fungi",
        ],
    ),
    (
        "Magazines",
        Some(2),
        &["Monthly Review #41", "Coastal Living #12", "Retro Computing #7"],
    ),
    (
        "Textbooks",
        Some(14),
        &[
            "Linear Algebra, 3rd Edition",
            "Introductory Microeconomics",
            "Organic Chemistry Workbook",
        ],
    ),
];

const SEED_ADMIN: Caller = Caller::admin(1);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let mut config = EngineConfig::load()?;

    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    config.database_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Folio Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: $FOLIO_DATABASE_PATH or ./folio_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    info!(path = %config.database_path, "Seeding database");

    let db = Database::new(config.db_config()).await?.with_policy(config.policy());

    if db.coupons().get_by_code("SAVE10").await?.is_some() {
        println!("Database already seeded; delete {} to regenerate.", config.database_path);
        return Ok(());
    }

    let now = Utc::now();
    let mut first_book = None;
    let mut books = 0;

    for (cat_idx, (name, window, titles)) in CATEGORIES.iter().enumerate() {
        let category = db.catalog().insert_category(name, *window).await?;

        for (idx, title) in titles.iter().enumerate() {
            let seed = cat_idx * 10 + idx;
            let price = Money::from_major(150 + ((seed * 137) % 750) as i64);
            let stock = ((seed * 7) % 41) as i64;

            let book = db.catalog().insert_book(title, price, stock, category.id).await?;
            first_book.get_or_insert(book.id);
            books += 1;
        }

        if cat_idx == 1 {
            db.offers()
                .create_offer(
                    OfferTarget::Category,
                    category.id,
                    Percent::parse("15")?,
                    now,
                    now + Duration::days(30),
                )
                .await?;
        }
    }

    if let Some(book_id) = first_book {
        db.offers()
            .create_offer(
                OfferTarget::Product,
                book_id,
                Percent::parse("20")?,
                now,
                now + Duration::days(30),
            )
            .await?;
    }

    let save10 = db
        .coupon_service()
        .create_coupon(
            SEED_ADMIN,
            NewCoupon {
                code: "SAVE10".to_string(),
                coupon_type: CouponType::Percent,
                value: Money::from_major(10),
                min_order_value: Money::from_major(500),
                max_discount: Money::from_major(200),
                expiry: now + Duration::days(90),
                usage_limit: 100,
            },
            now,
        )
        .await?;

    db.coupon_service()
        .create_coupon(
            SEED_ADMIN,
            NewCoupon {
                code: "FLAT50".to_string(),
                coupon_type: CouponType::Flat,
                value: Money::from_major(50),
                min_order_value: Money::zero(),
                max_discount: Money::zero(),
                expiry: now + Duration::days(30),
                usage_limit: 20,
            },
            now,
        )
        .await?;

    info!(books, categories = CATEGORIES.len(), "Seed complete");

    println!("Seeded {} books in {} categories", books, CATEGORIES.len());
    println!("{}", serde_json::to_string_pretty(&save10)?);

    Ok(())
}

/// `RUST_LOG` overrides the default filter.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,folio_db=debug,sqlx=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}
