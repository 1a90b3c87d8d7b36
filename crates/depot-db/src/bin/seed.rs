//! # Seed Data Generator
//!
//! Populates a database with demo inventory for development.
//!
//! ## Usage
//! ```bash
//! # Generate 100 inventory items (default)
//! cargo run -p depot-db --bin seed
//!
//! # Generate the full catalog (capped at every part/variant combination)
//! cargo run -p depot-db --bin seed -- --count 105
//!
//! # Specify database path
//! cargo run -p depot-db --bin seed -- --db ./data/depot.db
//! ```
//!
//! Every item goes through the record store, so each one leaves a pending
//! `create` task in the outbox, exactly as if a cashier had entered it
//! offline.

use std::env;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use depot_core::InventoryItem;
use depot_db::{Database, DbConfig};

/// Part families for realistic test data
const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "BRK",
        &[
            "Brake Pad",
            "Brake Disc",
            "Brake Caliper",
            "Brake Hose",
            "Brake Fluid",
        ],
    ),
    (
        "FLT",
        &["Oil Filter", "Air Filter", "Fuel Filter", "Cabin Filter"],
    ),
    (
        "ENG",
        &[
            "Spark Plug",
            "Timing Belt",
            "Water Pump",
            "Thermostat",
            "Gasket Set",
        ],
    ),
    (
        "ELC",
        &["Battery", "Alternator", "Starter Motor", "Headlight Bulb"],
    ),
    ("SUS", &["Shock Absorber", "Coil Spring", "Control Arm"]),
];

/// Size / fitment variants
const VARIANTS: &[(&str, i64)] = &[
    ("Front", 0),
    ("Rear", 0),
    ("Standard", 0),
    ("Heavy Duty", 1500),
    ("Performance", 3000),
];

const DEFAULT_COUNT: usize = 100;
const DEFAULT_LOG_FILTER: &str = "info,depot=debug,sqlx=warn";

/// Number of distinct items the catalog can produce.
fn catalog_size() -> usize {
    CATEGORIES.iter().map(|(_, parts)| parts.len()).sum::<usize>() * VARIANTS.len()
}

fn log_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn init_tracing() {
    tracing_subscriber::fmt().with_env_filter(log_filter()).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = env::args().collect();

    let mut count = DEFAULT_COUNT;
    let mut db_path = String::from("./depot_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--count" | "-c" => {
                if i + 1 < args.len() {
                    count = args[i + 1].parse().unwrap_or(DEFAULT_COUNT);
                    i += 1;
                }
            }
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Depot Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!(
                    "  -c, --count <N>    Number of inventory items (default: {}, max: {})",
                    DEFAULT_COUNT,
                    catalog_size()
                );
                println!("  -d, --db <PATH>    Database file path (default: ./depot_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    if count > catalog_size() {
        warn!(
            requested = count,
            max = catalog_size(),
            "Catalog has fewer combinations than requested; capping"
        );
        count = catalog_size();
    }

    info!(db = %db_path, count, "Seeding inventory");

    let db = Database::new(DbConfig::new(&db_path)).await?;
    let items = db.typed::<InventoryItem>();

    let existing = db.records().count("inventory").await?;
    if existing > 0 {
        warn!(
            existing,
            "Database already has inventory; delete the file to regenerate"
        );
        return Ok(());
    }

    let start = std::time::Instant::now();
    let mut generated = 0;

    'outer: for (category_idx, (code, parts)) in CATEGORIES.iter().enumerate() {
        for (part_idx, part) in parts.iter().enumerate() {
            for (variant_idx, (variant, price_addon)) in VARIANTS.iter().enumerate() {
                if generated >= count {
                    break 'outer;
                }

                let seed = category_idx * 1000 + part_idx * 20 + variant_idx;
                let item = generate_item(code, part, variant, *price_addon, seed);

                if let Err(e) = items.create(&item).await {
                    warn!(name = %item.name, error = %e, "Failed to insert item");
                    continue;
                }
                generated += 1;
            }
        }
    }

    let counts = db.outbox().count_by_status().await?;
    info!(
        generated,
        pending_tasks = counts.pending,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Seed complete"
    );

    db.close().await;
    Ok(())
}

/// Generates a single inventory item with plausible data.
fn generate_item(
    code: &str,
    part: &str,
    variant: &str,
    price_addon: i64,
    seed: usize,
) -> InventoryItem {
    let sku = format!("{}-{:04}", code, seed);
    let price_cents = 999 + ((seed * 37) % 9000) as i64 + price_addon;
    let stock = (seed % 41) as i64;

    InventoryItem {
        name: format!("{} {}", part, variant),
        stock,
        sku: Some(sku),
        price_cents: Some(price_cents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Level;

    #[test]
    fn test_default_filter_quiets_sqlx() {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new(DEFAULT_LOG_FILTER))
            .finish();

        tracing::subscriber::with_default(subscriber, || {
            assert!(!tracing::enabled!(target: "sqlx::query", Level::DEBUG));
            assert!(tracing::enabled!(target: "sqlx::query", Level::WARN));
            assert!(tracing::enabled!(target: "depot_db", Level::INFO));
        });
    }

    #[test]
    fn test_catalog_size_covers_default_count() {
        assert_eq!(catalog_size(), 105);
        assert!(DEFAULT_COUNT <= catalog_size());
    }
}
