//! Insert a few nested documents and query them three ways
//!
//! ```bash
//! RUST_LOG=jx_sql=debug cargo run -p jx-duck --example cube
//! ```

use jx_duck::Database;
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let db = Database::in_memory()?;
    db.insert(
        "orders",
        &[
            json!({"customer": "ann", "region": "east", "lines": [{"sku": "a", "qty": 2}, {"sku": "b", "qty": 1}]}),
            json!({"customer": "bob", "region": "west", "lines": [{"sku": "a", "qty": 5}]}),
            json!({"customer": "cy", "lines": []}),
        ],
    )
    .await?;

    let queries = [
        json!({"from": "orders", "sort": "customer"}),
        json!({"from": "orders.lines", "select": ["sku", "qty"], "where": {"gt": {"qty": 1}}, "sort": "qty"}),
        json!({
            "from": "orders",
            "edges": [{"name": "region", "value": "region", "allowNulls": true}],
            "select": [
                {"name": "orders", "aggregate": "count"},
                {"name": "units", "value": "lines.qty", "aggregate": "sum"}
            ],
            "format": "cube"
        }),
    ];
    for query in &queries {
        println!("{query}");
        println!("  => {}\n", serde_json::to_string_pretty(&db.query(query).await?)?);
    }
    Ok(())
}
