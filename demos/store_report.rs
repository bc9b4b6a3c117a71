//! Example generating a store report with retries and fallback content.
//!
//! This example shows how to:
//! - Configure a client from `CHATGUARD_*` environment variables
//! - Retry with exponential backoff
//! - Pass structured fields to the fallback provider
//! - Tell real output from fallback output
//!
//! Without `CHATGUARD_ENDPOINT` set, the client points at a closed local
//! port so the fallback path is exercised.
//!
//! Run with: `cargo run --example store_report`

use chatguard::{
    Client, ClientBuilder, Error, FallbackFields, GenerationOptions, RetryPolicy,
    TemplateFallback,
};
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("chatguard=info,store_report=info")
        .init();

    let builder = match ClientBuilder::from_env() {
        Ok(builder) => builder,
        Err(e) => {
            println!("{} - using an unreachable local endpoint", e);
            Client::builder().endpoint("http://127.0.0.1:9/v1/chat/completions")?
        }
    };

    let client = builder
        .timeout(Duration::from_secs(20))
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(500), 2.0)?)
        .fallback(TemplateFallback::store_report()?.with_latency(Duration::from_millis(300)))
        .build()?;

    let fields = FallbackFields::new()
        .with("store_name", "Golden Dumpling")
        .with("category", "Dumplings")
        .with("price_range", "35-50 CNY")
        .with("location", "Chengdu");

    let prompt = fields
        .iter()
        .map(|(name, value)| format!("{}: {}", name.replace('_', " "), value))
        .collect::<Vec<_>>()
        .join("\n");

    println!("=== Generating report ===");
    match client
        .generate_content_with_fields(
            &format!("Write an operations report for this store.\n{}", prompt),
            &GenerationOptions::default().temperature(0.5),
            &fields,
        )
        .await
    {
        Ok(report) => {
            println!("Attempts: {}", report.attempts);
            println!("Latency: {:?}", report.latency);
            if let Some(reason) = &report.fallback_reason {
                println!("Fallback used: {} ({:?})", reason.message, reason.kind);
            }
            println!("{}", report.content);
        }
        Err(Error::Configuration(message)) => println!("Bad configuration: {}", message),
        Err(e) => println!("Failed: {}", e),
    }

    println!("\n=== Without fallback ===");
    let strict = client
        .to_builder()
        .without_fallback()
        .retry_policy(RetryPolicy::single_attempt())
        .build()?;
    match strict
        .generate_content("Store name: Golden Dumpling", &GenerationOptions::default())
        .await
    {
        Ok(report) => println!("{}", report.content),
        Err(e) => {
            let summary = e.summary();
            println!("Error: {}", summary.message);
            println!("  Status code: {:?}", summary.status_code);
            println!("  Client error: {}", summary.is_client_error);
            println!("  Retryable: {}", e.root().is_retryable());
        }
    }

    Ok(())
}
