//! Prediction, forecast and training commands

use anyhow::Result;
use chrono::NaiveDateTime;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    format_amount, print_json, print_success, print_table, print_warning, OutputFormat,
};

/// Row for forecast table
#[derive(Tabled)]
struct ForecastRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Predicted Load")]
    predicted_load: String,
    #[tabled(rename = "Source")]
    source: String,
}

/// Predict load at one timestamp (the server defaults to one hour ahead)
pub async fn predict(
    client: &ApiClient,
    at: Option<NaiveDateTime>,
    format: OutputFormat,
) -> Result<()> {
    let point = client.predict(at).await?;

    match format {
        OutputFormat::Json => print_json(&point)?,
        OutputFormat::Table => {
            println!(
                "Predicted load at {}: {}",
                point.timestamp.format("%Y-%m-%d %H:%M"),
                format_amount(point.predicted_load)
            );
        }
    }

    Ok(())
}

/// Hourly forecast from the current hour
pub async fn forecast(
    client: &ApiClient,
    hours: u32,
    zero_fallback: bool,
    format: OutputFormat,
) -> Result<()> {
    let points = client.forecast(hours, zero_fallback).await?;

    match format {
        OutputFormat::Json => print_json(&points)?,
        OutputFormat::Table => {
            let substituted = points.iter().filter(|p| p.fallback).count();
            let rows = points
                .iter()
                .map(|p| ForecastRow {
                    timestamp: p.timestamp.format("%Y-%m-%d %H:%M").to_string(),
                    predicted_load: format_amount(p.predicted_load),
                    source: if p.fallback { "fallback" } else { "model" }.to_string(),
                })
                .collect();
            print_table(rows);

            if substituted > 0 {
                print_warning(&format!(
                    "{} of {} points are zero fallbacks; train a model first",
                    substituted,
                    points.len()
                ));
            }
        }
    }

    Ok(())
}

/// Train the forecast model on the server's usage history
pub async fn train(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report = client.train().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            print_success(&format!("Trained model {}", report.model_version));
            println!("  Held-out MSE:   {:.4}", report.mse);
            println!("  Training rows:  {}", report.train_rows);
            println!("  Test rows:      {}", report.test_rows);
            println!(
                "  Trained at:     {}",
                report.trained_at.format("%Y-%m-%d %H:%M:%S")
            );
        }
    }

    Ok(())
}
