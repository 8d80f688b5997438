//! Model inspection and rollback commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_state, print_json, print_success, print_table, print_warning, OutputFormat,
};

/// Row for model versions table
#[derive(Tabled)]
struct VersionRow {
    #[tabled(rename = "Version")]
    version: String,
    #[tabled(rename = "Active")]
    active: String,
}

/// Show the served model and stored versions
pub async fn show(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let info = client.model().await?;

    match format {
        OutputFormat::Json => print_json(&info)?,
        OutputFormat::Table => {
            println!("State:    {}", color_state(&info.state));
            if let Some(version) = &info.model_version {
                println!("Version:  {}", version);
            }
            if let Some(mse) = info.mse {
                println!("MSE:      {:.4}", mse);
            }
            if let Some(trained_at) = info.trained_at {
                println!("Trained:  {}", trained_at.format("%Y-%m-%d %H:%M:%S"));
            }

            if info.versions.is_empty() {
                print_warning("No stored model versions");
                return Ok(());
            }

            println!();
            let rows = info
                .versions
                .iter()
                .rev()
                .map(|v| VersionRow {
                    version: v.clone(),
                    active: if info.model_version.as_deref() == Some(v.as_str()) {
                        "✓".to_string()
                    } else {
                        String::new()
                    },
                })
                .collect();
            print_table(rows);
        }
    }

    Ok(())
}

/// Switch back to the previous stored version
pub async fn rollback(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response = client.rollback().await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => match (&response.previous_version, &response.current_version) {
            (Some(from), Some(to)) if response.rolled_back => {
                print_success(&format!("Rolled back from {} to {}", from, to));
            }
            (Some(current), _) => {
                print_warning(&format!("No version older than {} to roll back to", current));
            }
            (None, _) => print_warning("No trained model to roll back"),
        },
    }

    Ok(())
}
