//! Cluster, usage and allocation commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{AllocationEntry, ApiClient};
use crate::output::{
    color_allocated, format_amount, format_efficiency, format_utilization, print_info,
    print_json, print_table, print_warning, OutputFormat,
};

/// Row for servers table
#[derive(Tabled)]
struct ServerRow {
    #[tabled(rename = "Server")]
    id: u32,
    #[tabled(rename = "Capacity")]
    capacity: String,
    #[tabled(rename = "Efficiency")]
    efficiency: String,
}

/// Row for usage table
#[derive(Tabled)]
struct UsageRow {
    #[tabled(rename = "Server")]
    server_id: u32,
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Usage")]
    usage: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Energy")]
    energy: String,
}

/// Row for allocation table
#[derive(Tabled)]
struct AllocationRow {
    #[tabled(rename = "Server")]
    server_id: u32,
    #[tabled(rename = "Allocated")]
    allocated: String,
    #[tabled(rename = "Energy")]
    energy: String,
}

/// List the configured servers
pub async fn show_servers(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let servers = client.servers().await?;

    match format {
        OutputFormat::Json => print_json(&servers)?,
        OutputFormat::Table => {
            let total: f64 = servers.iter().map(|s| s.capacity).sum();
            let rows = servers
                .iter()
                .map(|s| ServerRow {
                    id: s.id,
                    capacity: format_amount(s.capacity),
                    efficiency: format_efficiency(s.efficiency),
                })
                .collect();
            print_table(rows);
            println!("\nTotal capacity: {}", format_amount(total));
        }
    }

    Ok(())
}

/// Sample current usage on every server
pub async fn show_usage(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let readings = client.usage().await?;

    match format {
        OutputFormat::Json => print_json(&readings)?,
        OutputFormat::Table => {
            // Capacities come from the catalog; readings only carry the server id
            let servers = client.servers().await?;
            let capacity_of = |id: u32| {
                servers
                    .iter()
                    .find(|s| s.id == id)
                    .map(|s| s.capacity)
                    .unwrap_or(0.0)
            };

            let total: f64 = readings.iter().map(|r| r.usage).sum();
            let energy: f64 = readings.iter().map(|r| r.energy_consumption).sum();
            let rows = readings
                .iter()
                .map(|r| UsageRow {
                    server_id: r.server_id,
                    timestamp: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                    usage: format_amount(r.usage),
                    utilization: format_utilization(r.usage, capacity_of(r.server_id)),
                    energy: format_amount(r.energy_consumption),
                })
                .collect();
            print_table(rows);
            println!(
                "\nTotal load: {}   Total energy: {}",
                format_amount(total),
                format_amount(energy)
            );
        }
    }

    Ok(())
}

/// Allocate the load observed right now
pub async fn optimize(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let entries = client.optimize().await?;
    render_allocation(&entries, None, format)
}

/// Allocate an explicit total load
pub async fn allocate(client: &ApiClient, total_load: f64, format: OutputFormat) -> Result<()> {
    let entries = client.allocate(total_load).await?;
    render_allocation(&entries, Some(total_load), format)
}

fn render_allocation(
    entries: &[AllocationEntry],
    requested: Option<f64>,
    format: OutputFormat,
) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(entries)?,
        OutputFormat::Table => {
            let allocated: f64 = entries.iter().map(|e| e.allocated_load).sum();
            let energy: f64 = entries.iter().map(|e| e.energy_consumption).sum();

            let rows = entries
                .iter()
                .map(|e| AllocationRow {
                    server_id: e.server_id,
                    allocated: color_allocated(e.allocated_load),
                    energy: format_amount(e.energy_consumption),
                })
                .collect();
            print_table(rows);
            println!(
                "\nAllocated: {}   Energy: {}",
                format_amount(allocated),
                format_amount(energy)
            );

            if let Some(requested) = requested {
                let unallocated = requested - allocated;
                if unallocated > 1e-9 {
                    print_warning(&format!(
                        "{} load units exceed cluster capacity and were not allocated",
                        format_amount(unallocated)
                    ));
                }
            } else {
                print_info("Allocation computed from a fresh usage sample");
            }
        }
    }

    Ok(())
}
