//! Greedy energy-aware load allocation
//!
//! Servers are filled in descending efficiency order. Energy is linear in load
//! per server, so saturating the most efficient servers first minimizes total
//! energy for any feasible assignment bounded by capacity.
//!
//! Load beyond the total capacity of the catalog is left unallocated rather
//! than rejected; callers can read it from [`AllocationSummary::unallocated`].

use crate::error::{EcoError, Result};
use crate::models::{AllocationEntry, AllocationSummary, Server};
use std::cmp::Ordering;
use tracing::{debug, warn};

/// Distribute `total_load` across `servers`, one entry per server.
///
/// Entries come back in allocation order (descending efficiency, ties in
/// catalog order). Once the load is exhausted, remaining servers get zero.
pub fn allocate(total_load: f64, servers: &[Server]) -> Result<Vec<AllocationEntry>> {
    if !total_load.is_finite() {
        return Err(EcoError::InvalidInput(format!(
            "total load must be finite, got {}",
            total_load
        )));
    }
    if total_load < 0.0 {
        return Err(EcoError::InvalidInput(format!(
            "total load must not be negative, got {}",
            total_load
        )));
    }

    let mut ordered: Vec<&Server> = servers.iter().collect();
    // sort_by is stable, so equal efficiencies keep catalog order
    ordered.sort_by(|a, b| {
        b.efficiency
            .partial_cmp(&a.efficiency)
            .unwrap_or(Ordering::Equal)
    });

    let mut remaining = total_load;
    let entries: Vec<AllocationEntry> = ordered
        .into_iter()
        .map(|server| {
            if remaining > 0.0 {
                let allocated = remaining.min(server.capacity);
                remaining -= allocated;
                AllocationEntry {
                    server_id: server.id,
                    allocated_load: allocated,
                    energy_consumption: server.energy_for(allocated),
                }
            } else {
                AllocationEntry {
                    server_id: server.id,
                    allocated_load: 0.0,
                    energy_consumption: 0.0,
                }
            }
        })
        .collect();

    if remaining > 0.0 {
        warn!(
            total_load = total_load,
            unallocated = remaining,
            "Requested load exceeds cluster capacity, remainder left unallocated"
        );
    } else {
        debug!(total_load = total_load, servers = entries.len(), "Load allocated");
    }

    Ok(entries)
}

/// Allocate and summarize in one call
pub fn allocate_with_summary(
    total_load: f64,
    servers: &[Server],
) -> Result<(Vec<AllocationEntry>, AllocationSummary)> {
    let entries = allocate(total_load, servers)?;
    let summary = AllocationSummary::from_entries(total_load, &entries);
    Ok((entries, summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServerCatalog;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPS: f64 = 1e-9;

    fn reference_servers() -> Vec<Server> {
        ServerCatalog::default().to_vec()
    }

    fn random_servers(rng: &mut StdRng) -> Vec<Server> {
        let count = rng.gen_range(1..8);
        (0..count)
            .map(|i| {
                // Coarse efficiencies so ties actually happen
                let efficiency = rng.gen_range(1..=5) as f64 / 5.0;
                Server::new(i, rng.gen_range(1.0..500.0), efficiency)
            })
            .collect()
    }

    fn allocated_sum(entries: &[AllocationEntry]) -> f64 {
        entries.iter().map(|e| e.allocated_load).sum()
    }

    #[test]
    fn test_reference_example() {
        let entries = allocate(250.0, &reference_servers()).unwrap();
        let ids: Vec<u32> = entries.iter().map(|e| e.server_id).collect();
        assert_eq!(ids, vec![3, 1, 2]);

        assert!((entries[0].allocated_load - 200.0).abs() < EPS);
        assert!((entries[0].energy_consumption - 222.222_222_222).abs() < 1e-6);
        assert!((entries[1].allocated_load - 50.0).abs() < EPS);
        assert!((entries[1].energy_consumption - 62.5).abs() < EPS);
        assert_eq!(entries[2].allocated_load, 0.0);
        assert_eq!(entries[2].energy_consumption, 0.0);
    }

    #[test]
    fn test_zero_load_gives_all_zero_entries() {
        let entries = allocate(0.0, &reference_servers()).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries
            .iter()
            .all(|e| e.allocated_load == 0.0 && e.energy_consumption == 0.0));
    }

    #[test]
    fn test_negative_and_non_finite_load_rejected() {
        let servers = reference_servers();
        assert!(matches!(
            allocate(-1.0, &servers),
            Err(EcoError::InvalidInput(_))
        ));
        assert!(matches!(
            allocate(f64::NAN, &servers),
            Err(EcoError::InvalidInput(_))
        ));
        assert!(matches!(
            allocate(f64::INFINITY, &servers),
            Err(EcoError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_over_capacity_leaves_remainder() {
        let (entries, summary) = allocate_with_summary(1000.0, &reference_servers()).unwrap();
        assert!((allocated_sum(&entries) - 450.0).abs() < EPS);
        assert!((summary.unallocated - 550.0).abs() < EPS);
        for entry in &entries {
            let server = ServerCatalog::default()
                .iter()
                .find(|s| s.id == entry.server_id)
                .copied()
                .unwrap();
            assert!((entry.allocated_load - server.capacity).abs() < EPS);
        }
    }

    #[test]
    fn test_equal_efficiency_keeps_catalog_order() {
        let servers = vec![
            Server::new(10, 50.0, 0.5),
            Server::new(11, 50.0, 0.9),
            Server::new(12, 50.0, 0.5),
            Server::new(13, 50.0, 0.9),
        ];
        let entries = allocate(120.0, &servers).unwrap();
        let ids: Vec<u32> = entries.iter().map(|e| e.server_id).collect();
        assert_eq!(ids, vec![11, 13, 10, 12]);
        assert_eq!(entries[2].allocated_load, 20.0);
        assert_eq!(entries[3].allocated_load, 0.0);
    }

    #[test]
    fn test_empty_server_list() {
        let entries = allocate(10.0, &[]).unwrap();
        assert!(entries.is_empty());
    }

    #[test]
    fn test_conservation_within_capacity() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..500 {
            let servers = random_servers(&mut rng);
            let capacity: f64 = servers.iter().map(|s| s.capacity).sum();
            let load = rng.gen_range(0.0..=capacity);
            let entries = allocate(load, &servers).unwrap();
            assert_eq!(entries.len(), servers.len());
            assert!((allocated_sum(&entries) - load).abs() < 1e-6 * capacity.max(1.0));
        }
    }

    #[test]
    fn test_conservation_over_capacity() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..500 {
            let servers = random_servers(&mut rng);
            let capacity: f64 = servers.iter().map(|s| s.capacity).sum();
            let load = capacity + rng.gen_range(0.001..1000.0);
            let entries = allocate(load, &servers).unwrap();
            assert!((allocated_sum(&entries) - capacity).abs() < 1e-6 * capacity);
        }
    }

    #[test]
    fn test_order_and_no_interleaved_zeros() {
        let mut rng = StdRng::seed_from_u64(23);
        for _ in 0..500 {
            let servers = random_servers(&mut rng);
            let capacity: f64 = servers.iter().map(|s| s.capacity).sum();
            let load = rng.gen_range(0.0..capacity * 1.2);
            let entries = allocate(load, &servers).unwrap();

            let efficiencies: Vec<f64> = entries
                .iter()
                .map(|e| servers.iter().find(|s| s.id == e.server_id).unwrap().efficiency)
                .collect();
            assert!(efficiencies.windows(2).all(|w| w[0] >= w[1]));

            // Once a server is left empty, every later server is empty too
            if let Some(first_zero) = entries.iter().position(|e| e.allocated_load == 0.0) {
                assert!(entries[first_zero..].iter().all(|e| e.allocated_load == 0.0));
            }
            // Every server before the last non-zero one is saturated
            if let Some(last_used) = entries.iter().rposition(|e| e.allocated_load > 0.0) {
                for entry in &entries[..last_used] {
                    let cap = servers.iter().find(|s| s.id == entry.server_id).unwrap().capacity;
                    assert!((entry.allocated_load - cap).abs() < EPS);
                }
            }
        }
    }

    #[test]
    fn test_energy_matches_efficiency() {
        let servers = reference_servers();
        let entries = allocate(333.0, &servers).unwrap();
        for entry in entries {
            let server = servers.iter().find(|s| s.id == entry.server_id).unwrap();
            assert!((entry.energy_consumption - entry.allocated_load / server.efficiency).abs() < EPS);
        }
    }
}
