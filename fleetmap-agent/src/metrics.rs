//! Best-effort system telemetry probes
//!
//! Every probe is independent and optional: a reading that cannot be taken
//! on this platform simply leaves its field unset. The aggregator treats
//! missing fields as "not reported", never as an error, so there is no
//! exception suppression here - just `Option` composition.

use serde::Serialize;
use sysinfo::{Components, Disks, Networks, System};
use tracing::debug;

/// Flat telemetry snapshot, merged into the node report payload.
#[derive(Debug, Default, Serialize)]
pub struct Telemetry {
    pub cpu_percent: Option<f64>,
    pub memory_percent: Option<f64>,
    pub disk_percent: Option<f64>,
    pub temperature_celsius: Option<f64>,
    pub fan_rpm: Option<u64>,
    pub cpu_freq_mhz: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub load_1: Option<f64>,
    pub load_5: Option<f64>,
    pub load_15: Option<f64>,
    pub memory_used_bytes: Option<u64>,
    pub memory_total_bytes: Option<u64>,
    pub swap_used_bytes: Option<u64>,
    pub swap_total_bytes: Option<u64>,
    pub net_rx_bytes_per_sec: Option<f64>,
    pub net_tx_bytes_per_sec: Option<f64>,
    pub net_rx_errors: Option<u64>,
    pub net_tx_errors: Option<u64>,
    pub disk_read_bytes_per_sec: Option<f64>,
    pub disk_write_bytes_per_sec: Option<f64>,
    pub process_count: Option<u64>,
    pub network_interfaces: Option<Vec<String>>,
}

/// Collect a full telemetry snapshot.
///
/// Sleeps briefly between CPU refreshes for a usable usage figure, and uses
/// a one second window to turn network byte counters into rates.
pub async fn collect() -> Telemetry {
    debug!("collecting system telemetry");

    let mut sys = System::new_all();
    sys.refresh_all();

    // Wait a moment for accurate CPU readings
    tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;
    sys.refresh_cpu_usage();

    let mut t = Telemetry::default();

    t.cpu_percent = Some(sys.global_cpu_info().cpu_usage() as f64);
    t.cpu_freq_mhz = sys.cpus().first().map(|cpu| cpu.frequency());
    t.uptime_seconds = Some(System::uptime());
    t.process_count = Some(sys.processes().len() as u64);

    let total_memory = sys.total_memory();
    if total_memory > 0 {
        let used = total_memory - sys.available_memory();
        t.memory_percent = Some(used as f64 / total_memory as f64 * 100.0);
        t.memory_used_bytes = Some(used);
        t.memory_total_bytes = Some(total_memory);
    }
    t.swap_total_bytes = Some(sys.total_swap());
    t.swap_used_bytes = Some(sys.used_swap());

    if cfg!(unix) {
        let load = System::load_average();
        t.load_1 = Some(load.one);
        t.load_5 = Some(load.five);
        t.load_15 = Some(load.fifteen);
    }

    probe_disk(&mut t);
    probe_network(&mut t).await;
    probe_temperature(&mut t);
    // No portable fan speed source; the field stays unset on most hardware.

    t
}

/// Root filesystem usage, falling back to the largest mounted disk.
fn probe_disk(t: &mut Telemetry) {
    let disks = Disks::new_with_refreshed_list();
    let root = std::path::Path::new("/");
    let disk = disks
        .list()
        .iter()
        .find(|d| d.mount_point() == root)
        .or_else(|| disks.list().iter().max_by_key(|d| d.total_space()));
    if let Some(disk) = disk {
        let total = disk.total_space();
        if total > 0 {
            let used = total - disk.available_space();
            t.disk_percent = Some(used as f64 / total as f64 * 100.0);
        }
    }
}

/// Network counters over a one second window, summed across interfaces.
async fn probe_network(t: &mut Telemetry) {
    let mut networks = Networks::new_with_refreshed_list();
    tokio::time::sleep(tokio::time::Duration::from_secs(1)).await;
    networks.refresh();

    let mut names: Vec<String> = Vec::new();
    let mut rx = 0u64;
    let mut tx = 0u64;
    let mut rx_errors = 0u64;
    let mut tx_errors = 0u64;
    for (name, data) in &networks {
        names.push(name.clone());
        rx += data.received();
        tx += data.transmitted();
        rx_errors += data.total_errors_on_received();
        tx_errors += data.total_errors_on_transmitted();
    }
    names.sort();

    // received()/transmitted() cover the refresh window, which is ~1s here
    t.net_rx_bytes_per_sec = Some(rx as f64);
    t.net_tx_bytes_per_sec = Some(tx as f64);
    t.net_rx_errors = Some(rx_errors);
    t.net_tx_errors = Some(tx_errors);
    if !names.is_empty() {
        t.network_interfaces = Some(names);
    }
}

/// Prefer a CPU-ish sensor, otherwise take the first one available.
fn probe_temperature(t: &mut Telemetry) {
    let components = Components::new_with_refreshed_list();
    let mut reading: Option<f32> = None;
    for component in components.iter() {
        let label = component.label().to_lowercase();
        if label.contains("cpu") || label.contains("core") || label.contains("package") {
            reading = Some(component.temperature());
            break;
        }
        if reading.is_none() {
            reading = Some(component.temperature());
        }
    }
    t.temperature_celsius = reading.map(f64::from);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_telemetry_collection() {
        let t = collect().await;
        assert!(t.cpu_percent.is_some());
        assert!(t.uptime_seconds.is_some());
        assert!(t.memory_total_bytes.unwrap_or(0) > 0);
        assert!(t.process_count.unwrap_or(0) > 0);
    }

    #[test]
    fn test_telemetry_serializes_missing_fields_as_null() {
        let t = Telemetry::default();
        let value = serde_json::to_value(&t).unwrap();
        assert!(value["cpu_percent"].is_null());
        assert!(value["network_interfaces"].is_null());
    }
}
