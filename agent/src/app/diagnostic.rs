//! One-shot backend diagnostic for `--diagnostic`

use colored::Colorize;
use tokio::net::TcpStream;

use crate::app::options::AppOptions;
use crate::app::state::build_adapters;
use crate::models::health::{Component, ProbeResult};

/// Probe the broker and every enabled backend once and print a report.
/// Returns whether everything answered.
pub async fn run_diagnostic(options: &AppOptions) -> bool {
    let timeout = options.health_worker.probe_timeout;
    let mut healthy = true;

    println!("{}", "edgemgr diagnostic".bold());

    let broker = &options.mqtt_worker.broker_address;
    let addr = format!("{}:{}", broker.host, broker.port);
    let transport = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(_)) => ProbeResult::Alive,
        Ok(Err(e)) => ProbeResult::Unreachable(format!("{addr}: {e}")),
        Err(_) => ProbeResult::Failed(format!("{addr}: timed out after {timeout:?}")),
    };
    healthy &= print_result(Component::Transport, &transport);

    let adapters = match build_adapters(options) {
        Ok(adapters) => adapters,
        Err(e) => {
            println!("  {} backends: {}", "×".red(), e);
            return false;
        }
    };
    if adapters.is_empty() {
        println!("  {} no backend enabled", "!".yellow());
        return false;
    }

    for adapter in adapters.iter() {
        let result = match tokio::time::timeout(timeout, adapter.probe()).await {
            Ok(result) => result,
            Err(_) => ProbeResult::Failed(format!("probe timed out after {timeout:?}")),
        };
        healthy &= print_result(Component::for_target(adapter.kind()), &result);
    }

    healthy
}

fn print_result(component: Component, result: &ProbeResult) -> bool {
    match result {
        ProbeResult::Alive => {
            println!("  {} {}", "✓".green(), component);
            true
        }
        ProbeResult::Failed(reason) => {
            println!("  {} {} {}", "!".yellow(), component, reason.dimmed());
            false
        }
        ProbeResult::Unreachable(reason) => {
            println!("  {} {} {}", "×".red(), component, reason.dimmed());
            false
        }
    }
}
