// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! `polyrt status`: device capabilities and the runtimes they allow.

use device_monitor::{CapabilityReader, SystemReader};
use model_bundle::RuntimeKind;

pub async fn execute(config: &runtime::RuntimeConfig) -> anyhow::Result<()> {
    super::banner("Device Status");

    let caps = SystemReader::new().capture();
    let mb = |b: u64| b / (1024 * 1024);

    // ── Platform ───────────────────────────────────────────────
    println!("  Platform:    {}/{}", caps.platform.os, caps.platform.arch);
    println!("  CPU cores:   {}", caps.cpu.cores);
    println!();

    // ── Memory ─────────────────────────────────────────────────
    let used = caps.memory.total_bytes.saturating_sub(caps.memory.available_bytes);
    println!(
        "  Memory:  {} {:>5.1}%  ({} / {} MB)",
        usage_bar(caps.memory.utilisation()),
        caps.memory.utilisation() * 100.0,
        mb(used),
        mb(caps.memory.total_bytes),
    );

    // ── Accelerators and Power ─────────────────────────────────
    let gpu = match (caps.gpu.available, caps.gpu.memory_bytes) {
        (false, _) => "none".to_string(),
        (true, Some(bytes)) => format!("{:?}, {} MB", caps.gpu.kind, mb(bytes)),
        (true, None) => format!("{:?}", caps.gpu.kind),
    };
    println!("  GPU:         {gpu}");
    let network = match caps.network.speed_mbps {
        Some(speed) => format!("{:?} ({speed} Mbps)", caps.network.kind),
        None => format!("{:?}", caps.network.kind),
    };
    println!("  Network:     {network}");
    match (caps.battery.present, caps.battery.level) {
        (true, Some(level)) => println!(
            "  Battery:     {} {:>5.1}%{}",
            usage_bar(f64::from(level)),
            level * 100.0,
            if caps.battery.charging { " (charging)" } else { "" },
        ),
        (true, None) => println!("  Battery:     present"),
        (false, _) => println!("  Battery:     none"),
    }
    println!();

    // ── Runtimes ───────────────────────────────────────────────
    let factory = super::factory(config)?;
    let supported = factory.supported_runtimes();
    println!("  ── Runtimes ────────────────────────────────────────");
    for kind in RuntimeKind::ALL {
        let mark = if supported.contains(&kind) { "yes" } else { "no" };
        println!("  {:<14} {mark}", kind.as_str());
    }
    println!();

    let pressure = if caps.is_constrained() {
        "CONSTRAINED (prefer small bundles and aggressive quantization)"
    } else {
        "normal"
    };
    println!("  Pressure:    {pressure}");
    println!();
    println!("{}", caps.summary());

    Ok(())
}

/// Creates a visual usage bar (0.0-1.0 scale).
fn usage_bar(ratio: f64) -> String {
    let filled = (ratio * 20.0).round().clamp(0.0, 20.0) as usize;
    let empty = 20 - filled;
    let symbol = if ratio >= 0.9 {
        "#"
    } else if ratio >= 0.7 {
        "="
    } else {
        "-"
    };
    format!("[{}{}]", symbol.repeat(filled), ".".repeat(empty))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_bar_fill_and_symbol() {
        assert_eq!(usage_bar(0.0), format!("[{}]", ".".repeat(20)));
        assert_eq!(usage_bar(0.5), format!("[{}{}]", "-".repeat(10), ".".repeat(10)));
        assert_eq!(usage_bar(1.0), format!("[{}]", "#".repeat(20)));
        assert_eq!(usage_bar(1.7), format!("[{}]", "#".repeat(20)));
    }
}
