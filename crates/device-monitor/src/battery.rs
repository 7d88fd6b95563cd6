// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Battery state from `/sys/class/power_supply`.

use crate::sysfs::{list_dir, read_parsed, read_trimmed};
use crate::BatteryInfo;
use std::path::Path;

const POWER_SUPPLY_DIR: &str = "sys/class/power_supply";

pub(crate) fn read_battery(root: &Path) -> BatteryInfo {
    let supplies = root.join(POWER_SUPPLY_DIR);
    let battery = list_dir(&supplies)
        .into_iter()
        .map(|name| supplies.join(name))
        .find(|dir| read_trimmed(&dir.join("type")).is_ok_and(|t| t == "Battery"));

    let Some(dir) = battery else {
        return BatteryInfo::absent();
    };

    let level = read_parsed::<f32>(&dir.join("capacity"))
        .ok()
        .map(|pct| (pct / 100.0).clamp(0.0, 1.0));
    let charging = read_trimmed(&dir.join("status"))
        .is_ok_and(|s| s == "Charging" || s == "Full");

    BatteryInfo {
        present: true,
        level,
        charging,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supply(root: &Path, name: &str, files: &[(&str, &str)]) {
        let dir = root.join(POWER_SUPPLY_DIR).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        for (file, content) in files {
            std::fs::write(dir.join(file), content).unwrap();
        }
    }

    #[test]
    fn test_no_battery() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", &[("type", "Mains\n")]);
        assert_eq!(read_battery(dir.path()), BatteryInfo::absent());
    }

    #[test]
    fn test_discharging_battery() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "AC", &[("type", "Mains")]);
        supply(
            dir.path(),
            "BAT0",
            &[("type", "Battery\n"), ("capacity", "15\n"), ("status", "Discharging\n")],
        );
        let battery = read_battery(dir.path());
        assert!(battery.present);
        assert!(!battery.charging);
        assert!((battery.level.unwrap() - 0.15).abs() < 1e-6);
    }

    #[test]
    fn test_full_counts_as_charging() {
        let dir = tempfile::tempdir().unwrap();
        supply(dir.path(), "BAT1", &[("type", "Battery"), ("status", "Full")]);
        let battery = read_battery(dir.path());
        assert!(battery.charging);
        assert_eq!(battery.level, None);
    }
}
