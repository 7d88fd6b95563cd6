// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Active network link from `/sys/class/net`.
//!
//! The first interface (in name order) whose `operstate` is `up` decides
//! the link class. Loopback is skipped.

use crate::sysfs::{list_dir, read_parsed, read_trimmed};
use crate::{NetworkInfo, NetworkKind};
use std::path::Path;

const NET_CLASS_DIR: &str = "sys/class/net";

const CELLULAR_PREFIXES: [&str; 4] = ["wwan", "rmnet", "ppp", "ccmni"];

pub(crate) fn read_network(root: &Path) -> NetworkInfo {
    let net = root.join(NET_CLASS_DIR);
    if !net.exists() {
        return NetworkInfo {
            kind: NetworkKind::Unknown,
            speed_mbps: None,
        };
    }

    for name in list_dir(&net).iter().filter(|n| n.as_str() != "lo") {
        let iface = net.join(name);
        let up = read_trimmed(&iface.join("operstate")).is_ok_and(|s| s == "up");
        if !up {
            continue;
        }
        let kind = classify(name, &iface);
        // The kernel reports -1 when the speed is unknown.
        let speed_mbps = read_parsed::<i64>(&iface.join("speed"))
            .ok()
            .filter(|s| *s > 0)
            .map(|s| s as u32);
        tracing::trace!(interface = %name, ?kind, ?speed_mbps, "active network interface");
        return NetworkInfo { kind, speed_mbps };
    }

    NetworkInfo {
        kind: NetworkKind::None,
        speed_mbps: None,
    }
}

fn classify(name: &str, iface: &Path) -> NetworkKind {
    if iface.join("wireless").exists() || iface.join("phy80211").exists() {
        NetworkKind::Wifi
    } else if CELLULAR_PREFIXES.iter().any(|p| name.starts_with(p)) {
        NetworkKind::Cellular
    } else {
        NetworkKind::Ethernet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(root: &Path, name: &str, state: &str, extra: &[(&str, &str)]) {
        let dir = root.join(NET_CLASS_DIR).join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("operstate"), state).unwrap();
        for (file, content) in extra {
            let path = dir.join(file);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_missing_net_dir_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(read_network(dir.path()).kind, NetworkKind::Unknown);
    }

    #[test]
    fn test_only_loopback_is_none() {
        let dir = tempfile::tempdir().unwrap();
        iface(dir.path(), "lo", "unknown", &[]);
        iface(dir.path(), "eth0", "down", &[]);
        assert_eq!(read_network(dir.path()).kind, NetworkKind::None);
    }

    #[test]
    fn test_ethernet_with_speed() {
        let dir = tempfile::tempdir().unwrap();
        iface(dir.path(), "eth0", "up", &[("speed", "1000\n")]);
        let net = read_network(dir.path());
        assert_eq!(net.kind, NetworkKind::Ethernet);
        assert_eq!(net.speed_mbps, Some(1000));
    }

    #[test]
    fn test_wifi_and_cellular() {
        let dir = tempfile::tempdir().unwrap();
        iface(dir.path(), "wlan0", "up", &[("wireless/x", ""), ("speed", "-1")]);
        let net = read_network(dir.path());
        assert_eq!(net.kind, NetworkKind::Wifi);
        assert_eq!(net.speed_mbps, None);

        let dir = tempfile::tempdir().unwrap();
        iface(dir.path(), "wwan0", "up", &[]);
        assert_eq!(read_network(dir.path()).kind, NetworkKind::Cellular);
    }
}
