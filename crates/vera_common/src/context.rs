//! System context detection.
//!
//! Detects what kind of machine the engine is running on so the planner
//! can suggest commands that actually exist here: distro, package manager,
//! and which admin tools are installed. Detection is best-effort; every
//! field degrades to "unknown" rather than failing a run.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tools whose presence is worth telling the planner about
const CAPABILITY_PROBES: &[&str] = &[
    "systemctl",
    "journalctl",
    "docker",
    "podman",
    "fail2ban-client",
    "ufw",
    "nginx",
    "ss",
];

/// Binary-to-package-manager mapping, checked in order
const PACKAGE_MANAGERS: &[&str] = &["pacman", "apt", "dnf", "yum", "zypper", "apk", "brew"];

/// Where the machine keeps its executables
const BIN_DIRS: &[&str] = &["/usr/bin", "/usr/local/bin", "/bin", "/usr/sbin", "/sbin"];

/// What the engine knows about the host machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemContext {
    /// OS family, e.g. "Linux"
    pub os: String,
    /// Distribution pretty-name from /etc/os-release
    pub distro: String,
    /// Kernel version string
    pub kernel: String,
    /// Host name
    pub hostname: String,
    /// Primary package manager binary
    pub package_manager: String,
    /// Admin tools found on this machine
    pub capabilities: Vec<String>,
}

impl Default for SystemContext {
    fn default() -> Self {
        Self {
            os: "Linux".to_string(),
            distro: "unknown".to_string(),
            kernel: "unknown".to_string(),
            hostname: "unknown".to_string(),
            package_manager: "unknown".to_string(),
            capabilities: vec![],
        }
    }
}

impl SystemContext {
    /// Detect the running system.
    pub fn detect() -> Self {
        let os = sysinfo::System::name().unwrap_or_else(|| "Linux".to_string());
        let kernel = sysinfo::System::kernel_version().unwrap_or_else(|| "unknown".to_string());
        let hostname = sysinfo::System::host_name().unwrap_or_else(|| "unknown".to_string());

        Self {
            os,
            distro: detect_distro(),
            kernel,
            hostname,
            package_manager: detect_package_manager(),
            capabilities: detect_capabilities(),
        }
    }

    /// One-line summary used as a cache key component and in logs.
    pub fn os_key(&self) -> String {
        format!("{}/{}", self.os, self.distro)
    }

    /// Context block embedded in planner and evaluator prompts.
    pub fn prompt_block(&self) -> String {
        format!(
            "OS: {} ({})\nKernel: {}\nPackage manager: {}\nAvailable tools: {}",
            self.os,
            self.distro,
            self.kernel,
            self.package_manager,
            if self.capabilities.is_empty() {
                "unknown".to_string()
            } else {
                self.capabilities.join(", ")
            }
        )
    }
}

/// Parse PRETTY_NAME (falling back to ID) out of /etc/os-release
fn detect_distro() -> String {
    let raw = match std::fs::read_to_string("/etc/os-release") {
        Ok(raw) => raw,
        Err(_) => return "unknown".to_string(),
    };
    parse_os_release(&raw)
}

fn parse_os_release(raw: &str) -> String {
    let mut id = None;
    for line in raw.lines() {
        if let Some(value) = line.strip_prefix("PRETTY_NAME=") {
            return value.trim_matches('"').to_string();
        }
        if let Some(value) = line.strip_prefix("ID=") {
            id = Some(value.trim_matches('"').to_string());
        }
    }
    id.unwrap_or_else(|| "unknown".to_string())
}

fn binary_exists(name: &str) -> bool {
    BIN_DIRS.iter().any(|dir| Path::new(dir).join(name).exists())
}

fn detect_package_manager() -> String {
    PACKAGE_MANAGERS
        .iter()
        .find(|pm| binary_exists(pm))
        .map(|pm| pm.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn detect_capabilities() -> Vec<String> {
    CAPABILITY_PROBES
        .iter()
        .filter(|tool| binary_exists(tool))
        .map(|tool| tool.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_os_release_pretty_name() {
        let raw = "NAME=\"Arch Linux\"\nPRETTY_NAME=\"Arch Linux\"\nID=arch\n";
        assert_eq!(parse_os_release(raw), "Arch Linux");
    }

    #[test]
    fn test_parse_os_release_id_fallback() {
        let raw = "NAME=Debian\nID=debian\n";
        assert_eq!(parse_os_release(raw), "debian");
    }

    #[test]
    fn test_parse_os_release_empty() {
        assert_eq!(parse_os_release(""), "unknown");
    }

    #[test]
    fn test_prompt_block_contains_fields() {
        let ctx = SystemContext {
            distro: "Debian 12".to_string(),
            package_manager: "apt".to_string(),
            capabilities: vec!["systemctl".to_string()],
            ..Default::default()
        };
        let block = ctx.prompt_block();
        assert!(block.contains("Debian 12"));
        assert!(block.contains("apt"));
        assert!(block.contains("systemctl"));
    }

    #[test]
    fn test_os_key() {
        let ctx = SystemContext::default();
        assert_eq!(ctx.os_key(), "Linux/unknown");
    }
}
