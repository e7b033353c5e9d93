//! Office-network guard for manual check-in.
//!
//! Manual marks are only accepted from the office Wi-Fi. The current SSID
//! comes from `iwgetid -r`, falling back to `nmcli` output parsing.

use std::process::Command;

/// SSID-based network check.
pub struct NetworkGuard {
    office_ssid: String,
}

impl NetworkGuard {
    /// An empty SSID disables the check (development mode).
    pub fn new(office_ssid: impl Into<String>) -> Self {
        Self {
            office_ssid: office_ssid.into(),
        }
    }

    /// Whether manual marks may be dispatched right now.
    ///
    /// Unset SSID config fails open (with a warning); probe failures fail
    /// closed.
    pub fn is_on_office_network(&self) -> bool {
        if self.office_ssid.is_empty() {
            tracing::warn!("PRESENCE_OFFICE_SSID not set, skipping network check");
            return true;
        }

        match current_ssid() {
            Some(ssid) => {
                tracing::info!(required = %self.office_ssid, connected = %ssid, "network check");
                ssid == self.office_ssid
            }
            None => {
                tracing::error!("could not determine current SSID, refusing manual mark");
                false
            }
        }
    }
}

fn current_ssid() -> Option<String> {
    if let Some(ssid) = ssid_via_iwgetid() {
        return Some(ssid);
    }
    ssid_via_nmcli()
}

fn ssid_via_iwgetid() -> Option<String> {
    let output = Command::new("iwgetid").arg("-r").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let ssid = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if ssid.is_empty() {
        None
    } else {
        Some(ssid)
    }
}

fn ssid_via_nmcli() -> Option<String> {
    let output = Command::new("nmcli")
        .args(["-t", "-f", "active,ssid", "dev", "wifi"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    active_ssid_from_nmcli(&String::from_utf8_lossy(&output.stdout))
}

/// Parse `nmcli -t -f active,ssid dev wifi` output: one `active:ssid` line
/// per visible network.
fn active_ssid_from_nmcli(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (active, ssid) = line.split_once(':')?;
        if active == "yes" && !ssid.is_empty() {
            Some(ssid.to_string())
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_ssid_fails_open() {
        assert!(NetworkGuard::new("").is_on_office_network());
    }

    #[test]
    fn nmcli_parsing_picks_the_active_row() {
        let output = "no:GuestNet\nyes:OfficeNet\nno:Cafe\n";
        assert_eq!(active_ssid_from_nmcli(output), Some("OfficeNet".into()));
    }

    #[test]
    fn nmcli_parsing_with_no_active_row() {
        let output = "no:GuestNet\nno:Cafe\n";
        assert_eq!(active_ssid_from_nmcli(output), None);
    }

    #[test]
    fn nmcli_parsing_ignores_active_row_with_empty_ssid() {
        let output = "yes:\nno:Cafe\n";
        assert_eq!(active_ssid_from_nmcli(output), None);
    }

    #[test]
    fn nmcli_parsing_handles_empty_output() {
        assert_eq!(active_ssid_from_nmcli(""), None);
    }
}
