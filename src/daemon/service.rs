//! systemd Unit Rendering
//!
//! Renders the daemon's service file from the current configuration and
//! visible peer set. The rendered content is hashed so the coordinator can
//! skip the write and daemon-reload when nothing changed.

use std::collections::BTreeSet;
use std::path::Path;

use crate::mode::DeploymentMode;

/// Render the ExecStart line for the current mode and peer set.
///
/// In single-node mode `start-single-node` sets all zone replication
/// factors to 1 and self-initializes on first start. The daemon runs
/// insecure until CA setup support is figured out.
pub fn exec_start_line(
    binary: &Path,
    mode: DeploymentMode,
    advertise_address: &str,
    peer_addresses: &BTreeSet<String>,
) -> String {
    match mode {
        DeploymentMode::SingleNode => format!(
            "ExecStart={} start-single-node --advertise-addr {} --insecure",
            binary.display(),
            advertise_address
        ),
        DeploymentMode::MultiNode => {
            let mut join_addresses = vec![advertise_address.to_string()];
            join_addresses.extend(peer_addresses.iter().cloned());
            format!(
                "ExecStart={} start --insecure --advertise-addr={} --join={}",
                binary.display(),
                advertise_address,
                join_addresses.join(",")
            )
        }
    }
}

/// Render the full systemd unit file
pub fn render_unit(working_directory: &Path, exec_start: &str) -> String {
    format!(
        r#"[Unit]
Description=CockroachDB database server
Requires=network.target

[Service]
Type=notify
WorkingDirectory={working_directory}
{exec_start}
TimeoutStopSec=60
Restart=always
RestartSec=10
StandardOutput=syslog
StandardError=syslog
SyslogIdentifier=cockroach
User=cockroach

[Install]
WantedBy=default.target
"#,
        working_directory = working_directory.display(),
        exec_start = exec_start,
    )
}

/// Hash of the rendered unit content
pub fn unit_hash(content: &str) -> u32 {
    crc32fast::hash(content.as_bytes())
}
