//! Worker identity and advertised address.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use farmlink_core::worker_pool::{self, CoordinatorAddress};

use crate::config::AgentConfig;

const LOOPBACK: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How this worker presents itself to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerIdentity {
    pub worker_id: String,
    /// Scheduler worker name, falling back to the host name.
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl WorkerIdentity {
    pub fn resolve(config: &AgentConfig, hostname: &str) -> Self {
        let host = config
            .worker_host
            .clone()
            .unwrap_or_else(|| advertised_host(&config.coordinator));

        Self {
            worker_id: worker_pool::worker_identity(
                hostname,
                &config.task.job_id,
                &config.task.task_id,
            ),
            name: config
                .task
                .worker_name
                .clone()
                .unwrap_or_else(|| hostname.to_string()),
            host,
            port: config.worker_port,
        }
    }
}

/// Local machine name, or `localhost` if it cannot be read.
pub fn local_hostname() -> String {
    match hostname::get() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(e) => {
            tracing::warn!(error = %e, "Could not read host name");
            "localhost".to_string()
        }
    }
}

/// Address the coordinator can reach this worker on.
///
/// Loopback when the coordinator runs on this machine; otherwise the local
/// address the OS would route toward the coordinator. Connecting a UDP
/// socket sends no packets.
pub fn advertised_host(coordinator: &CoordinatorAddress) -> String {
    if worker_pool::is_local_host(&coordinator.host) {
        return LOOPBACK.to_string();
    }
    route_local_ip(coordinator)
        .unwrap_or_else(|e| {
            tracing::warn!(
                coordinator = %coordinator,
                error = %e,
                "Could not determine local address, advertising loopback",
            );
            LOOPBACK
        })
        .to_string()
}

fn route_local_ip(coordinator: &CoordinatorAddress) -> std::io::Result<IpAddr> {
    let target = (coordinator.host.as_str(), coordinator.port);
    let socket = UdpSocket::bind("0.0.0.0:0")?;
    socket.connect(target)?;
    Ok(socket.local_addr()?.ip())
}
