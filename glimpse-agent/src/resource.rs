//! The static list of resource types the agent can collect.
//!
//! Each resource type is a variant of [`Resource`] — a closed tagged union,
//! not a by-name lookup — exposing `describe` and `collect`. Construction
//! failures (a missing `/proc` file, no upsd listening) exclude that
//! resource type for the run and leave its siblings untouched.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::probe::connections::ConnectionsProbe;
use crate::probe::cpu::CpuProbe;
use crate::probe::disks::DiskProbe;
use crate::probe::interfaces::InterfaceProbe;
use crate::probe::load::LoadProbe;
use crate::probe::memory::MemoryProbe;
use crate::probe::ups::UpsProbe;

/// Human-facing description of a resource type.
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo {
    /// Component directory name under the data directory.
    pub name: &'static str,
    /// Display title.
    pub title: &'static str,
    /// One-line description.
    pub description: &'static str,
}

/// One collectable resource type.
pub enum Resource {
    /// Processor time counters.
    Cpu(CpuProbe),
    /// Physical and swap memory gauges.
    Memory(MemoryProbe),
    /// Load averages and process creation.
    Load(LoadProbe),
    /// Per-disk sector counters.
    Disks(DiskProbe),
    /// Per-interface traffic counters.
    Interfaces(InterfaceProbe),
    /// Netfilter connection counts.
    Connections(ConnectionsProbe),
    /// UPS voltages from upsd.
    Ups(UpsProbe),
}

impl Resource {
    /// Starts every resource type that can initialize on this system.
    ///
    /// Failures are logged and skipped; an empty result means nothing at
    /// all is collectable.
    pub fn start_all(config: &AgentConfig) -> Vec<Resource> {
        let mut resources = Vec::new();
        let mut admit = |name: &str, result: Result<Resource, AgentError>| match result {
            Ok(resource) => resources.push(resource),
            Err(e) => tracing::warn!(resource = name, error = %e, "cannot start resource"),
        };

        admit("cpu", CpuProbe::new(config).map(Resource::Cpu));
        admit("memory", MemoryProbe::new(config).map(Resource::Memory));
        admit("processes", LoadProbe::new(config).map(Resource::Load));
        admit("disks", DiskProbe::new(config).map(Resource::Disks));
        admit(
            "counters",
            InterfaceProbe::new(config).map(Resource::Interfaces),
        );
        admit(
            "connections",
            ConnectionsProbe::new(config).map(Resource::Connections),
        );
        admit("ups", UpsProbe::new(config).map(Resource::Ups));

        resources
    }

    /// Describes this resource type.
    pub fn describe(&self) -> ResourceInfo {
        match self {
            Resource::Cpu(_) => ResourceInfo {
                name: "cpu",
                title: "CPU",
                description: "processor time, by mode",
            },
            Resource::Memory(_) => ResourceInfo {
                name: "memory",
                title: "Memory",
                description: "physical and swap memory usage",
            },
            Resource::Load(_) => ResourceInfo {
                name: "processes",
                title: "Processes",
                description: "system load average and process spawning rates",
            },
            Resource::Disks(_) => ResourceInfo {
                name: "disks",
                title: "Disk Storage",
                description: "I/O operation statistics",
            },
            Resource::Interfaces(_) => ResourceInfo {
                name: "counters",
                title: "Network Interfaces",
                description: "network traffic rates",
            },
            Resource::Connections(_) => ResourceInfo {
                name: "connections",
                title: "Network Connections",
                description: "tracked connections, by protocol",
            },
            Resource::Ups(_) => ResourceInfo {
                name: "ups",
                title: "UPS",
                description: "UPS voltages",
            },
        }
    }

    /// Runs one collection pass for this resource type.
    ///
    /// # Errors
    ///
    /// Returns the probe's source, protocol, or store error; the caller
    /// logs it and moves on to the next resource.
    pub fn collect(&mut self, config: &AgentConfig, now: u64) -> Result<usize, AgentError> {
        match self {
            Resource::Cpu(probe) => probe.collect(now),
            Resource::Memory(probe) => probe.collect(now),
            Resource::Load(probe) => probe.collect(now),
            Resource::Disks(probe) => probe.collect(config, now),
            Resource::Interfaces(probe) => probe.collect(config, now),
            Resource::Connections(probe) => probe.collect(now),
            Resource::Ups(probe) => probe.collect(now),
        }
    }
}
