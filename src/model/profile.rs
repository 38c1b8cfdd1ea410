use std::fmt;
use std::fs;

use serde::{Deserialize, Serialize};

use crate::config::ProfileOverrides;

/// Host classification derived from platform and memory size.
///
/// The class only selects a row in the settings table; the pipeline
/// consults the settings record, never the class itself.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostClass {
    RpiMinimal,
    RpiLow,
    RpiMedium,
    DockerMinimal,
    DockerLow,
    DockerNormal,
    Minimal,
    Low,
    Medium,
    Full,
}

impl fmt::Display for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RpiMinimal => "rpi_minimal",
            Self::RpiLow => "rpi_low",
            Self::RpiMedium => "rpi_medium",
            Self::DockerMinimal => "docker_minimal",
            Self::DockerLow => "docker_low",
            Self::DockerNormal => "docker_normal",
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::Full => "full",
        };
        write!(f, "{name}")
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Platform {
    RaspberryPi,
    Docker,
    Generic,
}

/// Tunables derived from the host class. Fixed for the lifetime of a
/// streaming session; re-read only at session start.
#[derive(Clone, Debug)]
pub struct ProfileSettings {
    pub max_workers: usize,
    pub udp_send_buffer: usize,
    pub max_lights: usize,
    pub target_fps: u32,
    pub frame_buffer_depth: usize,
    pub cie_tolerance: f64,
    pub bri_tolerance: u8,
    pub enable_smoothing: bool,
    pub log_level: &'static str,
}

#[derive(Clone, Debug)]
pub struct ResourceProfile {
    pub class: HostClass,
    pub cpu_count: usize,
    pub memory_gb: f64,
    pub settings: ProfileSettings,
}

impl ResourceProfile {
    /// Inspect the host once, at process start.
    #[must_use]
    pub fn detect() -> Self {
        let cpu_count = num_cpus::get();
        let memory_gb = detect_memory_gb().unwrap_or(2.0);
        let platform = detect_platform();
        let class = classify(platform, memory_gb);

        Self {
            class,
            cpu_count,
            memory_gb,
            settings: settings_for(class),
        }
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: &ProfileOverrides) -> Self {
        if let Some(workers) = overrides.max_workers {
            self.settings.max_workers = workers.clamp(1, 8);
        }
        if let Some(fps) = overrides.target_fps {
            self.settings.target_fps = fps;
        }
        if let Some(cie) = overrides.cie_tolerance {
            self.settings.cie_tolerance = cie;
        }
        if let Some(bri) = overrides.bri_tolerance {
            self.settings.bri_tolerance = bri;
        }
        self
    }
}

#[must_use]
pub const fn classify(platform: Platform, memory_gb: f64) -> HostClass {
    match platform {
        Platform::RaspberryPi => {
            if memory_gb < 0.6 {
                HostClass::RpiMinimal
            } else if memory_gb < 1.5 {
                HostClass::RpiLow
            } else {
                HostClass::RpiMedium
            }
        }
        Platform::Docker => {
            if memory_gb < 0.5 {
                HostClass::DockerMinimal
            } else if memory_gb < 1.0 {
                HostClass::DockerLow
            } else {
                HostClass::DockerNormal
            }
        }
        Platform::Generic => {
            if memory_gb < 1.0 {
                HostClass::Minimal
            } else if memory_gb < 2.0 {
                HostClass::Low
            } else if memory_gb < 4.0 {
                HostClass::Medium
            } else {
                HostClass::Full
            }
        }
    }
}

#[must_use]
#[allow(clippy::too_many_lines)]
pub const fn settings_for(class: HostClass) -> ProfileSettings {
    match class {
        HostClass::RpiMinimal => ProfileSettings {
            max_workers: 1,
            udp_send_buffer: 8192,
            max_lights: 20,
            target_fps: 30,
            frame_buffer_depth: 2,
            cie_tolerance: 0.020,
            bri_tolerance: 12,
            enable_smoothing: false,
            log_level: "warn",
        },
        HostClass::RpiLow => ProfileSettings {
            max_workers: 2,
            udp_send_buffer: 16384,
            max_lights: 50,
            target_fps: 45,
            frame_buffer_depth: 2,
            cie_tolerance: 0.015,
            bri_tolerance: 10,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::RpiMedium => ProfileSettings {
            max_workers: 3,
            udp_send_buffer: 32768,
            max_lights: 100,
            target_fps: 60,
            frame_buffer_depth: 3,
            cie_tolerance: 0.010,
            bri_tolerance: 8,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::DockerMinimal => ProfileSettings {
            max_workers: 1,
            udp_send_buffer: 8192,
            max_lights: 30,
            target_fps: 30,
            frame_buffer_depth: 2,
            cie_tolerance: 0.018,
            bri_tolerance: 10,
            enable_smoothing: false,
            log_level: "warn",
        },
        HostClass::DockerLow => ProfileSettings {
            max_workers: 2,
            udp_send_buffer: 16384,
            max_lights: 60,
            target_fps: 45,
            frame_buffer_depth: 2,
            cie_tolerance: 0.012,
            bri_tolerance: 8,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::DockerNormal => ProfileSettings {
            max_workers: 4,
            udp_send_buffer: 32768,
            max_lights: 100,
            target_fps: 60,
            frame_buffer_depth: 3,
            cie_tolerance: 0.008,
            bri_tolerance: 6,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::Minimal => ProfileSettings {
            max_workers: 2,
            udp_send_buffer: 16384,
            max_lights: 40,
            target_fps: 30,
            frame_buffer_depth: 2,
            cie_tolerance: 0.015,
            bri_tolerance: 10,
            enable_smoothing: false,
            log_level: "warn",
        },
        HostClass::Low => ProfileSettings {
            max_workers: 2,
            udp_send_buffer: 32768,
            max_lights: 60,
            target_fps: 45,
            frame_buffer_depth: 3,
            cie_tolerance: 0.012,
            bri_tolerance: 8,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::Medium => ProfileSettings {
            max_workers: 4,
            udp_send_buffer: 49152,
            max_lights: 100,
            target_fps: 60,
            frame_buffer_depth: 3,
            cie_tolerance: 0.010,
            bri_tolerance: 7,
            enable_smoothing: true,
            log_level: "info",
        },
        HostClass::Full => ProfileSettings {
            max_workers: 8,
            udp_send_buffer: 65536,
            max_lights: 200,
            target_fps: 60,
            frame_buffer_depth: 5,
            cie_tolerance: 0.008,
            bri_tolerance: 5,
            enable_smoothing: true,
            log_level: "debug",
        },
    }
}

fn detect_memory_gb() -> Option<f64> {
    let meminfo = fs::read_to_string("/proc/meminfo").ok()?;
    let line = meminfo.lines().find(|l| l.starts_with("MemTotal:"))?;
    let kb: f64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb / (1024.0 * 1024.0))
}

fn detect_platform() -> Platform {
    if let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") {
        if cpuinfo.contains("Raspberry Pi") || cpuinfo.contains("BCM") {
            return Platform::RaspberryPi;
        }
    }

    if fs::metadata("/.dockerenv").is_ok() {
        return Platform::Docker;
    }

    if let Ok(cgroup) = fs::read_to_string("/proc/self/cgroup") {
        if cgroup.to_lowercase().contains("docker") {
            return Platform::Docker;
        }
    }

    Platform::Generic
}

#[cfg(test)]
mod tests {
    use crate::config::ProfileOverrides;
    use crate::model::profile::{
        HostClass, Platform, ResourceProfile, classify, settings_for,
    };

    #[test]
    fn classify_raspberry_pi_by_memory() {
        assert_eq!(
            classify(Platform::RaspberryPi, 0.5),
            HostClass::RpiMinimal
        );
        assert_eq!(classify(Platform::RaspberryPi, 1.0), HostClass::RpiLow);
        assert_eq!(classify(Platform::RaspberryPi, 4.0), HostClass::RpiMedium);
    }

    #[test]
    fn classify_docker_by_memory() {
        assert_eq!(classify(Platform::Docker, 0.4), HostClass::DockerMinimal);
        assert_eq!(classify(Platform::Docker, 0.9), HostClass::DockerLow);
        assert_eq!(classify(Platform::Docker, 8.0), HostClass::DockerNormal);
    }

    #[test]
    fn classify_generic_by_memory() {
        assert_eq!(classify(Platform::Generic, 0.5), HostClass::Minimal);
        assert_eq!(classify(Platform::Generic, 1.5), HostClass::Low);
        assert_eq!(classify(Platform::Generic, 3.0), HostClass::Medium);
        assert_eq!(classify(Platform::Generic, 16.0), HostClass::Full);
    }

    #[test]
    fn full_hosts_get_tightest_tolerances() {
        let full = settings_for(HostClass::Full);
        let rpi = settings_for(HostClass::RpiMinimal);

        assert!(full.cie_tolerance < rpi.cie_tolerance);
        assert!(full.bri_tolerance < rpi.bri_tolerance);
        assert!(full.max_workers > rpi.max_workers);
    }

    #[test]
    fn overrides_win_and_workers_are_clamped() {
        let profile = ResourceProfile {
            class: HostClass::Full,
            cpu_count: 8,
            memory_gb: 16.0,
            settings: settings_for(HostClass::Full),
        };

        let overridden = profile.with_overrides(&ProfileOverrides {
            max_workers: Some(99),
            target_fps: Some(30),
            cie_tolerance: Some(0.5),
            bri_tolerance: None,
        });

        assert_eq!(overridden.settings.max_workers, 8);
        assert_eq!(overridden.settings.target_fps, 30);
        assert!((overridden.settings.cie_tolerance - 0.5).abs() < f64::EPSILON);
        assert_eq!(overridden.settings.bri_tolerance, 5);
    }
}
