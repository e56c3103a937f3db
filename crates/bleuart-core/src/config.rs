//! Engine configuration
//!
//! Every knob the host UI collects before starting the link. The engine never
//! computes these values; it only forwards them to the transport.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::UartError;
use crate::protocol::{DEFAULT_ATT_MTU, MAX_ATT_MTU};

// ----------------------------------------------------------------------------
// Option Classes
// ----------------------------------------------------------------------------

/// Which sub-roles the engine runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapRole {
    /// Scan and connect out only
    Central,
    /// Advertise and accept subscriptions only
    Peripheral,
    /// Both roles concurrently
    Bridge,
}

impl GapRole {
    pub fn runs_client(&self) -> bool {
        matches!(self, GapRole::Central | GapRole::Bridge)
    }

    pub fn runs_server(&self) -> bool {
        matches!(self, GapRole::Peripheral | GapRole::Bridge)
    }
}

/// Advertising interval class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvertiseMode {
    LowPower,
    Balanced,
    LowLatency,
}

impl AdvertiseMode {
    /// Advertising interval the mode corresponds to
    pub fn interval(&self) -> Duration {
        match self {
            AdvertiseMode::LowPower => Duration::from_millis(1000),
            AdvertiseMode::Balanced => Duration::from_millis(250),
            AdvertiseMode::LowLatency => Duration::from_millis(100),
        }
    }
}

/// Advertising transmit power class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdvertiseTxPower {
    UltraLow,
    Low,
    Medium,
    High,
}

impl AdvertiseTxPower {
    /// Nominal transmit power in dBm
    pub fn dbm(&self) -> i16 {
        match self {
            AdvertiseTxPower::UltraLow => -21,
            AdvertiseTxPower::Low => -15,
            AdvertiseTxPower::Medium => -7,
            AdvertiseTxPower::High => 1,
        }
    }
}

/// Scan duty-cycle class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    LowPower,
    Balanced,
    LowLatency,
}

/// Connection-interval class requested after the MTU exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionPriority {
    Balanced,
    High,
    LowPower,
}

/// How the client writes the TX characteristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteMode {
    /// Write request, acknowledged by the peripheral
    Request,
    /// Write command, no acknowledgement
    Command,
}

macro_rules! impl_option_parsing {
    ($ty:ty { $($text:literal => $variant:path),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = UartError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(UartError::InvalidConfiguration {
                        reason: format!("unknown {} '{}'", stringify!($ty), other),
                    }),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let text = match self {
                    $($variant => $text,)+
                };
                f.write_str(text)
            }
        }
    };
}

impl_option_parsing!(GapRole {
    "central" => GapRole::Central,
    "peripheral" => GapRole::Peripheral,
    "bridge" => GapRole::Bridge,
});

impl_option_parsing!(AdvertiseMode {
    "low-power" => AdvertiseMode::LowPower,
    "balanced" => AdvertiseMode::Balanced,
    "low-latency" => AdvertiseMode::LowLatency,
});

impl_option_parsing!(AdvertiseTxPower {
    "ultra-low" => AdvertiseTxPower::UltraLow,
    "low" => AdvertiseTxPower::Low,
    "medium" => AdvertiseTxPower::Medium,
    "high" => AdvertiseTxPower::High,
});

impl_option_parsing!(ScanMode {
    "low-power" => ScanMode::LowPower,
    "balanced" => ScanMode::Balanced,
    "low-latency" => ScanMode::LowLatency,
});

impl_option_parsing!(ConnectionPriority {
    "balanced" => ConnectionPriority::Balanced,
    "high" => ConnectionPriority::High,
    "low-power" => ConnectionPriority::LowPower,
});

impl_option_parsing!(WriteMode {
    "request" => WriteMode::Request,
    "command" => WriteMode::Command,
});

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for the dual-role engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Sub-roles to run
    pub gap_role: GapRole,
    /// Advertising interval class
    pub advertise_mode: AdvertiseMode,
    /// Advertising transmit power class
    pub advertise_tx_power: AdvertiseTxPower,
    /// Whether the central surfaces discovered peers for connection
    pub connectable: bool,
    /// Scan duty-cycle class
    pub scan_mode: ScanMode,
    /// Connection-interval class requested on every client link
    pub connection_priority: ConnectionPriority,
    /// MTU requested on every client link, also the initial engine floor
    pub requested_mtu: u16,
    /// Write variant used by the client
    pub write_mode: WriteMode,
    /// Connect to elected peers without waiting for the host
    pub auto_connect: bool,
    /// Read the Device Information service after subscribing
    pub read_device_info: bool,
    /// Bound applied by host bindings to each transport operation
    #[serde(with = "duration_millis")]
    pub operation_timeout: Duration,
    /// Local name put in the advertisement
    pub device_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gap_role: GapRole::Bridge,
            advertise_mode: AdvertiseMode::LowLatency,
            advertise_tx_power: AdvertiseTxPower::High,
            connectable: true,
            scan_mode: ScanMode::LowLatency,
            connection_priority: ConnectionPriority::High,
            requested_mtu: 512,
            write_mode: WriteMode::Request,
            auto_connect: false,
            read_device_info: false,
            operation_timeout: Duration::from_secs(10),
            device_name: "BLE-UART".to_string(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the gap role
    pub fn with_gap_role(mut self, role: GapRole) -> Self {
        self.gap_role = role;
        self
    }

    /// Set the advertising interval class
    pub fn with_advertise_mode(mut self, mode: AdvertiseMode) -> Self {
        self.advertise_mode = mode;
        self
    }

    /// Set the advertising transmit power class
    pub fn with_advertise_tx_power(mut self, power: AdvertiseTxPower) -> Self {
        self.advertise_tx_power = power;
        self
    }

    /// Enable or disable surfacing discovered peers
    pub fn with_connectable(mut self, connectable: bool) -> Self {
        self.connectable = connectable;
        self
    }

    /// Set the scan duty-cycle class
    pub fn with_scan_mode(mut self, mode: ScanMode) -> Self {
        self.scan_mode = mode;
        self
    }

    /// Set the connection-interval class
    pub fn with_connection_priority(mut self, priority: ConnectionPriority) -> Self {
        self.connection_priority = priority;
        self
    }

    /// Set the requested MTU
    pub fn with_requested_mtu(mut self, mtu: u16) -> Self {
        self.requested_mtu = mtu;
        self
    }

    /// Set the client write variant
    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    /// Enable or disable automatic connection to elected peers
    pub fn with_auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }

    /// Enable or disable Device Information reads
    pub fn with_device_info(mut self, enabled: bool) -> Self {
        self.read_device_info = enabled;
        self
    }

    /// Set the per-operation timeout
    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set the advertised local name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), UartError> {
        if !(DEFAULT_ATT_MTU..=MAX_ATT_MTU).contains(&self.requested_mtu) {
            return Err(UartError::InvalidConfiguration {
                reason: format!(
                    "requested_mtu {} outside {}..={}",
                    self.requested_mtu, DEFAULT_ATT_MTU, MAX_ATT_MTU
                ),
            });
        }
        if self.operation_timeout.is_zero() {
            return Err(UartError::InvalidConfiguration {
                reason: "operation_timeout must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_and_validation() {
        let config = EngineConfig::new()
            .with_gap_role(GapRole::Central)
            .with_requested_mtu(64)
            .with_write_mode(WriteMode::Command);

        assert!(config.gap_role.runs_client());
        assert!(!config.gap_role.runs_server());
        assert_eq!(config.requested_mtu, 64);
        assert!(config.validate().is_ok());

        assert!(config.clone().with_requested_mtu(22).validate().is_err());
        assert!(config.clone().with_requested_mtu(600).validate().is_err());
        assert!(config
            .with_operation_timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_option_text_round_trip() {
        assert_eq!("bridge".parse::<GapRole>().unwrap(), GapRole::Bridge);
        assert_eq!("LOW-LATENCY".parse::<ScanMode>().unwrap(), ScanMode::LowLatency);
        assert_eq!(ConnectionPriority::LowPower.to_string(), "low-power");
        assert!("sideways".parse::<WriteMode>().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            gap_role = "central"
            requested_mtu = 64
            operation_timeout = 2500
            scan_mode = "balanced"
            "#,
        )
        .unwrap();

        assert_eq!(config.gap_role, GapRole::Central);
        assert_eq!(config.requested_mtu, 64);
        assert_eq!(config.operation_timeout, Duration::from_millis(2500));
        assert_eq!(config.scan_mode, ScanMode::Balanced);
        assert_eq!(config.write_mode, WriteMode::Request);
    }
}
