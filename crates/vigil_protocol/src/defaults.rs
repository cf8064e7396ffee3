//! Canonical default values shared by hub, sensor, and interface tooling.

/// Multicast group all discovery traffic uses.
pub const DEFAULT_DISCOVERY_GROUP: &str = "239.255.255.250";
/// UDP port for discovery requests and replies.
pub const DEFAULT_DISCOVERY_PORT: u16 = 5007;
/// Service-type token carried in the ST header. Replies are only sent for
/// requests whose ST matches this exactly.
pub const SERVICE_TOKEN: &str = "urn:vigil";
/// MX header value (seconds a responder may delay its reply).
pub const DISCOVERY_MX: u32 = 2;

/// How many search broadcasts a discovery round issues.
pub const DEFAULT_DISCOVERY_ATTEMPTS: u32 = 10;
/// How long to collect replies after each broadcast, in milliseconds.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 2_000;

/// TCP endpoint the broker binds; bus clients connect here.
pub const DEFAULT_BUS_BIND_ADDR: &str = "tcp://127.0.0.1:5008";
/// Port component of the default bus endpoint, for address construction.
pub const DEFAULT_BUS_PORT: u16 = 5008;

/// Shared channel every sensor subscribes to for control commands.
pub const COMMAND_CHANNEL: &str = "vigil_commands";
/// Wire token addressing a command to every sensor.
pub const COMMAND_TARGET_ALL: &str = "all";
/// Registry key holding the full id -> address mapping from the last
/// discovery round.
pub const SENSORS_KEY: &str = "sensors";

/// Quiet period after a published event before the capture pipeline will
/// fire again, in milliseconds.
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 5_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consts_are_consistent() {
        assert!(DEFAULT_BUS_BIND_ADDR.ends_with(&DEFAULT_BUS_PORT.to_string()));
        assert!(SERVICE_TOKEN.starts_with("urn:"));
        assert!(DEFAULT_DISCOVERY_ATTEMPTS >= 1);
    }
}
