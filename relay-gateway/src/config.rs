//! Configuration for the relay gateway.
//!
//! Hosting binaries can use the exposed [`RelayGatewayConfig`] directly or
//! flatten it into their own parser with `#[clap(flatten)]`.

use clap::Parser;

/// The configuration for the gateway core.
///
/// It can be configured via environment variables or command line arguments
/// using `clap`.
#[derive(Parser, Debug, Clone)]
pub struct RelayGatewayConfig {
    /// URL of the NATS broker backing the durable message log.
    #[clap(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// Max message size the websocket connection accepts.
    ///
    /// Send requests are small; the cap mostly bounds hostile frames.
    #[clap(long, env = "RELAY_MAX_MESSAGE_SIZE", default_value = "65536")]
    pub ws_max_message_size: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = RelayGatewayConfig::parse_from(["relay-gateway"]);
        assert_eq!(config.nats_url, "nats://127.0.0.1:4222");
        assert_eq!(config.ws_max_message_size, 65536);
    }
}
