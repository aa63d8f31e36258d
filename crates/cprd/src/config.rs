//! Command line and environment configuration.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

const DEFAULT_API: &str = "127.0.0.1:2345";
const DEFAULT_PORT: u16 = 33111;

/// Variable names read by older deployments, consulted when neither the
/// flag nor its `CPR_*` variable is set.
const LEGACY_API: &str = "LOTUS_CPR_API";
const LEGACY_API_TOKEN: &str = "LOTUS_CPR_API_TOKEN";
const LEGACY_LISTEN: &str = "LOTUS_CPR_LISTEN";

#[derive(Parser, Debug)]
#[command(name = "cprd", about = "cpr JSON-RPC gateway daemon")]
pub struct Cli {
    /// Upstream node API address (`host:port` or a full RPC URL) [default: 127.0.0.1:2345].
    #[arg(long, env = "CPR_API")]
    pub api: Option<String>,

    /// Bearer token presented to the upstream node.
    #[arg(long, env = "CPR_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    /// Address the gateway listens on [default: 0.0.0.0:33111].
    #[arg(long, env = "CPR_LISTEN")]
    pub listen: Option<SocketAddr>,

    /// Seconds to wait for a stream handoff before giving up.
    #[arg(long, env = "CPR_HANDOFF_TIMEOUT", default_value = "30")]
    pub handoff_timeout: u64,
}

/// Resolved gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub upstream_rpc: String,
    pub token: String,
    pub listen: SocketAddr,
    pub handoff_timeout: Duration,
}

impl ProxyConfig {
    /// Fill gaps in `cli` from the legacy variables returned by `legacy`,
    /// then from defaults. The token has no default.
    pub fn resolve(cli: Cli, legacy: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api = cli
            .api
            .or_else(|| legacy(LEGACY_API))
            .unwrap_or_else(|| DEFAULT_API.to_string());
        let upstream_rpc = if api.contains("://") {
            api
        } else {
            format!("http://{api}/rpc/v0")
        };

        let token = cli.api_token.or_else(|| legacy(LEGACY_API_TOKEN)).with_context(|| {
            format!("no upstream token: pass --api-token or set CPR_API_TOKEN or {LEGACY_API_TOKEN}")
        })?;

        let listen = match (cli.listen, legacy(LEGACY_LISTEN)) {
            (Some(addr), _) => addr,
            (None, Some(raw)) => {
                parse_listen(&raw).with_context(|| format!("invalid {LEGACY_LISTEN} {raw:?}"))?
            }
            (None, None) => SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
        };

        Ok(Self {
            upstream_rpc,
            token,
            listen,
            handoff_timeout: Duration::from_secs(cli.handoff_timeout),
        })
    }
}

/// Accepts `host:port` and the bare `:port` form, which binds all interfaces.
fn parse_listen(raw: &str) -> Result<SocketAddr, std::net::AddrParseError> {
    match raw.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}").parse(),
        None => raw.parse(),
    }
}
