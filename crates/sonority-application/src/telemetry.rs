// SPDX-License-Identifier: GPL-3.0-or-later
use sonority_config::TelemetryConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins over the configured level.
///
/// Returns `false` when a subscriber was already installed, so repeated calls
/// from tests or embedding hosts are harmless.
pub fn init_tracing(config: &TelemetryConfig) -> bool {
    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
}
