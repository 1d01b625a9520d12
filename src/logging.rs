use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "chat_relay=info,info,actix_server=warn,redis=warn";

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the filter. `LOG_FORMAT=json` switches to one JSON
/// object per line for log shippers; anything else keeps the plain format.
pub fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let json = std::env::var("LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let builder = fmt().with_env_filter(env_filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
