//! Tracing subscriber setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campaignindex_core::config::LogConfig;

/// `level,crate_a=debug,...` from the config's default level and per-crate
/// overrides.
pub fn directives(config: &LogConfig) -> String {
    let mut directives = config.level.clone();
    let mut components: Vec<_> = config.components.iter().collect();
    components.sort();
    for (component, level) in components {
        directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
    }
    directives
}

/// Install the global subscriber. `RUST_LOG` wins over the config when set.
/// Output goes to stderr so query results on stdout stay machine-readable.
pub fn init_tracing(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directives(config)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_overrides_use_crate_names() {
        let mut config = LogConfig::default();
        config.components.insert("campaignindex-evm".into(), "debug".into());
        config.components.insert("campaignindex-storage".into(), "warn".into());
        assert_eq!(
            directives(&config),
            "info,campaignindex_evm=debug,campaignindex_storage=warn"
        );
    }
}
