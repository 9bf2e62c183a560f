use config::{Config, ConfigError, Environment, File};
use courier_node::{DeliveryConfig, EndpointAddress, ReplyRoutes};
use serde::de::{self, Deserializer, Visitor};
use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    pub bind: String,
    pub port: u16,
    /// Party key placed in `From/PartyId` of outbound envelopes.
    pub party_id: String,
    pub ledger_path: PathBuf,
    #[serde(with = "humantime_serde")]
    pub snapshot_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub ack_timeout: Duration,
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
    pub ledger_retention: usize,
    pub address_cache_capacity: usize,
    pub cache_address_misses: bool,
    pub publish_buffer: usize,
    pub delivery_history: usize,
    pub reply_fallback: Option<String>,
    /// `PARTY=url` entries.
    #[serde(deserialize_with = "deserialize_list")]
    pub reply_routes: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<EndpointAddress>,
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct ListVisitor;

    impl<'de> Visitor<'de> for ListVisitor {
        type Value = Vec<String>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("a string or a sequence of strings")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(value
                .split(|c| c == ',' || c == ';')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect())
        }

        fn visit_seq<S>(self, mut seq: S) -> Result<Self::Value, S::Error>
        where
            S: de::SeqAccess<'de>,
        {
            let mut vec = Vec::new();
            while let Some(element) = seq.next_element()? {
                vec.push(element);
            }
            Ok(vec)
        }
    }

    deserializer.deserialize_any(ListVisitor)
}

impl GatewayConfig {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let defaults = DeliveryConfig::default();
        let mut builder = Config::builder()
            .set_default("bind", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("party_id", "COURIER-01")?
            .set_default("ledger_path", "data/courier-ledger.cbor")?
            .set_default("snapshot_interval", "60s")?
            .set_default("http_timeout", "30s")?
            .set_default("ack_timeout", "30s")?
            .set_default("max_attempts", u64::from(defaults.max_attempts))?
            .set_default("initial_backoff", "1s")?
            .set_default("backoff_multiplier", u64::from(defaults.backoff_multiplier))?
            .set_default("max_backoff", "60s")?
            .set_default("ledger_retention", defaults.ledger_retention as u64)?
            .set_default("address_cache_capacity", defaults.address_cache_capacity as u64)?
            .set_default("cache_address_misses", defaults.cache_address_misses)?
            .set_default("publish_buffer", defaults.publish_buffer as u64)?
            .set_default("delivery_history", 256)?
            .set_default("reply_fallback", None::<String>)?
            .set_default("reply_routes", Vec::<String>::new())?;

        if let Some(path) = config_path {
            if path.extension().and_then(|ext| ext.to_str()) == Some("env") {
                // .env files feed the COURIER_ environment source below.
                match dotenvy::from_path(&path) {
                    Ok(_) => tracing::info!("loaded environment from {}", path.display()),
                    Err(err) => {
                        tracing::warn!("failed to load .env from {}: {}", path.display(), err)
                    }
                }
            } else {
                builder = builder.add_source(File::from(path));
            }
        }

        builder = builder.add_source(Environment::with_prefix("COURIER").try_parsing(true));

        builder.build()?.try_deserialize()
    }

    pub fn delivery(&self) -> DeliveryConfig {
        DeliveryConfig {
            ack_timeout: self.ack_timeout,
            max_attempts: self.max_attempts,
            initial_backoff: self.initial_backoff,
            backoff_multiplier: self.backoff_multiplier,
            max_backoff: self.max_backoff,
            ledger_retention: self.ledger_retention,
            address_cache_capacity: self.address_cache_capacity,
            cache_address_misses: self.cache_address_misses,
            publish_buffer: self.publish_buffer,
        }
    }

    /// Builds reply routes from `PARTY=url` entries; malformed entries are
    /// skipped with a warning.
    pub fn reply_routes(&self) -> ReplyRoutes {
        let mut routes = ReplyRoutes::new(self.reply_fallback.clone());
        for entry in &self.reply_routes {
            match entry.split_once('=') {
                Some((party, url)) if !party.trim().is_empty() && !url.trim().is_empty() => {
                    routes.insert(party.trim(), url.trim());
                }
                _ => tracing::warn!(%entry, "ignoring malformed reply route"),
            }
        }
        routes
    }
}
