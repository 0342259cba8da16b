use std::path::PathBuf;

use anyhow::Context;
use tracing::warn;

use notefeed_core::FeedConfig;
use notefeed_types::CollectionKey;

const DEV_SECRET: &str = "dev-secret-change-me";

pub struct Config {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Browser origin allowed to call the API cross-site. Unset means none.
    pub cors_origin: Option<String>,
    pub feed: FeedConfig,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = var("NOTEFEED_JWT_SECRET").unwrap_or_else(|| {
            warn!("NOTEFEED_JWT_SECRET not set, using the development secret");
            DEV_SECRET.into()
        });
        let db_path = var("NOTEFEED_DB_PATH").unwrap_or_else(|| "notefeed.db".into());
        let host = var("NOTEFEED_HOST").unwrap_or_else(|| "127.0.0.1".into());
        let port: u16 = var("NOTEFEED_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("NOTEFEED_PORT must be a port number")?;
        let cors_origin = var("NOTEFEED_CORS_ORIGIN").filter(|origin| !origin.is_empty());

        let mut feed = FeedConfig::default();
        let collections = [
            ("NOTEFEED_PERSONAL_COLLECTION", &mut feed.personal_collection),
            ("NOTEFEED_SHARED_COLLECTION", &mut feed.shared_collection),
            ("NOTEFEED_USERS_COLLECTION", &mut feed.users_collection),
            ("NOTEFEED_GROUPS_COLLECTION", &mut feed.groups_collection),
        ];
        for (key, collection) in collections {
            if let Some(name) = var(key).filter(|name| !name.is_empty()) {
                *collection = CollectionKey::new(name);
            }
        }

        Ok(Self {
            db_path: PathBuf::from(db_path),
            host,
            port,
            jwt_secret,
            cors_origin,
            feed,
        })
    }
}
