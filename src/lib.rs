pub mod api;
pub mod config;
pub mod db;
pub mod media;

pub use db::DbPool;

use config::Config;
use media::ImageStore;

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub media: ImageStore,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let media = ImageStore::from_config(&config.media);
        Self { config, db, media }
    }
}
