pub mod feature_repository;
pub mod gemini_repository;
pub mod market_repository;
pub mod paper_repository;
pub mod strategy_repository;

pub use feature_repository::SqliteFeatureRepository;
pub use gemini_repository::SqliteGeminiUsageRepository;
pub use market_repository::SqliteMarketDataRepository;
pub use paper_repository::SqlitePaperRepository;
pub use strategy_repository::{SqliteSignalLogRepository, SqliteStrategyStateRepository};
