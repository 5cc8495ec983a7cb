use std::sync::Arc;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use self::claims::{ClaimStore, RedisClaimStore};
use self::generation::{ClaudeGenerator, TextGenerator};
use self::video::{RemoteVideoRenderer, VideoRenderer};

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub claims: Arc<dyn ClaimStore>,
    pub generator: Arc<dyn TextGenerator>,
    pub video: Arc<dyn VideoRenderer>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let claims: Arc<dyn ClaimStore> = Arc::new(RedisClaimStore::new(redis.clone()));
        let generator: Arc<dyn TextGenerator> =
            Arc::new(ClaudeGenerator::new(&config).map_err(|e| anyhow::anyhow!(e.to_string()))?);
        let video: Arc<dyn VideoRenderer> =
            Arc::new(RemoteVideoRenderer::new(&config).map_err(|e| anyhow::anyhow!(e.to_string()))?);

        Ok(Self {
            config,
            mongo,
            redis,
            claims,
            generator,
            video,
        })
    }
}

pub mod chat_service;
pub mod claims;
pub mod course_service;
pub mod generation;
pub mod grading_service;
pub mod leaderboard_service;
pub mod pipeline_service;
pub mod prompts;
pub mod video;
