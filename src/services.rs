//! Process-wide collaborators, built once at startup.
//!
//! [`Services::start`] opens the database, runs migrations, constructs the
//! embedding provider and chat model, and makes sure the configured vector
//! index exists with the provider's dimension. Everything is shared through
//! `Arc`s, so the [`Assistant`] and [`Ingestor`] it hands out are cheap to
//! create and clone.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

use crate::accounts::AccountStore;
use crate::classifier::DomainClassifier;
use crate::config::Config;
use crate::conversation::{ConversationStore, SqliteConversationStore};
use crate::db;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::index::sqlite::SqliteIndex;
use crate::index::{ensure_index, IndexSpec, VectorIndex};
use crate::ingest::Ingestor;
use crate::llm::{ChatModel, OpenAIChatModel};
use crate::migrate;
use crate::pipeline::Assistant;

pub struct Services {
    config: Arc<Config>,
    pool: SqlitePool,
    embedder: Arc<dyn EmbeddingProvider>,
    chat_model: Arc<dyn ChatModel>,
    index: Arc<dyn VectorIndex>,
    index_spec: IndexSpec,
    conversations: Arc<dyn ConversationStore>,
    accounts: Arc<AccountStore>,
}

impl Services {
    /// Build every collaborator from `config`.
    ///
    /// Fails if the stored index was created with a different embedding
    /// dimension than the configured provider produces.
    pub async fn start(config: &Config) -> Result<Self> {
        let embedder =
            create_provider(&config.embedding).context("Failed to initialize embedding provider")?;
        let chat_model: Arc<dyn ChatModel> = Arc::new(
            OpenAIChatModel::new(&config.llm).context("Failed to initialize chat model")?,
        );
        Self::with_models(config, embedder, chat_model).await
    }

    /// Like [`start`](Self::start) with caller-supplied models.
    pub async fn with_models(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat_model: Arc<dyn ChatModel>,
    ) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate(&pool).await?;

        let index: Arc<dyn VectorIndex> = Arc::new(SqliteIndex::new(pool.clone()));
        let metric = config.index.metric()?;
        let index_spec = ensure_index(index.as_ref(), &config.index.name, embedder.dims(), metric)
            .await
            .with_context(|| format!("Failed to open vector index '{}'", config.index.name))?;

        info!(
            db = %config.db.path.display(),
            index = %index_spec.name,
            dims = index_spec.dimension,
            embedder = embedder.model_name(),
            chat_model = chat_model.model_name(),
            "services started"
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            conversations: Arc::new(SqliteConversationStore::new(pool.clone())),
            accounts: Arc::new(AccountStore::new(pool.clone())),
            pool,
            embedder,
            chat_model,
            index,
            index_spec,
        })
    }

    /// The query pipeline, wired to the shared collaborators.
    pub fn assistant(&self) -> Result<Assistant> {
        let assistant = Assistant::builder()
            .embedder(self.embedder.clone())
            .index(self.index.clone(), self.index_spec.name.clone())
            .chat_model(self.chat_model.clone())
            .conversations(self.conversations.clone())
            .classifier(DomainClassifier::new(&self.config.domain.extra_keywords))
            .gate(self.config.domain.gate)
            .top_k(self.config.retrieval.top_k)
            .build()?;
        Ok(assistant)
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.embedder.clone(),
            self.index.clone(),
            self.index_spec.name.clone(),
            self.config.chunking.clone(),
        )
        .with_walk_config(self.config.ingest.clone())
    }

    pub fn accounts(&self) -> Arc<AccountStore> {
        self.accounts.clone()
    }

    pub fn conversations(&self) -> Arc<dyn ConversationStore> {
        self.conversations.clone()
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        self.embedder.clone()
    }

    pub fn index(&self) -> Arc<dyn VectorIndex> {
        self.index.clone()
    }

    pub fn index_spec(&self) -> &IndexSpec {
        &self.index_spec
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database pool, waiting for in-flight queries.
    pub async fn shutdown(self) {
        self.pool.close().await;
    }
}
