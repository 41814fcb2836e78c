//! Subcommand execution over the memory engine.

use crate::cli::{
    Command, DeleteArgs, InitArgs, ListArgs, QueryArgs, StoreArgs, StoreMemoryArgs, UpdateArgs,
};
use crate::gateways::GatewayFactory;
use log::{debug, info};
use recall_rs_config::{EmbeddingProfile, StoreConfig, StoreLocation};
use recall_rs_embed::Provider;
use recall_rs_memory::{
    EngineOptions, ListOptions, MemoryEngine, MemoryError, NewMemory, QueryRequest, RecordFilter,
    UpdateMemory,
};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Everything a command needs from its surroundings.
pub struct Runtime {
    cwd: PathBuf,
    home: Option<PathBuf>,
    gateways: Arc<dyn GatewayFactory>,
    options: EngineOptions,
}

impl Runtime {
    pub fn new(cwd: PathBuf, home: Option<PathBuf>, gateways: Arc<dyn GatewayFactory>) -> Self {
        Self {
            cwd,
            home,
            gateways,
            options: EngineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Run `command` and return its success payload without the status
    /// marker.
    pub async fn execute(&self, command: Command) -> Result<Value, MemoryError> {
        debug!("executing command (name={})", command.name());
        match command {
            Command::Init(args) => self.init(args).await,
            Command::Store(args) => self.store(args).await,
            Command::Query(args) => self.query(args).await,
            Command::List(args) => self.list(args).await,
            Command::Stats(args) => self.stats(&args).await,
            Command::Update(args) => self.update(args).await,
            Command::Delete(args) => self.delete(args).await,
            Command::Verify(args) => self.verify(&args).await,
        }
    }

    fn locate(&self, args: &StoreArgs) -> Result<PathBuf, MemoryError> {
        let location = StoreLocation::resolve_with_home(
            args.path.as_deref(),
            &self.cwd,
            self.home.as_deref(),
        )?;
        debug!(
            "resolved store location (path={}, source={:?})",
            location.path.display(),
            location.source
        );
        Ok(location.path)
    }

    /// Open the store with the gateway its config names, detecting a
    /// provider when the store does not exist yet.
    async fn open(&self, args: &StoreArgs) -> Result<MemoryEngine, MemoryError> {
        let location = self.locate(args)?;
        let profile = match StoreConfig::load(&location)? {
            Some(config) => config.profile(),
            None => self.gateways.detect().await?.profile(None, None),
        };
        self.open_with(&location, &profile)
    }

    fn open_with(
        &self,
        location: &Path,
        profile: &EmbeddingProfile,
    ) -> Result<MemoryEngine, MemoryError> {
        let gateway = self.gateways.build(profile)?;
        MemoryEngine::open(location, gateway, self.options.clone())
    }

    async fn init(&self, args: InitArgs) -> Result<Value, MemoryError> {
        let location = self.locate(&args.store)?;
        let existing = StoreConfig::load(&location)?;
        let profile = self.init_profile(&args, existing.as_ref()).await?;
        let engine = if args.force {
            let gateway = self.gateways.build(&profile)?;
            MemoryEngine::force_reinit(location.as_path(), gateway, self.options.clone()).await?
        } else {
            self.open_with(&location, &profile)?
        };
        let config = engine.init().await?;
        let message = if args.force {
            "Memory store re-initialized"
        } else if engine.created() {
            "Memory store initialized"
        } else {
            "Memory store already initialized"
        };
        info!(
            "init finished (path={}, created={}, force={})",
            location.display(),
            engine.created(),
            args.force
        );
        Ok(json!({
            "message": message,
            "created": engine.created(),
            "path": location.display().to_string(),
            "provider": config.provider,
            "model": config.model,
            "dimension": config.dimension,
            "store_id": config.store_id,
        }))
    }

    /// Profile for `init`: explicit flags first, then the existing config,
    /// then detection.
    async fn init_profile(
        &self,
        args: &InitArgs,
        existing: Option<&StoreConfig>,
    ) -> Result<EmbeddingProfile, MemoryError> {
        let overridden = args.provider.is_some() || args.model.is_some() || args.dimension.is_some();
        if let Some(config) = existing.filter(|_| !overridden) {
            return Ok(config.profile());
        }
        let provider = match (&args.provider, existing) {
            (Some(name), _) => name.parse::<Provider>()?,
            (None, Some(config)) => config.provider.parse::<Provider>()?,
            (None, None) => self.gateways.detect().await?,
        };
        Ok(provider.profile(args.model.as_deref(), args.dimension))
    }

    async fn store(&self, args: StoreMemoryArgs) -> Result<Value, MemoryError> {
        let engine = self.open(&args.store).await?;
        let mut memory = NewMemory::new(args.content, args.category).with_tags(args.tags);
        if let Some(importance) = args.importance {
            memory = memory.with_importance(importance);
        }
        if let Some(source) = args.source {
            memory = memory.with_source(source);
        }
        if let Some(id) = args.id {
            memory = memory.with_id(id);
        }
        let record = engine.store(memory).await?;
        serde_json::to_value(record).map_err(encode_failed)
    }

    async fn query(&self, args: QueryArgs) -> Result<Value, MemoryError> {
        let engine = self.open(&args.store).await?;
        let mut request = QueryRequest::new(args.text.clone())
            .with_topk(args.topk)
            .with_tags(args.tags);
        if let Some(category) = args.category {
            request = request.with_category(category);
        }
        if let Some(threshold) = args.min_importance {
            request = request.with_min_importance(threshold);
        }
        if let Some(ef) = args.ef {
            request = request.with_ef(ef);
        }
        let hits = engine.query(request).await?;
        Ok(json!({
            "query": args.text,
            "count": hits.len(),
            "memories": hits,
        }))
    }

    async fn list(&self, args: ListArgs) -> Result<Value, MemoryError> {
        let engine = self.open(&args.store).await?;
        let records = engine
            .list(ListOptions {
                filter: RecordFilter {
                    category: args.category,
                    min_importance: args.min_importance,
                    tags: args.tags,
                },
                sort_by: args.sort_by,
                order: args.order,
                limit: Some(args.limit),
                offset: args.offset,
            })
            .await?;
        Ok(json!({
            "count": records.len(),
            "memories": records,
        }))
    }

    async fn stats(&self, args: &StoreArgs) -> Result<Value, MemoryError> {
        let engine = self.open(args).await?;
        let stats = engine.stats().await?;
        let mut payload = serde_json::to_value(&stats).map_err(encode_failed)?;
        payload["total_memories"] = Value::from(stats.records.count);
        Ok(payload)
    }

    async fn update(&self, args: UpdateArgs) -> Result<Value, MemoryError> {
        let engine = self.open(&args.store).await?;
        let changes = UpdateMemory {
            content: args.content,
            category: args.category,
            tags: args.tags,
            importance: args.importance,
            source: args.source,
        };
        let updated_fields = updated_fields(&changes);
        let record = engine.update(&args.id, changes).await?;
        Ok(json!({
            "id": record.id,
            "message": "Memory updated",
            "updated_fields": updated_fields,
            "memory": record,
        }))
    }

    async fn delete(&self, args: DeleteArgs) -> Result<Value, MemoryError> {
        let engine = self.open(&args.store).await?;
        let deleted = engine.delete(&args.id).await?;
        let message = if deleted {
            "Memory deleted"
        } else {
            "Memory did not exist"
        };
        Ok(json!({
            "id": args.id,
            "deleted": deleted,
            "message": message,
        }))
    }

    async fn verify(&self, args: &StoreArgs) -> Result<Value, MemoryError> {
        let engine = self.open(args).await?;
        let report = engine.verify().await?;
        Ok(json!({
            "consistent": report.is_consistent(),
            "records": report.records,
            "indexed": report.indexed,
            "problems": report.problems,
        }))
    }
}

fn updated_fields(changes: &UpdateMemory) -> Vec<&'static str> {
    [
        ("content", changes.content.is_some()),
        ("category", changes.category.is_some()),
        ("tags", changes.tags.is_some()),
        ("importance", changes.importance.is_some()),
        ("source", changes.source.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, present)| present.then_some(name))
    .collect()
}

fn encode_failed(err: serde_json::Error) -> MemoryError {
    MemoryError::Storage(format!("failed to encode result: {err}"))
}
