//! Command-line definitions for the `recall` binary.

use clap::{Args, Parser, Subcommand};
use recall_rs_memory::{Category, SortBy, SortOrder};
use std::path::PathBuf;

/// Persistent semantic memory for coding agents.
#[derive(Parser, Debug)]
#[command(name = "recall", version)]
pub struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Store directory override shared by every subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct StoreArgs {
    /// Store directory (default: <project>/.claude/memory or ~/.claude/memory)
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the store or check an existing one
    Init(InitArgs),
    /// Store a new memory
    Store(StoreMemoryArgs),
    /// Semantic search over memories
    Query(QueryArgs),
    /// List memories without searching
    List(ListArgs),
    /// Show store statistics
    Stats(StoreArgs),
    /// Change fields of an existing memory
    Update(UpdateArgs),
    /// Delete a memory
    Delete(DeleteArgs),
    /// Cross-check records against the search index
    Verify(StoreArgs),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Init(_) => "init",
            Command::Store(_) => "store",
            Command::Query(_) => "query",
            Command::List(_) => "list",
            Command::Stats(_) => "stats",
            Command::Update(_) => "update",
            Command::Delete(_) => "delete",
            Command::Verify(_) => "verify",
        }
    }

    pub fn store_args(&self) -> &StoreArgs {
        match self {
            Command::Init(args) => &args.store,
            Command::Store(args) => &args.store,
            Command::Query(args) => &args.store,
            Command::List(args) => &args.store,
            Command::Stats(args) | Command::Verify(args) => args,
            Command::Update(args) => &args.store,
            Command::Delete(args) => &args.store,
        }
    }
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Embedding provider: ollama or openai (detected when omitted)
    #[arg(long)]
    pub provider: Option<String>,
    /// Embedding model (provider default when omitted)
    #[arg(long)]
    pub model: Option<String>,
    /// Embedding dimension (model default when omitted)
    #[arg(long)]
    pub dimension: Option<usize>,
    /// Delete every memory and re-create the store
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct StoreMemoryArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Memory text
    #[arg(long)]
    pub content: String,
    /// Memory category
    #[arg(long, default_value_t = Category::Fact)]
    pub category: Category,
    /// Tags attached to the memory
    #[arg(long, num_args = 0..)]
    pub tags: Vec<String>,
    /// Importance between 0.0 and 1.0
    #[arg(long)]
    pub importance: Option<f64>,
    /// Where the memory came from
    #[arg(long)]
    pub source: Option<String>,
    /// Custom memory id (generated when omitted)
    #[arg(long)]
    pub id: Option<String>,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Search text
    #[arg(long)]
    pub text: String,
    /// Maximum number of results
    #[arg(long, default_value_t = recall_rs_memory::model::DEFAULT_TOPK)]
    pub topk: usize,
    /// Only return memories of this category
    #[arg(long)]
    pub category: Option<Category>,
    /// Only return memories carrying every tag
    #[arg(long, num_args = 0..)]
    pub tags: Vec<String>,
    /// Only return memories at least this important
    #[arg(long)]
    pub min_importance: Option<f64>,
    /// Search width override
    #[arg(long)]
    pub ef: Option<usize>,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Only list memories of this category
    #[arg(long)]
    pub category: Option<Category>,
    /// Only list memories carrying every tag
    #[arg(long, num_args = 0..)]
    pub tags: Vec<String>,
    /// Only list memories at least this important
    #[arg(long)]
    pub min_importance: Option<f64>,
    /// Maximum number of memories
    #[arg(long, default_value_t = recall_rs_memory::model::DEFAULT_LIST_LIMIT)]
    pub limit: usize,
    /// Memories to skip
    #[arg(long, default_value_t = 0)]
    pub offset: usize,
    /// created_at, updated_at, importance, access_count or category
    #[arg(long, default_value = "created_at")]
    pub sort_by: SortBy,
    /// asc or desc (field default when omitted)
    #[arg(long)]
    pub order: Option<SortOrder>,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Memory id
    #[arg(long)]
    pub id: String,
    /// New text; the memory is re-embedded
    #[arg(long)]
    pub content: Option<String>,
    /// New category
    #[arg(long)]
    pub category: Option<Category>,
    /// Replacement tags
    #[arg(long, num_args = 0..)]
    pub tags: Option<Vec<String>>,
    /// New importance
    #[arg(long)]
    pub importance: Option<f64>,
    /// New source; an empty value clears it
    #[arg(long)]
    pub source: Option<String>,
}

#[derive(Args, Debug)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub store: StoreArgs,
    /// Memory id
    #[arg(long)]
    pub id: String,
}
