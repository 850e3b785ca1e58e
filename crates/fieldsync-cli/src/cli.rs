use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use fieldsync_core::network::{ConnectionKind, NetworkState};
use fieldsync_core::{ConflictStrategy, MutationType, Priority, Resolution, SyncStatus};

#[derive(Parser)]
#[command(name = "fieldsync")]
#[command(about = "Queue data changes offline and replay them when the network returns")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local sync database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Optional engine config file (JSON)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Network condition reported to the engine
    #[arg(long, global = true, value_enum, default_value_t = NetworkArg::Wifi)]
    pub network: NetworkArg,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Queue a mutation for the remote service
    #[command(alias = "add")]
    Enqueue {
        /// Mutation type
        #[arg(value_enum)]
        mutation: MutationArg,
        /// Entity (collection) name, e.g. `animals`
        entity: String,
        /// Record payload as a JSON object; update and delete need an `id`
        data: String,
        #[arg(short, long, value_enum, default_value_t = PriorityArg::Medium)]
        priority: PriorityArg,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List queued mutations
    List {
        /// Only show items in this state
        #[arg(long, value_enum)]
        status: Option<StatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run one sync session now
    Sync {
        #[command(subcommand)]
        command: Option<SyncCommands>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Resolve a recorded conflict
    Resolve {
        /// Conflict ID or unique ID prefix
        id: String,
        /// Side that wins
        #[arg(value_enum)]
        resolution: ResolutionArg,
    },
    /// Re-arm a mutation whose retries are exhausted
    Retry {
        /// Queue item ID or unique ID prefix
        id: String,
    },
    /// Show sync statistics
    Stats {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or change sync preferences
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },
    /// Run auto-sync in the foreground and print events until interrupted
    Watch {
        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
    /// Generate shell completion scripts
    Completions {
        /// Target shell
        #[arg(value_enum)]
        shell: CompletionShell,
        /// Optional output path (stdout when omitted)
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
pub enum SyncCommands {
    /// List recorded sync conflicts
    Conflicts {
        /// Include resolved conflicts
        #[arg(long)]
        all: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete resolved conflicts older than the given age
    Prune {
        #[arg(long, default_value = "30", value_name = "DAYS")]
        older_than_days: u64,
    },
}

#[derive(Subcommand)]
pub enum PrefsCommands {
    /// Print current preferences
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update one or more preferences
    Set(PrefsSetArgs),
}

#[derive(Args)]
pub struct PrefsSetArgs {
    #[arg(long)]
    pub auto_sync: Option<bool>,
    /// Auto-sync interval in minutes
    #[arg(long, value_name = "MINUTES")]
    pub interval: Option<u32>,
    #[arg(long)]
    pub sync_on_cellular: Option<bool>,
    #[arg(long)]
    pub max_retries: Option<u32>,
    #[arg(long, value_enum)]
    pub strategy: Option<StrategyArg>,
    /// Comma separated, e.g. `high,medium,low`
    #[arg(long, value_delimiter = ',', value_enum)]
    pub priority_order: Option<Vec<PriorityArg>>,
    /// Average outbound bytes per second
    #[arg(long, value_name = "BYTES", conflicts_with = "no_bandwidth_limit")]
    pub bandwidth_limit: Option<u64>,
    /// Remove the bandwidth limit
    #[arg(long)]
    pub no_bandwidth_limit: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum MutationArg {
    Create,
    Update,
    Delete,
}

impl From<MutationArg> for MutationType {
    fn from(value: MutationArg) -> Self {
        match value {
            MutationArg::Create => Self::Create,
            MutationArg::Update => Self::Update,
            MutationArg::Delete => Self::Delete,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    High,
    Medium,
    Low,
}

impl From<PriorityArg> for Priority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::High => Self::High,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::Low => Self::Low,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    Syncing,
    Failed,
    Conflicted,
}

impl From<StatusArg> for SyncStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::Syncing => Self::Syncing,
            StatusArg::Failed => Self::Failed,
            StatusArg::Conflicted => Self::Conflicted,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ResolutionArg {
    Local,
    Remote,
    Merge,
}

impl From<ResolutionArg> for Resolution {
    fn from(value: ResolutionArg) -> Self {
        match value {
            ResolutionArg::Local => Self::Local,
            ResolutionArg::Remote => Self::Remote,
            ResolutionArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StrategyArg {
    Local,
    Remote,
    Prompt,
    Merge,
}

impl From<StrategyArg> for ConflictStrategy {
    fn from(value: StrategyArg) -> Self {
        match value {
            StrategyArg::Local => Self::Local,
            StrategyArg::Remote => Self::Remote,
            StrategyArg::Prompt => Self::Prompt,
            StrategyArg::Merge => Self::Merge,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum NetworkArg {
    Wifi,
    Ethernet,
    Cellular,
    Offline,
}

impl From<NetworkArg> for NetworkState {
    fn from(value: NetworkArg) -> Self {
        match value {
            NetworkArg::Wifi => Self::online(ConnectionKind::Wifi),
            NetworkArg::Ethernet => Self::online(ConnectionKind::Ethernet),
            NetworkArg::Cellular => Self::online(ConnectionKind::Cellular),
            NetworkArg::Offline => Self::offline(),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum CompletionShell {
    Bash,
    Zsh,
    Fish,
}
