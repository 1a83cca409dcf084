#![allow(clippy::missing_errors_doc)]

pub mod error;

pub mod config;

pub mod logging;

pub mod context;

pub mod cli;

pub mod instance;

pub mod path {
    pub mod engine_path;
    pub use engine_path::{ArchiveAssoc, DriveDirs, EnginePath, ParseContext, PathKind};

    pub mod mask;
    pub use mask::{mask_apply, mask_match, MaskGroup};

    pub mod probe;
    pub use probe::{PathProbe, Probe};

    pub mod split;
    pub use split::{split_for_operation, OperationTarget};
}

pub mod volume {
    pub mod oracle;
    pub use oracle::{LinkKind, OsVolumeOracle, ReparseInfo, VolumeOracle};

    pub mod resolver;
    pub use resolver::{MountPointInfo, ResolvedReparse, VolumeAnswer, VolumeResolver};
}

pub mod fs {
    pub mod listing;
    pub use listing::{EntrySort, FileAttrs, Listing, ListingEntry};

    pub mod disk_source;
    pub use disk_source::{DiskSource, StdDiskSource};
}

pub mod cache {
    pub mod disk_cache;
    pub use disk_cache::{CacheLock, DiskCache, EntryState, PublishOutcome, ReserveOutcome};
}

pub mod vfs {
    pub mod provider;
    pub use provider::{
        ArchiverProvider, ChangePathMode, FsChangeOutcome, FsEvent, FsInstanceId, MenuExtension,
        PluginConfigIo, PluginFsProvider, PluginRecord,
    };

    pub mod registry;
    pub use registry::{FsInstance, PluginFsRegistry};
}

pub mod panel {
    pub mod state;
    pub use state::{PanelSide, PanelState};

    pub mod engine;
    pub use engine::{
        ChangePathOptions, ChangePathOutcome, PanelEngine, PanelEnv, RefreshOptions,
    };

    pub mod watcher;
    pub use watcher::{PanelChangeNotice, PanelWatcher};
}

pub mod ops {
    pub mod operation;
    pub use operation::{
        AttrChange, OpArchiver, OpKind, Operation, OperationOptions, OperationOutcome,
        OperationProgress,
    };

    pub mod plan;
    pub use plan::{build_plan, OperationPlan, PlanAction};

    pub mod prompt;
    pub use prompt::{
        AutoPromptSink, ChannelPromptSink, ErrorDecision, ErrorPolicy, ErrorPrompt,
        OverwriteDecision, OverwritePrompt, PromptRequest, PromptSink,
    };

    pub mod worker;
    pub use worker::{run_operation, WorkerContext};

    pub mod scheduler;
    pub use scheduler::{OperationHandle, OperationId, OperationScheduler};
}

pub mod idle {
    pub mod dispatcher;
    pub use dispatcher::{
        ActivationRequest, CommandStates, IdleDispatcher, IdleWork, PluginCommand,
        PluginCommandId, ACTIVATION_TTL,
    };
}

pub mod engine;
pub use engine::{DialogSurface, Engine, EngineHandle, EngineParams, EngineRequest, HeadlessDialogs};

pub mod util {
    pub mod debounce;
    pub use debounce::{RefreshDebounce, Throttler};
}

pub use context::EngineContext;
pub use error::{EngineError, EngineResult};
