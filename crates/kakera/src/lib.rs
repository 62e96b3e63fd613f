pub mod config;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod event;
pub mod fetch;
pub mod fragment;
pub mod heartbeat;
pub mod livechat;
pub mod retry;
pub mod sink;
pub mod source;
pub mod util;

pub use config::{EngineConfig, RetrySleep};
pub use descriptor::ProviderDescriptor;
pub use engine::{DownloadHandle, DownloadSummary, FragmentDownloadEngine};
pub use error::{KakeraError, KakeraResult};
pub use event::{DownloadEvent, EventReporter};
pub use fetch::{FragmentFetcher, HttpFetcher, ResponseDecoder};
pub use fragment::{Continuation, FragmentIndex, FragmentRequest, FragmentResult};
pub use heartbeat::{HeartbeatPing, HeartbeatSignaler, HttpHeartbeat, NoHeartbeat};
pub use retry::RetryCoordinator;
pub use sink::{FileSink, MemorySink, OutputSink, SinkOutcome};
pub use source::{ContinuationSource, FiniteSource, FragmentSource, Next};
pub use util::http::HttpClient;
