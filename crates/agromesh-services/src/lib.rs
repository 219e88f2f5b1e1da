//! Node services: the relay pipeline, role handling, polling and the
//! collaborator seams they run against.

pub mod dedup;
pub mod forwarder;
pub mod medium;
pub mod node_status;
pub mod notify;
pub mod poller;
pub mod radio;
pub mod relay;
pub mod response_queue;
pub mod role;
pub mod sensor;
pub mod sequence;

pub use dedup::{DedupCache, DedupStore, FileDedupStore, NullDedupStore};
pub use forwarder::{Uplink, UplinkForwarder};
pub use medium::{Ether, MemoryRadio, StationId};
pub use node_status::{NodeStatus, NodeStatusTable};
pub use notify::{LogNotifier, Notifier, NotifierSet, NotifyReason};
pub use poller::{ControllerPoller, PollError, PollOutcome, PollReport};
pub use radio::{Radio, RadioError, SharedRadio};
pub use relay::{DropReason, OriginHandle, RelayEngine, RelayError, RelayOutcome, RelayStats, RelayStatsSnapshot};
pub use response_queue::{ResponseEntry, ResponseQueue};
pub use role::{Dispatched, ReplyError, RoleDispatcher};
pub use sensor::{SensorDriver, SensorError};
pub use sequence::SequenceCounter;
