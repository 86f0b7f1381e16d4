pub mod profile;
pub mod record;
pub mod result;
pub mod work_item;

pub use profile::{
    Container, FilterSet, Provider, RateLimitConfig, SyncProfile, SyncStrategy, TimeRangeConfig,
    TimeRangePreset, TimeWindow,
};
pub use record::{ItemFields, LocalRecord, Origin, ProgressUpdate};
pub use result::{Conflict, Resolution, SyncResult};
pub use work_item::WorkItem;
