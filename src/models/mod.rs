pub mod item;
pub mod session;
pub mod symbol;

pub use item::LogItem;
pub use session::{
    AppIdentity, DeviceInfo, Location, LogSession, SamplingIntervals, TestOutcome, VideoInfo,
};
pub use symbol::{Level, Symbol};
