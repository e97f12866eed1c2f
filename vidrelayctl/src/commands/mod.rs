mod collect;
mod relay;

pub use collect::CollectArgs;
pub use relay::{RecoverArgs, ScanArgs, SendArgs, WatchArgs};
