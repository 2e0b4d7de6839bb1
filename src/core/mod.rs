pub mod clock;
pub mod error;
pub mod notify;
pub mod record;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{MutationKind, Result, SyncError};
pub use notify::{MemoryNotifier, Notification, NotificationLevel, Notifier, TracingNotifier};
pub use record::{PROVISIONAL_PREFIX, Record, is_provisional, lenient_category, provisional_id};
