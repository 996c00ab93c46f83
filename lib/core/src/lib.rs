pub mod clock;
pub mod error;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use error::ServiceError;
pub use types::{new_id, now_rfc3339, ListParams, ListResult};
