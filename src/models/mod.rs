mod notification;
mod purchase_event;
mod sku;
mod subscription;

pub use notification::*;
pub use purchase_event::*;
pub use sku::*;
pub use subscription::*;
