//! Service structures grouped by service set

pub mod attribute;
pub mod endpoint;
pub mod identity;
pub mod monitored_item;
pub mod notification;
pub mod secure_channel;
pub mod session;
pub mod subscription;
pub mod view;

pub use attribute::*;
pub use endpoint::*;
pub use identity::*;
pub use monitored_item::*;
pub use notification::*;
pub use secure_channel::*;
pub use session::*;
pub use subscription::*;
pub use view::*;
