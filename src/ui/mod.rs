//! Short-lived interactive messages: buttons, select menus and reactions.

pub mod interactable;
pub mod reactable;
pub mod scrollable;
pub mod session;

pub use interactable::{ButtonOptions, Interactable, SelectItem, SelectOptions};
pub use reactable::Reactable;
pub use scrollable::{Pager, Scrollable};
pub use session::{
    EndReason, MessageRef, SessionContext, SessionEvent, SessionHandle, SessionRegistry,
    SessionSurface, DEFAULT_SESSION_DURATION,
};
