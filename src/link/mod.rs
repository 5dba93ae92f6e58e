pub mod channel;
pub mod messages;

pub use channel::{CommandSender, ControlLink, StatusReceiver, SupervisorLink, link};
pub use messages::{Command, StateLabel, StatusSnapshot};
