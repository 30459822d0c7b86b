pub mod agent;
pub mod extract;
pub mod nlu;
pub mod scheduling;
pub mod state;
pub mod steps;

pub use agent::{ChatAgent, Dispatcher, Step, TurnReply};
pub use nlu::{Intent, LanguageService, RigLanguageService};
pub use scheduling::{Availability, BookingError, BookingService};
pub use state::{ConversationState, Mode, Tri};
