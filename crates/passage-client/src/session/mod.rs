/*
[INPUT]:  Identity client and token store
[OUTPUT]: Session state machine and registration flow
[POS]:    Session layer - public orchestration surface
[UPDATE]: When session operations change
*/

pub mod manager;
pub mod registration;
pub mod state;

pub use manager::Session;
pub use registration::{RegistrationFlow, RegistrationFlowState};
pub use state::{
    LinkOutcome, LoginOutcome, LogoutReason, RegistrationProfile, SessionEvent, SessionState,
};
