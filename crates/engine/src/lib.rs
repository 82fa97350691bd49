//! Habit engine.
//!
//! The engine owns the habit data model and every write path to it. All
//! writes go through a single transactional `get-then-validate-then-write`
//! discipline: the habit rules in [`validator`] run on the full candidate
//! state inside the same database transaction that commits it, so a related
//! habit cannot change between validation and commit.

pub use error::EngineError;
pub use habits::{Habit, HabitDraft, TIME_FORMAT};
pub use ops::{Engine, EngineBuilder};
pub use profiles::Profile;
pub use validator::{RelatedSnapshot, ValidationError, validate};

mod error;
mod habits;
mod ops;
mod profiles;
mod users;
mod validator;

type ResultEngine<T> = Result<T, EngineError>;
