//! Avatar ("alter") selection
//!
//! The selected alter is modelled as one [`AvatarReference`] value owned by the
//! chat session. Local persistence is a side effect of changing it
//! (save-on-change, load-on-init) through [`SettingsStore`].

mod reference;
mod settings;

pub use reference::{AvatarKind, AvatarReference};
pub use settings::{AvatarSettings, SettingsStore};
