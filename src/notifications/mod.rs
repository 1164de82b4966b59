//! Initial notification push.
//!
//! When a connection subscribes to `notifications/<principal>`, the relay
//! pushes the user's outstanding behavioural experiments (`BE`), fear ladders
//! (`FL`) and evidence collection items (`EC`) as three separate messages.
//! Each kind is fetched, encoded and published on its own task, so one
//! failing kind never holds back the others.

pub mod hook;

pub use hook::NotificationHook;
