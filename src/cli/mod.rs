//! The `gort` binary's administrative surface. Deliberately thin: the
//! full REST control plane and multi-user CLI are out of scope (§1
//! Non-goals) — this just covers enough bundle/user management and a
//! loopback demo to exercise the library end to end.

pub mod bundle;
pub mod demo;
pub mod doctor;
