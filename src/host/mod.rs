//! Host runtime boundary
//!
//! Everything that touches the host capability table or a raw code
//! address lives in this family: the `#[repr(C)]` table itself and the
//! module export statics ([`api`]), the scoped symbol resolver
//! ([`resolver`]), and the inline-hook installer ([`hooks`]).
//! Interception handlers never see raw addresses directly.

pub mod api;
pub mod hooks;
pub mod resolver;
