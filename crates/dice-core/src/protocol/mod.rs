//! Message exchange contract between the transport and the game layer.

pub mod dispatch;
