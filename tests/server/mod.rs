//! Server Tests Module

mod liveness;
