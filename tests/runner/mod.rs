//! Runner Tests Module

mod flows;
mod worker_pool;
