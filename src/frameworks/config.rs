use std::{env, time::Duration};

use crate::use_cases::{FinalWritePolicy, SupervisorSettings};

// Runtime/server constants (not gameplay tuning).

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub fn http_port() -> u16 {
    env::var("ENGINE_HTTP_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3004)
}

pub fn poll_interval() -> Duration {
    Duration::from_millis(env_u64("ENGINE_POLL_INTERVAL_MS", 5000).max(1))
}

// 0 disables the bound.
pub fn max_instances() -> Option<usize> {
    match env_u64("ENGINE_MAX_INSTANCES", 0) {
        0 => None,
        max => Some(max as usize),
    }
}

pub fn input_queue_capacity() -> usize {
    env_u64("ENGINE_INPUT_QUEUE_CAPACITY", 256).max(1) as usize
}

pub fn final_write_policy() -> FinalWritePolicy {
    FinalWritePolicy {
        attempts: env_u64("ENGINE_FINAL_WRITE_ATTEMPTS", 3).clamp(1, u32::MAX as u64) as u32,
        backoff: Duration::from_millis(env_u64("ENGINE_FINAL_WRITE_BACKOFF_MS", 250)),
    }
}

// Unset means the in-memory store seeded with the built-in catalog.
pub fn database_url() -> Option<String> {
    env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty())
}

pub fn supervisor_settings() -> SupervisorSettings {
    SupervisorSettings {
        poll_interval: poll_interval(),
        max_concurrent: max_instances(),
        input_queue_capacity: input_queue_capacity(),
        final_write: final_write_policy(),
    }
}

pub const TOPIC_CHANNEL_CAPACITY: usize = 128;
pub const INBOUND_CHANNEL_CAPACITY: usize = 1024;
