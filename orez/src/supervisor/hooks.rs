//! Lifecycle hooks: either a shell command or an in-process callback,
//! both run with the environment derived for the consumer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::process::Command;

type Callback = Arc<dyn Fn(&HashMap<String, String>) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Error)]
pub enum HookError {
    #[error("hook exited with code {0}")]
    Exit(i32),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Callback(String),
}

#[derive(Clone)]
pub enum Hook {
    /// Shell command, run through `sh -c`.
    Shell(String),
    /// In-process callback; receives the same environment as a map.
    Callback(Callback),
}

impl Hook {
    pub fn callback(
        callback: impl Fn(&HashMap<String, String>) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Hook::Callback(Arc::new(callback))
    }

    pub async fn run(&self, env: &HashMap<String, String>) -> Result<(), HookError> {
        match self {
            Hook::Shell(command) => {
                let status = Command::new("sh")
                    .arg("-c")
                    .arg(command)
                    .envs(env)
                    .status()
                    .await?;

                if status.success() {
                    Ok(())
                } else {
                    Err(HookError::Exit(status.code().unwrap_or(-1)))
                }
            }
            Hook::Callback(callback) => callback(env).map_err(HookError::Callback),
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Shell(command) => write!(f, "Hook::Shell({:?})", command),
            Hook::Callback(_) => write!(f, "Hook::Callback"),
        }
    }
}

// Config files can only express the shell arm.
impl<'de> Deserialize<'de> for Hook {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(Hook::Shell(String::deserialize(deserializer)?))
    }
}
