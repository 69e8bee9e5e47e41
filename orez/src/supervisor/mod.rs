//! Lifecycle supervisor: ordered startup, shutdown, targeted resets, and
//! OS signal handling. Composes the instance manager, the proxy listener
//! and the consumer subprocess.

pub mod consumer;
pub mod hooks;
pub mod ports;
pub mod reset;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tracing::{debug, error, info, warn};

use crate::backend::instance::Instance;
use crate::backend::{changelog, manager, Instances};
use crate::config::{self, Config};
use crate::frontend::{comms, Listener};

use consumer::Consumer;
use hooks::HookError;
use reset::ResetLock;

pub const PID_FILE: &str = "orez.pid";
pub const ADMIN_FILE: &str = "orez.admin";

/// How long to wait for client tasks to drain on shutdown.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum Error {
    #[error("no free port found near {0}")]
    PortsExhausted(u16),

    #[error("{0}")]
    Manager(#[from] manager::Error),

    #[error("{0}")]
    Changelog(#[from] changelog::Error),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("on-db-ready hook failed: {0}")]
    DbReadyHook(HookError),

    #[error("consumer spawn failed: {0}")]
    ConsumerSpawn(String),

    #[error("consumer exited with code {0} before becoming healthy:\n{1}")]
    ConsumerExited(i32, String),

    #[error("consumer health check timed out:\n{0}")]
    HealthTimeout(String),
}

/// Lifecycle states. Transitions happen only inside supervisor methods;
/// signal handlers dispatch onto the supervisor task instead of acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    NotStarted,
    Starting,
    Healthy,
    Stopping,
    Stopped,
    Resetting,
}

pub struct Supervisor {
    config: Arc<Config>,
    instances: Arc<Instances>,
    listener: Listener,
    listener_task: JoinHandle<()>,
    consumer: Option<Consumer>,
    reset_lock: Arc<ResetLock>,
    state: State,
}

impl Supervisor {
    /// Allocate ports, boot the instances, prepare the database, start the
    /// listener and the consumer. Fatal errors unwind everything.
    pub async fn start(config: Config) -> Result<Self, Error> {
        let pg_port = ports::allocate(config.pg_port).await?;
        let consumer_port = ports::allocate(config.consumer_port).await?;
        let admin_port = ports::allocate(config.admin_port).await?;

        config::set(config.with_ports(pg_port, consumer_port, admin_port));
        let config = config::config();

        info!("starting (pg={}, consumer={})", config.pg_port, config.consumer_port);

        let instances = Arc::new(Instances::open(&config).await?);

        match Self::boot(config.clone(), instances.clone()).await {
            Ok(supervisor) => Ok(supervisor),
            Err(err) => {
                instances.close_all().await;
                remove_runtime_files(&config).await;
                Err(err)
            }
        }
    }

    async fn boot(config: Arc<Config>, instances: Arc<Instances>) -> Result<Self, Error> {
        instances.wait_ready().await?;
        instances.migrate(&config).await?;
        instances.seed(&config).await?;
        instances.sync_publication(&config).await?;

        let (publications, _) = config.publications();
        changelog::install(&instances.postgres(), &publications).await?;

        write_runtime_files(&config).await?;

        let env = consumer::environment(&config);
        if let Some(hook) = &config.on_db_ready {
            hook.run(&env).await.map_err(Error::DbReadyHook)?;

            // The hook may have changed the schema.
            instances.sync_publication(&config).await?;
            changelog::install(&instances.postgres(), &publications).await?;
        }

        let listener = Listener::new(format!("127.0.0.1:{}", config.pg_port));
        let listener_task = tokio::spawn({
            let listener = listener.clone();
            let instances = instances.clone();
            async move {
                if let Err(err) = listener.listen(instances).await {
                    error!("listener: {}", err);
                }
            }
        });

        let consumer = if config.skip_consumer {
            info!("consumer disabled");
            None
        } else {
            let mut consumer = Consumer::spawn(&config)?;
            consumer.health_wait(&config).await?;

            if let Some(hook) = &config.on_healthy {
                if let Err(err) = hook.run(&env).await {
                    // Non-fatal by design; the stack is already serving.
                    error!("on-healthy hook: {}", err);
                }
            }

            Some(consumer)
        };

        info!("ready");

        Ok(Self {
            config,
            instances,
            listener,
            listener_task,
            consumer,
            reset_lock: Arc::new(ResetLock::new(&config::config().data_dir)),
            state: State::Healthy,
        })
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Block on OS signals until shutdown; returns the process exit code.
    pub async fn run(mut self) -> i32 {
        let comms = comms();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                error!("failed to install SIGINT handler");
                return 1;
            };
            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                error!("failed to install SIGTERM handler");
                return 1;
            };
            let Ok(mut sigusr1) = signal(SignalKind::user_defined1()) else {
                error!("failed to install SIGUSR1 handler");
                return 1;
            };
            let Ok(mut sigusr2) = signal(SignalKind::user_defined2()) else {
                error!("failed to install SIGUSR2 handler");
                return 1;
            };

            loop {
                select! {
                    _ = sigint.recv() => {
                        info!("SIGINT, shutting down");
                        self.shutdown().await;
                        return 130;
                    }
                    _ = sigterm.recv() => {
                        info!("SIGTERM, shutting down");
                        self.shutdown().await;
                        return 143;
                    }
                    _ = sigusr1.recv() => {
                        info!("SIGUSR1, full reset");
                        if let Err(err) = self.full_reset().await {
                            error!("reset failed: {}", err);
                        }
                    }
                    _ = sigusr2.recv() => {
                        info!("SIGUSR2, stopping consumer");
                        self.stop_consumer().await;
                    }
                    _ = comms.on_shutdown() => {
                        self.shutdown().await;
                        return 0;
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            select! {
                _ = tokio::signal::ctrl_c() => {
                    self.shutdown().await;
                    130
                }
                _ = comms.on_shutdown() => {
                    self.shutdown().await;
                    0
                }
            }
        }
    }

    /// Ordered shutdown: consumer, listener, client drain, instances,
    /// runtime files.
    pub async fn shutdown(&mut self) {
        self.state = State::Stopping;

        self.stop_consumer().await;

        self.listener.shutdown();
        let comms = comms();
        comms.tracker().close();
        if timeout(SHUTDOWN_DRAIN, comms.tracker().wait()).await.is_err() {
            warn!("client connections still open after {:?}", SHUTDOWN_DRAIN);
        }
        self.listener_task.abort();

        self.instances.close_all().await;
        remove_runtime_files(&self.config).await;

        self.state = State::Stopped;
        info!("stopped");
    }

    /// Stop the consumer without restarting it (SIGUSR2).
    pub async fn stop_consumer(&mut self) {
        if let Some(mut consumer) = self.consumer.take() {
            consumer.stop().await;
        }
    }

    /// Remove the consumer's replica cache and restart it. The embedded
    /// databases are untouched.
    pub async fn cache_reset(&mut self) -> Result<(), Error> {
        let reset_lock = self.reset_lock.clone();
        let Some(_guard) = reset_lock.acquire() else {
            warn!("reset already in progress");
            return Ok(());
        };
        self.state = State::Resetting;
        info!("cache reset");

        self.stop_consumer().await;

        for path in consumer::replica_paths(&self.config) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => debug!("removed {}", path.display()),
                Err(_) => (),
            }
        }

        self.restart_consumer().await;
        self.state = State::Healthy;
        Ok(())
    }

    /// Wipe everything derived: replica instances, consumer schemas, the
    /// change log, the replica cache. The app schema and data survive.
    pub async fn full_reset(&mut self) -> Result<(), Error> {
        let reset_lock = self.reset_lock.clone();
        let Some(_guard) = reset_lock.acquire() else {
            warn!("reset already in progress");
            return Ok(());
        };
        self.state = State::Resetting;
        info!("full reset");

        self.stop_consumer().await;

        self.instances.recreate(manager::CVR).await?;
        self.instances.recreate(manager::CDB).await?;

        let postgres = self.instances.postgres();
        drop_consumer_schemas(&postgres).await;
        changelog::truncate(&postgres).await?;

        for path in consumer::replica_paths(&self.config) {
            let _ = tokio::fs::remove_file(&path).await;
        }

        self.instances.sync_publication(&self.config).await?;
        let (publications, _) = self.config.publications();
        changelog::install(&postgres, &publications).await?;

        if let Some(hook) = &self.config.on_db_ready {
            if let Err(err) = hook.run(&consumer::environment(&self.config)).await {
                error!("on-db-ready hook during reset: {}", err);
            }
        }

        self.restart_consumer().await;
        self.state = State::Healthy;
        Ok(())
    }

    /// Bring the consumer back after a reset. Failure here is logged and
    /// the consumer stays down; the databases keep serving.
    async fn restart_consumer(&mut self) {
        if self.config.skip_consumer {
            return;
        }

        match Consumer::spawn(&self.config) {
            Ok(mut consumer) => match consumer.health_wait(&self.config).await {
                Ok(()) => self.consumer = Some(consumer),
                Err(err) => error!("consumer unhealthy after reset: {}", err),
            },
            Err(err) => error!("consumer restart: {}", err),
        }
    }
}

/// Schemas the consumer creates on the upstream database. They reference
/// replica state that a full reset just destroyed.
async fn drop_consumer_schemas(postgres: &Instance) {
    let rows = postgres
        .query(
            "SELECT nspname::text FROM pg_namespace \
             WHERE nspname = 'zero' OR nspname LIKE 'zero\\_%'",
            &[],
        )
        .await;

    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => {
            debug!("consumer schema scan: {}", err);
            return;
        }
    };

    for row in &rows {
        let Some(Value::String(schema)) = row.get("nspname") else {
            continue;
        };

        if let Err(err) = postgres
            .exec(&format!(r#"DROP SCHEMA IF EXISTS "{}" CASCADE"#, schema))
            .await
        {
            debug!("dropping schema {}: {}", schema, err);
        }
    }
}

async fn write_runtime_files(config: &Config) -> Result<(), std::io::Error> {
    tokio::fs::write(
        config.data_dir.join(PID_FILE),
        std::process::id().to_string(),
    )
    .await?;

    if config.dashboard {
        tokio::fs::write(
            config.data_dir.join(ADMIN_FILE),
            config.admin_port.to_string(),
        )
        .await?;
    }

    Ok(())
}

async fn remove_runtime_files(config: &Config) {
    let _ = tokio::fs::remove_file(config.data_dir.join(PID_FILE)).await;
    let _ = tokio::fs::remove_file(config.data_dir.join(ADMIN_FILE)).await;
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn runtime_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            dashboard: true,
            admin_port: 4850,
            ..Default::default()
        };

        write_runtime_files(&config).await.unwrap();
        let pid = tokio::fs::read_to_string(dir.path().join(PID_FILE))
            .await
            .unwrap();
        assert_eq!(pid, std::process::id().to_string());
        let admin = tokio::fs::read_to_string(dir.path().join(ADMIN_FILE))
            .await
            .unwrap();
        assert_eq!(admin, "4850");

        remove_runtime_files(&config).await;
        assert!(!dir.path().join(PID_FILE).exists());
        assert!(!dir.path().join(ADMIN_FILE).exists());
    }

    #[tokio::test]
    async fn admin_file_only_with_dashboard() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            dashboard: false,
            ..Default::default()
        };

        write_runtime_files(&config).await.unwrap();
        assert!(dir.path().join(PID_FILE).exists());
        assert!(!dir.path().join(ADMIN_FILE).exists());
    }
}
