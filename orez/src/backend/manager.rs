//! The three named embedded instances and their shared lifecycle:
//! creation, migrations, seeding and publication upkeep.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use futures::future::try_join3;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, info};

use crate::config::Config;

use super::changelog::INTERNAL_PREFIX;
use super::engine::{EmbeddedEngine, EngineError};
use super::instance::Instance;

pub const POSTGRES: &str = "postgres";
pub const CVR: &str = "cvr";
pub const CDB: &str = "cdb";

/// Extensions the app schema may rely on. Replica instances stay bare.
const EXTENSIONS: &[&str] = &["uuid-ossp"];

const STATEMENT_BREAKPOINT: &str = "--> statement-breakpoint";

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Engine(#[from] EngineError),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown instance \"{0}\"")]
    UnknownInstance(String),
}

/// The fixed set of instances, created at startup and destroyed at
/// shutdown. The replica pair can be swapped out by a full reset.
pub struct Instances {
    postgres: ArcSwap<Instance>,
    cvr: ArcSwap<Instance>,
    cdb: ArcSwap<Instance>,
    data_dir: PathBuf,
}

impl Instances {
    /// Create all three instances in parallel, migrating the legacy
    /// single-directory layout first if one is found.
    pub async fn open(config: &Config) -> Result<Self, Error> {
        fs::create_dir_all(&config.data_dir).await?;
        migrate_legacy_layout(&config.data_dir).await?;

        let (postgres, cvr, cdb) = try_join3(
            open_instance(&config.data_dir, POSTGRES),
            open_instance(&config.data_dir, CVR),
            open_instance(&config.data_dir, CDB),
        )
        .await?;

        for extension in EXTENSIONS {
            postgres
                .exec(&format!(r#"CREATE EXTENSION IF NOT EXISTS "{}""#, extension))
                .await?;
        }

        Ok(Self {
            postgres: ArcSwap::new(postgres),
            cvr: ArcSwap::new(cvr),
            cdb: ArcSwap::new(cdb),
            data_dir: config.data_dir.clone(),
        })
    }

    /// Route a startup-packet database name to an instance. The consumer
    /// connects as `cvr`/`cdb` (its connection strings) or `zero_cvr`/
    /// `zero_cdb` (its derived names); anything else is the main database.
    /// Replication connections always land on `postgres` regardless.
    pub fn get(&self, database: &str) -> Arc<Instance> {
        match database {
            "cvr" | "zero_cvr" => self.cvr.load_full(),
            "cdb" | "zero_cdb" => self.cdb.load_full(),
            _ => self.postgres.load_full(),
        }
    }

    /// The instance carrying the change log and app schema.
    pub fn postgres(&self) -> Arc<Instance> {
        self.postgres.load_full()
    }

    pub async fn wait_ready(&self) -> Result<(), Error> {
        self.postgres.load_full().wait_ready().await?;
        self.cvr.load_full().wait_ready().await?;
        self.cdb.load_full().wait_ready().await?;
        Ok(())
    }

    /// Best-effort close of every instance, in no particular order.
    pub async fn close_all(&self) {
        for instance in [
            self.postgres.load_full(),
            self.cvr.load_full(),
            self.cdb.load_full(),
        ] {
            if let Err(err) = instance.close().await {
                debug!("[{}] close: {}", instance.name(), err);
            }
        }
    }

    /// Tear down a replica instance, wipe its storage, and boot a fresh
    /// empty one in its place. Full-reset only; `postgres` is never
    /// recreated.
    pub async fn recreate(&self, name: &str) -> Result<(), Error> {
        let slot = match name {
            CVR => &self.cvr,
            CDB => &self.cdb,
            other => return Err(Error::UnknownInstance(other.to_string())),
        };

        if let Err(err) = slot.load_full().close().await {
            debug!("[{}] close before recreate: {}", name, err);
        }

        let dir = instance_dir(&self.data_dir, name);
        if fs::metadata(&dir).await.is_ok() {
            fs::remove_dir_all(&dir).await?;
        }

        slot.store(open_instance(&self.data_dir, name).await?);
        info!("[{}] recreated", name);
        Ok(())
    }

    /// Apply pending migrations to the `postgres` instance.
    pub async fn migrate(&self, config: &Config) -> Result<(), Error> {
        let Some(dir) = &config.migrations_dir else {
            return Ok(());
        };
        if fs::metadata(dir).await.is_err() {
            debug!("no migrations directory at {}", dir.display());
            return Ok(());
        }

        let postgres = self.postgres();
        postgres
            .exec(
                "CREATE SCHEMA IF NOT EXISTS orez; \
                 CREATE TABLE IF NOT EXISTS orez.migrations ( \
                     name text PRIMARY KEY, \
                     applied_at timestamptz NOT NULL DEFAULT now() \
                 )",
            )
            .await?;

        let applied = postgres
            .query("SELECT name FROM orez.migrations", &[])
            .await?
            .iter()
            .filter_map(|row| match row.get("name") {
                Some(Value::String(name)) => Some(name.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();

        for stem in migration_stems(dir).await? {
            if applied.contains(&stem) {
                continue;
            }

            let path = dir.join(format!("{}.sql", stem));
            let sql = fs::read_to_string(&path).await?;

            info!("applying migration {}", stem);
            for statement in split_statements(&sql) {
                postgres.exec(&statement).await?;
            }

            postgres
                .query(
                    "INSERT INTO orez.migrations (name) VALUES ($1) ON CONFLICT DO NOTHING",
                    &[stem.as_str()],
                )
                .await?;
        }

        Ok(())
    }

    /// Seed the database from the configured SQL file, but only when the
    /// probe table is empty or absent.
    pub async fn seed(&self, config: &Config) -> Result<(), Error> {
        let Some(file) = &config.seed_file else {
            return Ok(());
        };
        if fs::metadata(file).await.is_err() {
            debug!("no seed file at {}", file.display());
            return Ok(());
        }

        let postgres = self.postgres();
        let populated = match postgres
            .query("SELECT count(*)::text AS count FROM public.\"user\"", &[])
            .await
        {
            Ok(rows) => !matches!(
                rows.first().and_then(|row| row.get("count")),
                Some(Value::String(count)) if count == "0"
            ),
            // Probe table missing entirely: seed.
            Err(_) => false,
        };

        if populated {
            debug!("database already seeded");
            return Ok(());
        }

        info!("seeding from {}", file.display());
        let sql = fs::read_to_string(file).await?;
        for statement in split_statements(&sql) {
            postgres.exec(&statement).await?;
        }

        Ok(())
    }

    /// Keep the managed publication in step with the `public` schema:
    /// create it if missing, add any table not already in it. User-supplied
    /// publications are left alone.
    pub async fn sync_publication(&self, config: &Config) -> Result<(), Error> {
        let Some(publication) = config.managed_publication() else {
            return Ok(());
        };

        let postgres = self.postgres();

        let exists = !postgres
            .query(
                "SELECT 1 AS one FROM pg_publication WHERE pubname = $1",
                &[publication.as_str()],
            )
            .await?
            .is_empty();

        if !exists {
            postgres
                .exec(&format!(r#"CREATE PUBLICATION "{}""#, publication))
                .await?;
            info!("created publication {}", publication);
        }

        let tables = postgres
            .query(
                "SELECT tablename::text FROM pg_tables WHERE schemaname = 'public'",
                &[],
            )
            .await?;

        let members = postgres
            .query(
                "SELECT tablename::text FROM pg_publication_tables WHERE pubname = $1",
                &[publication.as_str()],
            )
            .await?
            .iter()
            .filter_map(|row| match row.get("tablename") {
                Some(Value::String(name)) => Some(name.clone()),
                _ => None,
            })
            .collect::<Vec<_>>();

        for row in &tables {
            let Some(Value::String(table)) = row.get("tablename") else {
                continue;
            };
            if table.starts_with(INTERNAL_PREFIX) || members.contains(table) {
                continue;
            }

            postgres
                .exec(&format!(
                    r#"ALTER PUBLICATION "{}" ADD TABLE public."{}""#,
                    publication, table
                ))
                .await?;
            debug!("published public.{}", table);
        }

        Ok(())
    }
}

#[cfg(test)]
impl Instances {
    /// Assemble from prebuilt instances; tests only.
    pub(crate) fn for_tests(
        postgres: Arc<Instance>,
        cvr: Arc<Instance>,
        cdb: Arc<Instance>,
    ) -> Self {
        Self {
            postgres: ArcSwap::new(postgres),
            cvr: ArcSwap::new(cvr),
            cdb: ArcSwap::new(cdb),
            data_dir: std::env::temp_dir(),
        }
    }
}

fn instance_dir(data_dir: &Path, name: &str) -> PathBuf {
    data_dir.join(format!("pgdata-{}", name))
}

async fn open_instance(data_dir: &Path, name: &str) -> Result<Arc<Instance>, Error> {
    let engine = EmbeddedEngine::open(&instance_dir(data_dir, name), name).await?;
    Ok(Instance::new(name, Box::new(engine)))
}

/// Older versions kept a single `pgdata/` directory; adopt it as the
/// `postgres` instance.
async fn migrate_legacy_layout(data_dir: &Path) -> Result<(), std::io::Error> {
    let legacy = data_dir.join("pgdata");
    let current = instance_dir(data_dir, POSTGRES);

    if fs::metadata(&legacy).await.is_ok() && fs::metadata(&current).await.is_err() {
        info!("migrating legacy data layout to {}", current.display());
        fs::rename(&legacy, &current).await?;
    }

    Ok(())
}

#[derive(Debug, Deserialize)]
struct Journal {
    entries: Vec<JournalEntry>,
}

#[derive(Debug, Deserialize)]
struct JournalEntry {
    tag: String,
}

/// Migration stems in application order: the journal file when present,
/// otherwise a sorted filename scan.
async fn migration_stems(dir: &Path) -> Result<Vec<String>, Error> {
    let journal_path = dir.join("meta").join("_journal.json");

    if let Ok(text) = fs::read_to_string(&journal_path).await {
        let journal: Journal = serde_json::from_str(&text)?;
        return Ok(journal.entries.into_iter().map(|entry| entry.tag).collect());
    }

    let mut stems = vec![];
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map(|ext| ext == "sql").unwrap_or(false) {
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                stems.push(stem.to_string());
            }
        }
    }

    stems.sort();
    Ok(stems)
}

/// Split a migration file into statements on the breakpoint marker.
fn split_statements(sql: &str) -> Vec<String> {
    sql.split(STATEMENT_BREAKPOINT)
        .map(|statement| statement.trim())
        .filter(|statement| !statement.is_empty())
        .map(|statement| statement.to_string())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn statements_split_on_breakpoint() {
        let sql = "CREATE TABLE a (id text);\n--> statement-breakpoint\nCREATE TABLE b (id text);\n--> statement-breakpoint\n";
        let statements = split_statements(sql);

        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "CREATE TABLE a (id text);");
        assert_eq!(statements[1], "CREATE TABLE b (id text);");
    }

    #[test]
    fn single_statement_without_breakpoint() {
        assert_eq!(split_statements("SELECT 1;"), vec!["SELECT 1;"]);
        assert!(split_statements("  \n ").is_empty());
    }

    #[tokio::test]
    async fn journal_order_wins_over_sorted_scan() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("meta")).await.unwrap();
        tokio::fs::write(
            dir.path().join("meta").join("_journal.json"),
            r#"{"entries": [{"tag": "0002_later"}, {"tag": "0001_first"}]}"#,
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("0001_first.sql"), "SELECT 1;")
            .await
            .unwrap();

        let stems = migration_stems(dir.path()).await.unwrap();
        assert_eq!(stems, vec!["0002_later", "0001_first"]);
    }

    #[tokio::test]
    async fn sorted_scan_without_journal() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("0002_b.sql"), "SELECT 2;")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("0001_a.sql"), "SELECT 1;")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("notes.txt"), "ignored")
            .await
            .unwrap();

        let stems = migration_stems(dir.path()).await.unwrap();
        assert_eq!(stems, vec!["0001_a", "0002_b"]);
    }

    #[tokio::test]
    async fn legacy_layout_renamed_once() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir(dir.path().join("pgdata")).await.unwrap();

        migrate_legacy_layout(dir.path()).await.unwrap();
        assert!(dir.path().join("pgdata-postgres").exists());
        assert!(!dir.path().join("pgdata").exists());

        // Second run is a no-op.
        migrate_legacy_layout(dir.path()).await.unwrap();
        assert!(dir.path().join("pgdata-postgres").exists());
    }
}
