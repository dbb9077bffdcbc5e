use super::types::{Bot, BotKind, BotSpec, BotStatus, RemoteAuth, RemoteTarget, Schedule};
use crate::error::RegistryError;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use std::path::{Path, PathBuf};

/// Durable bot record store backed by SQLite.
///
/// Every operation opens a short-lived connection, so the background
/// reconciliation loop and foreground command handling serialize per
/// operation without any in-process locking.
#[derive(Debug, Clone)]
pub struct Registry {
    db_path: PathBuf,
}

impl Registry {
    pub fn new(workspace_dir: &Path) -> Self {
        Self {
            db_path: workspace_dir.join("registry").join("bots.db"),
        }
    }

    pub fn add(&self, spec: &BotSpec) -> Result<Bot> {
        validate_spec(spec)?;
        let now = Utc::now();
        let (password, key_path) = match spec.remote.as_ref().map(|r| &r.auth) {
            Some(RemoteAuth::Password(p)) => (Some(p.clone()), None),
            Some(RemoteAuth::KeyFile(k)) => (None, Some(k.clone())),
            None => (None, None),
        };

        let id = self.with_connection(|conn| {
            let inserted = conn.execute(
                "INSERT INTO bots (
                    name, kind, script_path, status, host, port, username,
                    password, key_path, grp, schedule, created_at, start_count
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)",
                params![
                    spec.name,
                    spec.kind.as_db(),
                    spec.script_path,
                    BotStatus::Stopped.as_db(),
                    spec.remote.as_ref().map(|r| r.host.clone()),
                    spec.remote.as_ref().map(|r| i64::from(r.port)),
                    spec.remote.as_ref().map(|r| r.username.clone()),
                    password,
                    key_path,
                    spec.group,
                    spec.schedule.map(|s| s.to_string()),
                    now.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => Ok(conn.last_insert_rowid()),
                Err(e) if is_unique_violation(&e) => {
                    Err(RegistryError::DuplicateName(spec.name.clone()).into())
                }
                Err(e) => Err(e).context("failed to insert bot record"),
            }
        })?;

        Ok(Bot {
            id,
            name: spec.name.clone(),
            kind: spec.kind,
            script_path: spec.script_path.clone(),
            status: BotStatus::Stopped,
            remote: spec.remote.clone(),
            group: spec.group.clone(),
            schedule: spec.schedule,
            created_at: now,
            last_started: None,
            start_count: 0,
        })
    }

    pub fn list(&self) -> Result<Vec<Bot>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare_cached(&format!("SELECT {BOT_COLUMNS} FROM bots ORDER BY id ASC"))?;
            let rows = stmt.query_map([], bot_from_row)?;
            let mut bots = Vec::new();
            for row in rows {
                bots.push(row.context("failed to read bot row")?);
            }
            Ok(bots)
        })
    }

    pub fn get(&self, id: i64) -> Result<Bot> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare_cached(&format!("SELECT {BOT_COLUMNS} FROM bots WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], bot_from_row)?;
            match rows.next() {
                Some(row) => row.context("failed to read bot row"),
                None => Err(RegistryError::NotFound(id).into()),
            }
        })
    }

    /// Writes the recorded status. A transition to `Running` also stamps
    /// `last_started` and bumps `start_count`.
    pub fn update_status(&self, id: i64, status: BotStatus) -> Result<()> {
        let changed = self.with_connection(|conn| {
            let changed = if status.is_running() {
                conn.execute(
                    "UPDATE bots
                     SET status = ?1, last_started = ?2, start_count = start_count + 1
                     WHERE id = ?3",
                    params![status.as_db(), Utc::now().to_rfc3339(), id],
                )?
            } else {
                conn.execute(
                    "UPDATE bots SET status = ?1 WHERE id = ?2",
                    params![status.as_db(), id],
                )?
            };
            Ok(changed)
        })?;

        if changed == 0 {
            return Err(RegistryError::NotFound(id).into());
        }
        Ok(())
    }

    pub fn update_schedule(&self, id: i64, schedule: Option<Schedule>) -> Result<()> {
        let changed = self.with_connection(|conn| {
            conn.execute(
                "UPDATE bots SET schedule = ?1 WHERE id = ?2",
                params![schedule.map(|s| s.to_string()), id],
            )
            .context("failed to update bot schedule")
        })?;

        if changed == 0 {
            return Err(RegistryError::NotFound(id).into());
        }
        Ok(())
    }

    pub fn remove(&self, id: i64) -> Result<()> {
        let changed = self.with_connection(|conn| {
            conn.execute("DELETE FROM bots WHERE id = ?1", params![id])
                .context("failed to delete bot record")
        })?;

        if changed == 0 {
            return Err(RegistryError::NotFound(id).into());
        }
        Ok(())
    }

    pub fn count(&self) -> Result<usize> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM bots", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(usize::MAX))
        })
    }

    fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create registry directory: {}", parent.display())
            })?;
        }

        let conn = Connection::open(&self.db_path)
            .with_context(|| format!("failed to open registry DB: {}", self.db_path.display()))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bots (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                name         TEXT UNIQUE NOT NULL,
                kind         TEXT NOT NULL DEFAULT 'local',
                script_path  TEXT NOT NULL,
                status       TEXT NOT NULL DEFAULT 'stopped',
                host         TEXT,
                port         INTEGER,
                username     TEXT,
                password     TEXT,
                key_path     TEXT,
                grp          TEXT,
                schedule     TEXT,
                created_at   TEXT NOT NULL,
                last_started TEXT,
                start_count  INTEGER NOT NULL DEFAULT 0
            );",
        )
        .context("failed to initialize registry schema")?;

        add_column_if_missing(&conn, "ALTER TABLE bots ADD COLUMN grp TEXT")?;
        add_column_if_missing(&conn, "ALTER TABLE bots ADD COLUMN schedule TEXT")?;
        add_column_if_missing(&conn, "ALTER TABLE bots ADD COLUMN last_started TEXT")?;
        add_column_if_missing(
            &conn,
            "ALTER TABLE bots ADD COLUMN start_count INTEGER NOT NULL DEFAULT 0",
        )?;

        f(&conn)
    }
}

const BOT_COLUMNS: &str = "id, name, kind, script_path, status, host, port, username, \
                           password, key_path, grp, schedule, created_at, last_started, \
                           start_count";

fn validate_spec(spec: &BotSpec) -> Result<()> {
    match (spec.kind, spec.remote.is_some()) {
        (BotKind::Remote, false) => {
            Err(RegistryError::Invalid("remote bot without a remote target".into()).into())
        }
        (BotKind::Local, true) => {
            Err(RegistryError::Invalid("local bot with a remote target".into()).into())
        }
        _ => Ok(()),
    }
}

fn is_unique_violation(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn add_column_if_missing(conn: &Connection, sql: &str) -> Result<()> {
    match conn.execute(sql, []) {
        Ok(_) => Ok(()),
        Err(error) => {
            if error.to_string().contains("duplicate column name") {
                Ok(())
            } else {
                Err(error.into())
            }
        }
    }
}

fn bot_from_row(row: &Row<'_>) -> rusqlite::Result<Bot> {
    let kind = BotKind::from_db(&row.get::<_, String>(2)?);
    let host: Option<String> = row.get(5)?;
    let port: Option<i64> = row.get(6)?;
    let username: Option<String> = row.get(7)?;
    let password: Option<String> = row.get(8)?;
    let key_path: Option<String> = row.get(9)?;

    let remote = match (kind, host) {
        (BotKind::Remote, Some(host)) => {
            let auth = match (password, key_path) {
                (Some(password), _) => RemoteAuth::Password(password),
                (None, Some(key_path)) => RemoteAuth::KeyFile(key_path),
                (None, None) => RemoteAuth::Password(String::new()),
            };
            Some(RemoteTarget {
                host,
                port: u16::try_from(port.unwrap_or(22)).unwrap_or(22),
                username: username.unwrap_or_default(),
                auth,
            })
        }
        _ => None,
    };

    let schedule: Option<String> = row.get(11)?;
    let created_at: String = row.get(12)?;
    let last_started: Option<String> = row.get(13)?;
    let start_count: i64 = row.get(14)?;

    Ok(Bot {
        id: row.get(0)?,
        name: row.get(1)?,
        kind,
        script_path: row.get(3)?,
        status: BotStatus::from_db(&row.get::<_, String>(4)?),
        remote,
        group: row.get(10)?,
        schedule: schedule.and_then(|raw| raw.parse().ok()),
        created_at: parse_rfc3339(&created_at),
        last_started: last_started.as_deref().map(parse_rfc3339),
        start_count: u32::try_from(start_count).unwrap_or(0),
    })
}

fn parse_rfc3339(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_registry(tmp: &TempDir) -> Registry {
        Registry::new(tmp.path())
    }

    fn local_spec(name: &str) -> BotSpec {
        BotSpec {
            name: name.into(),
            kind: BotKind::Local,
            script_path: "/opt/bots/worker.sh".into(),
            remote: None,
            group: None,
            schedule: None,
        }
    }

    fn remote_spec(name: &str) -> BotSpec {
        BotSpec {
            name: name.into(),
            kind: BotKind::Remote,
            script_path: "/home/pi/bots/worker.sh".into(),
            remote: Some(RemoteTarget {
                host: "192.168.1.10".into(),
                port: 22,
                username: "pi".into(),
                auth: RemoteAuth::KeyFile("/home/op/.ssh/id_ed25519".into()),
            }),
            group: Some("edge".into()),
            schedule: Some("09:00".parse().unwrap()),
        }
    }

    #[test]
    fn add_then_get_round_trips() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        let created = registry.add(&remote_spec("worker1")).unwrap();
        let fetched = registry.get(created.id).unwrap();

        assert_eq!(fetched.name, "worker1");
        assert_eq!(fetched.kind, BotKind::Remote);
        assert_eq!(fetched.script_path, "/home/pi/bots/worker.sh");
        assert_eq!(fetched.status, BotStatus::Stopped);
        assert_eq!(fetched.group.as_deref(), Some("edge"));
        assert_eq!(fetched.schedule, Some("09:00".parse().unwrap()));
        assert_eq!(fetched.start_count, 0);
        assert!(fetched.last_started.is_none());

        let remote = fetched.remote.expect("remote target");
        assert_eq!(remote.host, "192.168.1.10");
        assert_eq!(remote.username, "pi");
        assert!(matches!(remote.auth, RemoteAuth::KeyFile(_)));
    }

    #[test]
    fn defaults_apply_when_spec_omits_optionals() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        let created = registry.add(&local_spec("plain")).unwrap();
        let fetched = registry.get(created.id).unwrap();

        assert_eq!(fetched.status, BotStatus::Stopped);
        assert!(fetched.schedule.is_none());
        assert!(fetched.group.is_none());
        assert!(fetched.remote.is_none());
    }

    #[test]
    fn duplicate_name_is_rejected_and_count_unchanged() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        registry.add(&local_spec("worker1")).unwrap();
        let err = registry.add(&local_spec("worker1")).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::DuplicateName(name)) if name == "worker1"
        ));
        assert_eq!(registry.count().unwrap(), 1);
    }

    #[test]
    fn get_unknown_id_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        let err = registry.get(99).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::NotFound(99))
        ));
    }

    #[test]
    fn update_status_to_running_bumps_start_bookkeeping() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let bot = registry.add(&local_spec("worker1")).unwrap();

        registry.update_status(bot.id, BotStatus::Running).unwrap();
        let fetched = registry.get(bot.id).unwrap();
        assert_eq!(fetched.status, BotStatus::Running);
        assert_eq!(fetched.start_count, 1);
        assert!(fetched.last_started.is_some());

        registry.update_status(bot.id, BotStatus::Stopped).unwrap();
        let fetched = registry.get(bot.id).unwrap();
        assert_eq!(fetched.status, BotStatus::Stopped);
        assert_eq!(fetched.start_count, 1);
    }

    #[test]
    fn update_status_on_missing_bot_reports_not_found() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        let err = registry.update_status(7, BotStatus::Running).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::NotFound(7))
        ));
    }

    #[test]
    fn schedule_can_be_set_and_cleared() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let bot = registry.add(&local_spec("worker1")).unwrap();

        registry
            .update_schedule(bot.id, Some("06:30".parse().unwrap()))
            .unwrap();
        assert_eq!(
            registry.get(bot.id).unwrap().schedule,
            Some("06:30".parse().unwrap())
        );

        registry.update_schedule(bot.id, None).unwrap();
        assert!(registry.get(bot.id).unwrap().schedule.is_none());
    }

    #[test]
    fn remove_deletes_the_record() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);
        let bot = registry.add(&local_spec("worker1")).unwrap();

        registry.remove(bot.id).unwrap();
        assert_eq!(registry.count().unwrap(), 0);

        let err = registry.remove(bot.id).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RegistryError>(),
            Some(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn kind_target_mismatch_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let registry = test_registry(&tmp);

        let mut spec = local_spec("bad-local");
        spec.remote = remote_spec("ignored").remote;
        assert!(registry.add(&spec).is_err());

        let mut spec = remote_spec("bad-remote");
        spec.remote = None;
        assert!(registry.add(&spec).is_err());
    }
}
