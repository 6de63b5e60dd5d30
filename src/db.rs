//! Report metadata store.
//!
//! Report records live in a single SQLite table. The pool is created once at
//! startup, migrations run before the server accepts traffic, and the store is
//! shared across handlers via `Arc<ReportStore>`.

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::info;

/// A published report.
#[derive(Debug, Clone)]
pub struct Report {
    pub id: i64,
    pub original_name: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Fields supplied by the upload handler; `id` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub original_name: String,
    pub filename: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: i64,
    original_name: String,
    filename: String,
    uploaded_at: i64,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Self {
            id: row.id,
            original_name: row.original_name,
            filename: row.filename,
            uploaded_at: DateTime::from_timestamp_millis(row.uploaded_at).unwrap_or_default(),
        }
    }
}

pub struct ReportStore {
    pool: SqlitePool,
}

impl ReportStore {
    /// Connect to the database and run pending migrations.
    ///
    /// Creates the SQLite file (and its parent directory) when missing.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let db_path = options.get_filename();
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
            && !database_url.contains(":memory:")
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        info!(backend = "sqlite", url = database_url, "database connected");
        Ok(Self { pool })
    }

    pub async fn insert(&self, report: NewReport) -> Result<Report, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO reports (original_name, filename, uploaded_at) VALUES (?, ?, ?)",
        )
        .bind(&report.original_name)
        .bind(&report.filename)
        .bind(report.uploaded_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(Report {
            id: result.last_insert_rowid(),
            original_name: report.original_name,
            filename: report.filename,
            uploaded_at: report.uploaded_at,
        })
    }

    /// All reports, most recent first.
    pub async fn list_recent(&self) -> Result<Vec<Report>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ReportRow>(
            "SELECT id, original_name, filename, uploaded_at FROM reports \
             ORDER BY uploaded_at DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Report::from).collect())
    }

    pub async fn find_by_filename(&self, filename: &str) -> Result<Option<Report>, sqlx::Error> {
        let row = sqlx::query_as::<_, ReportRow>(
            "SELECT id, original_name, filename, uploaded_at FROM reports WHERE filename = ?",
        )
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Report::from))
    }

    #[cfg(test)]
    pub(crate) async fn drop_reports_table(&self) -> Result<(), sqlx::Error> {
        sqlx::query("DROP TABLE reports").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::tempdir;

    async fn make_store() -> (tempfile::TempDir, ReportStore) {
        let temp = tempdir().expect("tempdir");
        let url = format!("sqlite://{}", temp.path().join("db/reports.db").display());
        let store = ReportStore::connect(&url).await.expect("connect");
        (temp, store)
    }

    fn new_report(name: &str, uploaded_at: DateTime<Utc>) -> NewReport {
        NewReport {
            original_name: name.to_string(),
            filename: format!("{}-{name}", uploaded_at.timestamp_millis()),
            uploaded_at,
        }
    }

    #[tokio::test]
    async fn list_recent_orders_newest_first() {
        let (_temp, store) = make_store().await;
        let base = Utc::now();
        store
            .insert(new_report("older.pdf", base - Duration::minutes(5)))
            .await
            .expect("insert older");
        store
            .insert(new_report("newest.pdf", base))
            .await
            .expect("insert newest");
        store
            .insert(new_report("middle.pdf", base - Duration::minutes(1)))
            .await
            .expect("insert middle");

        let reports = store.list_recent().await.expect("list");
        let names: Vec<_> = reports.iter().map(|r| r.original_name.as_str()).collect();
        assert_eq!(names, ["newest.pdf", "middle.pdf", "older.pdf"]);
        assert!(
            reports
                .windows(2)
                .all(|pair| pair[0].uploaded_at >= pair[1].uploaded_at)
        );
    }

    #[tokio::test]
    async fn same_timestamp_breaks_ties_by_insertion() {
        let (_temp, store) = make_store().await;
        let now = Utc::now();
        let mut first = new_report("first.pdf", now);
        first.filename = "a.pdf".into();
        let mut second = new_report("second.pdf", now);
        second.filename = "b.pdf".into();
        store.insert(first).await.expect("insert first");
        store.insert(second).await.expect("insert second");

        let reports = store.list_recent().await.expect("list");
        assert_eq!(reports[0].original_name, "second.pdf");
    }

    #[tokio::test]
    async fn find_by_filename_round_trips_metadata() {
        let (_temp, store) = make_store().await;
        let now = Utc::now();
        let inserted = store
            .insert(new_report("annual report.pdf", now))
            .await
            .expect("insert");

        let found = store
            .find_by_filename(&inserted.filename)
            .await
            .expect("query")
            .expect("report exists");
        assert_eq!(found.id, inserted.id);
        assert_eq!(found.original_name, "annual report.pdf");
        assert_eq!(
            found.uploaded_at.timestamp_millis(),
            now.timestamp_millis()
        );

        assert!(
            store
                .find_by_filename("missing.pdf")
                .await
                .expect("query")
                .is_none()
        );
    }

    #[tokio::test]
    async fn duplicate_filename_is_rejected() {
        let (_temp, store) = make_store().await;
        let now = Utc::now();
        store
            .insert(new_report("dup.pdf", now))
            .await
            .expect("first insert");
        assert!(store.insert(new_report("dup.pdf", now)).await.is_err());
    }

    #[tokio::test]
    async fn connect_fails_when_location_is_unusable() {
        let temp = tempdir().expect("tempdir");
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").expect("write blocker");

        let url = format!("sqlite://{}", blocker.join("reports.db").display());
        assert!(ReportStore::connect(&url).await.is_err());
    }
}
