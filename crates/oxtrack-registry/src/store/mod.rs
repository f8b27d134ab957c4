use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{
    ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction, DbErr, TransactionTrait,
};
use std::future::Future;
use std::pin::Pin;

use crate::secrets::SecretEncryptor;

pub mod alert;
pub mod lock;
pub mod notification;

pub use alert::{AlertPage, AlertPatch, NewAlert};

/// Unified access layer over the management database.
///
/// All methods are `async fn` on top of SeaORM. The event stream is not
/// here; it lives in the partitioned analytics store.
pub struct Registry {
    pub(crate) db: DatabaseConnection,
    pub(crate) secret_encryptor: SecretEncryptor,
}

impl Registry {
    /// Connect and initialize the management database.
    ///
    /// - `db_url`: full connection URL, e.g. `sqlite:///data/oxtrack.db?mode=rwc`
    ///   or `sqlite::memory:` in tests.
    /// - `key_material`: operator-supplied material the webhook-secret
    ///   encryption key is derived from.
    ///
    /// Runs all pending `sea-orm-migration` migrations.
    pub async fn new(db_url: &str, key_material: &str) -> Result<Self> {
        let db = Database::connect(db_url).await?;

        // WAL mode only applies to file-backed SQLite
        if db_url.starts_with("sqlite://") {
            db.execute_unprepared("PRAGMA journal_mode=WAL;").await?;
        }

        Migrator::up(&db, None).await?;

        let secret_encryptor = SecretEncryptor::from_key_material(key_material);
        tracing::info!(db_url = %db_url, "Initialized alert registry");

        Ok(Self {
            db,
            secret_encryptor,
        })
    }

    pub(crate) fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Run `callback` inside a transaction: committed on `Ok`, rolled back
    /// on `Err`. Callers already inside a transaction should work through
    /// their `DatabaseTransaction` handle instead of opening a nested one
    /// here.
    pub async fn with_transaction<T, F>(&self, callback: F) -> Result<T>
    where
        F: for<'c> FnOnce(
                &'c DatabaseTransaction,
            )
                -> Pin<Box<dyn Future<Output = std::result::Result<T, DbErr>> + Send + 'c>>
            + Send,
        T: Send,
    {
        Ok(self.db.transaction(callback).await?)
    }
}
