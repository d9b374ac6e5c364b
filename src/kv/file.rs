//! Flat filesystem implementation of the [`KeyValueStore`] contract.
//!
//! One directory per value type under a root DSN directory, one file per
//! object, filename = logical name, contents = UTF-8 JSON. Mutations
//! serialize through a single process-local mutex; the store assumes it is
//! the only writer. Resolver lookups are served by re-encoding the record
//! buckets into service documents on demand; the flat store carries no
//! leases, so every document reports a lease of zero seconds.

use crate::error::Error;
use crate::kv::{CreatedOn, KeyValueStore, Kv, RecordLookup, ValueType};
use crate::model;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;

#[allow(clippy::module_name_repetitions)]
pub struct FileStore {
    root: PathBuf,
    path_prefix: String,
    write_mux: Mutex<()>,
}

impl FileStore {
    /// Open a store rooted at `root`, creating the per-type bucket
    /// directories as needed.
    pub async fn open(root: impl AsRef<Path>, path_prefix: &str) -> Result<Self, Error> {
        let root = root.as_ref().to_path_buf();
        for vtype in ValueType::ALL {
            fs::create_dir_all(root.join(vtype.as_str())).await?;
        }
        Ok(FileStore {
            root,
            path_prefix: path_prefix.to_string(),
            write_mux: Mutex::new(()),
        })
    }

    fn object_path(&self, name: &str, vtype: ValueType) -> PathBuf {
        self.root.join(vtype.as_str()).join(name)
    }

    async fn write_value(
        &self,
        name: &str,
        vtype: ValueType,
        value: &str,
        overwrite: bool,
    ) -> Result<(), Error> {
        let _guard = self.write_mux.lock().await;
        let path = self.object_path(name, vtype);
        let mut options = fs::OpenOptions::new();
        options.write(true).truncate(true);
        if overwrite {
            options.create(true);
        } else {
            options.create_new(true);
        }
        let mut f = match options.open(&path).await {
            Ok(f) => f,
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        f.write_all(value.as_bytes()).await?;
        f.flush().await?;
        Ok(())
    }

    /// Every record bucket re-encoded into resolver documents.
    async fn all_documents(&self) -> Result<Vec<Kv>, Error> {
        let mut docs = Vec::new();
        for vtype in ValueType::ALL.into_iter().filter(|v| v.is_record()) {
            for name in self.list(vtype).await? {
                let Some(raw) = self.get(&name, vtype).await? else {
                    continue;
                };
                match model::service_documents(vtype, &raw, &self.path_prefix) {
                    Ok(services) => {
                        for (key, serv) in services {
                            docs.push(Kv {
                                key,
                                value: serde_json::to_string(&serv)?,
                                lease_secs: 0,
                            });
                        }
                    }
                    Err(err) => {
                        warn!(%name, %vtype, %err, "skipping malformed stored record");
                    }
                }
            }
        }
        Ok(docs)
    }
}

#[async_trait::async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, name: &str, vtype: ValueType) -> Result<Option<String>, Error> {
        match fs::read_to_string(self.object_path(name, vtype)).await {
            Ok(raw) => Ok(Some(raw)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn set(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error> {
        self.write_value(name, vtype, value, false).await
    }

    async fn update(&self, name: &str, vtype: ValueType, value: &str) -> Result<(), Error> {
        self.write_value(name, vtype, value, true).await
    }

    async fn delete(&self, name: &str, vtype: ValueType) -> Result<(), Error> {
        let _guard = self.write_mux.lock().await;
        match fs::remove_file(self.object_path(name, vtype)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn list(&self, vtype: ValueType) -> Result<Vec<String>, Error> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(self.root.join(vtype.as_str())).await?;
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        Ok(names)
    }

    async fn get_expired(&self, vtype: ValueType, cutoff_nanos: i64) -> Result<Vec<String>, Error> {
        let mut expired = Vec::new();
        for name in self.list(vtype).await? {
            let Some(raw) = self.get(&name, vtype).await? else {
                continue;
            };
            let record: CreatedOn = match serde_json::from_str(&raw) {
                Ok(record) => record,
                Err(err) => {
                    warn!(%name, %vtype, %err, "skipping undecodable value in expiry scan");
                    continue;
                }
            };
            if record.created_on < cutoff_nanos {
                expired.push(name);
            }
        }
        Ok(expired)
    }
}

#[async_trait::async_trait]
impl RecordLookup for FileStore {
    async fn fetch(&self, path: &str) -> Result<Vec<Kv>, Error> {
        let docs = self.all_documents().await?;
        Ok(docs.into_iter().filter(|kv| kv.key == path).collect())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<Kv>, Error> {
        let child_prefix = format!("{prefix}/");
        let docs = self.all_documents().await?;
        Ok(docs
            .into_iter()
            .filter(|kv| kv.key == prefix || kv.key.starts_with(&child_prefix))
            .collect())
    }
}
