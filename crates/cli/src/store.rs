//! Key database handling for the operator tool
//!
//! A database directory holds one JSON key store plus an optional
//! password file, both named with the configured prefix. Commands that
//! open an existing database verify the password before touching keys.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tokenkit_tps::provider::SoftProvider;

/// Paths of one database instance
#[derive(Debug)]
pub struct Database {
    store_path: PathBuf,
    password_path: PathBuf,
}

impl Database {
    /// Resolve database paths under `dbdir` with an optional prefix
    pub fn locate(dbdir: &Path, prefix: Option<&str>) -> Self {
        let prefix = prefix.unwrap_or("");
        Self {
            store_path: dbdir.join(format!("{prefix}keystore.json")),
            password_path: dbdir.join(format!("{prefix}password")),
        }
    }

    /// Create fresh, empty databases. Refuses to clobber existing ones.
    pub fn create(&self, password_file: Option<&Path>) -> Result<()> {
        if self.store_path.exists() {
            bail!("key database already exists: {}", self.store_path.display());
        }
        if let Some(dir) = self.store_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("creating database directory {}", dir.display()))?;
        }

        SoftProvider::new()
            .save(&self.store_path)
            .context("writing empty key store")?;

        if let Some(pwfile) = password_file {
            let password = read_password(pwfile)?;
            fs::write(&self.password_path, password).context("writing database password")?;
        }
        Ok(())
    }

    /// Open an existing database, verifying the password when one is set
    pub fn open(&self, password_file: Option<&Path>) -> Result<SoftProvider> {
        if !self.store_path.exists() {
            bail!(
                "key database not found: {} (create one with -N)",
                self.store_path.display()
            );
        }

        if self.password_path.exists() {
            let expected = fs::read_to_string(&self.password_path)
                .context("reading database password")?;
            let Some(pwfile) = password_file else {
                bail!("database is password protected; supply -f pwfile");
            };
            if read_password(pwfile)? != expected.trim() {
                bail!("incorrect database password");
            }
        }

        SoftProvider::load(&self.store_path).map_err(Into::into)
    }

    /// Persist a provider back to disk
    pub fn save(&self, provider: &SoftProvider) -> Result<()> {
        provider.save(&self.store_path).map_err(Into::into)
    }

    /// Replace the database password with the first line of `pwfile`
    pub fn change_password(&self, pwfile: &Path) -> Result<()> {
        if !self.store_path.exists() {
            bail!("key database not found: {}", self.store_path.display());
        }
        let password = read_password(pwfile)?;
        fs::write(&self.password_path, password).context("writing database password")?;
        Ok(())
    }
}

/// First line of a password file, trimmed
fn read_password(path: &Path) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading password file {}", path.display()))?;
    Ok(raw.lines().next().unwrap_or("").trim().to_string())
}
