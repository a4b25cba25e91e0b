//! Command implementations for the operator tool

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;

use anyhow::{Context, Result, bail};
use sha1::{Digest, Sha1};
use tracing::info;

use tokenkit_tps::ceremony::{
    KeyCeremony, KeyShare, SHARE_COUNT, WrappedKeyFile, combiner::SHARE_LENGTH,
};
use tokenkit_tps::provider::{CryptoProvider, KeyAlgorithm};

use crate::store::Database;

/// Display form of a check value: uppercase hex pairs
fn format_kcv(kcv: &[u8]) -> String {
    hex::encode_upper(kcv)
}

/// Generate a transport key from freshly drawn shares (`-T`)
pub fn generate_transport(
    db: &Database,
    pwfile: Option<&Path>,
    keyname: &str,
    algorithm: KeyAlgorithm,
    non_exportable: bool,
    noisefile: Option<&Path>,
) -> Result<()> {
    let mut provider = db.open(pwfile)?;

    let report = match noisefile {
        None => KeyCeremony::new(&mut provider).generate_transport_key(
            keyname,
            algorithm,
            non_exportable,
        )?,
        Some(path) => {
            // operator-supplied noise stands in for the final share
            let mut shares: Vec<KeyShare> =
                (0..SHARE_COUNT - 1).map(|_| KeyShare::generate()).collect();
            shares.push(noise_share(path)?);
            KeyCeremony::new(&mut provider).input_generate_transport_key(
                keyname,
                algorithm,
                &shares,
                non_exportable,
            )?
        }
    };

    db.save(&provider)?;
    println!("Generated transport key \"{}\"", report.nickname);
    println!("KCV: {}", format_kcv(&report.kcv));
    Ok(())
}

/// Generate a transport key from operator-entered shares (`-I`)
pub fn input_generate_transport(
    db: &Database,
    pwfile: Option<&Path>,
    keyname: &str,
    algorithm: KeyAlgorithm,
    non_exportable: bool,
) -> Result<()> {
    let mut provider = db.open(pwfile)?;

    // fail on a taken nickname before any share is typed
    if provider.find_key(keyname).is_some() {
        bail!("duplicate keyname: {keyname}");
    }

    let mut shares = Vec::with_capacity(SHARE_COUNT);
    let stdin = io::stdin();
    for i in 1..=SHARE_COUNT {
        eprint!("Enter share {i} of {SHARE_COUNT} ({SHARE_LENGTH} bytes hex): ");
        io::stderr().flush().ok();
        let mut line = String::new();
        stdin.lock().read_line(&mut line).context("reading share")?;
        shares.push(KeyShare::from_hex(&line)?);
    }

    let report = KeyCeremony::new(&mut provider).input_generate_transport_key(
        keyname,
        algorithm,
        &shares,
        non_exportable,
    )?;

    db.save(&provider)?;
    println!("Generated transport key \"{}\"", report.nickname);
    println!("KCV: {}", format_kcv(&report.kcv));
    Ok(())
}

/// Generate a master key (`-M`)
pub fn generate_master(
    db: &Database,
    pwfile: Option<&Path>,
    keyname: &str,
    algorithm: KeyAlgorithm,
    keylen: Option<usize>,
) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    let report = KeyCeremony::new(&mut provider).generate_master_key(keyname, algorithm, keylen)?;

    db.save(&provider)?;
    println!("Generated master key \"{}\"", report.nickname);
    println!("KCV: {}", format_kcv(&report.kcv));
    Ok(())
}

/// Wrap a master key to an output file (`-W`)
pub fn wrap(
    db: &Database,
    pwfile: Option<&Path>,
    transport: &str,
    keyname: &str,
    outfile: &Path,
) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    let file = KeyCeremony::new(&mut provider).wrap_master_key(transport, keyname)?;

    fs::write(outfile, file.to_bytes())
        .with_context(|| format!("writing {}", outfile.display()))?;
    println!("Wrapped \"{keyname}\" under \"{transport}\" into {}", outfile.display());
    println!("KCV: {}", format_kcv(&file.kcv));
    Ok(())
}

/// Unwrap a master key from an input file (`-U`)
pub fn unwrap(
    db: &Database,
    pwfile: Option<&Path>,
    transport: &str,
    keyname: &str,
    infile: &Path,
) -> Result<()> {
    let mut provider = db.open(pwfile)?;

    let raw = fs::read(infile).with_context(|| format!("reading {}", infile.display()))?;
    let file = WrappedKeyFile::parse(&raw)?;

    let report = KeyCeremony::new(&mut provider).unwrap_master_key(transport, keyname, &file)?;

    db.save(&provider)?;
    println!("Unwrapped master key \"{}\"", report.nickname);
    println!("KCV: {}", format_kcv(&report.kcv));
    Ok(())
}

/// Delete a key (`-D`)
pub fn delete(db: &Database, pwfile: Option<&Path>, keyname: &str) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    KeyCeremony::new(&mut provider).delete_key(keyname)?;
    db.save(&provider)?;
    println!("Deleted key \"{keyname}\"");
    Ok(())
}

/// Rename a key (`-R`)
pub fn rename(db: &Database, pwfile: Option<&Path>, keyname: &str, new_keyname: &str) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    KeyCeremony::new(&mut provider).rename_key(keyname, new_keyname)?;
    db.save(&provider)?;
    println!("Renamed key \"{keyname}\" to \"{new_keyname}\"");
    Ok(())
}

/// List keys (`-L`)
pub fn list_keys(db: &Database, pwfile: Option<&Path>) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    let keys = KeyCeremony::new(&mut provider).list_keys();

    if keys.is_empty() {
        println!("No keys in database");
        return Ok(());
    }
    for key in keys {
        let algorithm = key
            .algorithm
            .map_or_else(|| "keypair".to_string(), |a| format!("{a:?}").to_uppercase());
        let exportable = if key.extractable { "" } else { " (non-exportable)" };
        println!("{}  {}  {} bits{}", key.nickname, algorithm, key.bits, exportable);
    }
    Ok(())
}

/// Display a key's check value (`-K`)
pub fn display_kcv(db: &Database, pwfile: Option<&Path>, keyname: &str) -> Result<()> {
    let mut provider = db.open(pwfile)?;
    let kcv = KeyCeremony::new(&mut provider).display_kcv(keyname)?;
    println!("KCV for \"{keyname}\": {}", format_kcv(&kcv));
    Ok(())
}

/// Create fresh databases (`-N`)
pub fn new_databases(db: &Database, pwfile: Option<&Path>) -> Result<()> {
    db.create(pwfile)?;
    info!("created key databases");
    println!("Created new key databases");
    Ok(())
}

/// Change the database password (`-P`)
pub fn change_password(db: &Database, pwfile: &Path) -> Result<()> {
    db.change_password(pwfile)?;
    println!("Database password changed");
    Ok(())
}

/// List security modules (`-S`)
pub fn list_modules(db: &Database, pwfile: Option<&Path>, token: Option<&str>) -> Result<()> {
    if let Some(name) = token {
        if name != "internal" {
            bail!("security module not found: {name}");
        }
    }
    // opening verifies the database is reachable
    let _ = db.open(pwfile)?;
    println!("internal: software key store (slot 0)");
    Ok(())
}

/// Derive a share from a noise file
fn noise_share(path: &Path) -> Result<KeyShare> {
    let noise = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let digest = Sha1::digest(&noise);
    KeyShare::from_hex(&hex::encode(&digest[..SHARE_LENGTH])).map_err(Into::into)
}
