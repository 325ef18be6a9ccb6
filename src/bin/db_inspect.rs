// src/bin/db_inspect.rs
//! Database inspector: unlock a file and print its group tree
//!
//! Usage: db_inspect <database> [key-file]

use std::io::Write;
use std::path::PathBuf;
use std::thread;

use anyhow::{bail, Context, Result};
use encrypted_db_codec::{
    CompositeKey, Database, DatabaseError, DatabaseManager, GroupId, KeyFileSource, ManagerEvent,
};
use rpassword::read_password;
use tracing::{info, warn};

fn print_group(db: &Database, id: GroupId, depth: usize) {
    let tree = db.tree();
    let Some(group) = tree.group(id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let marker = if group.is_deleted { " (deleted)" } else { "" };
    println!("{indent}[{}]{marker}", group.name);
    for &entry_id in group.entries() {
        if let Some(entry) = tree.entry(entry_id) {
            let attachments = entry.attachments.len();
            let history = entry.history.len();
            println!(
                "{indent}  - {} <{}> {}{}",
                entry.title(),
                entry.user_name(),
                entry.url(),
                if attachments + history > 0 {
                    format!(" [{attachments} attachment(s), {history} version(s)]")
                } else {
                    String::new()
                }
            );
        }
    }
    for &child in group.groups() {
        print_group(db, child, depth + 1);
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args_os().skip(1);
    let Some(path) = args.next().map(PathBuf::from) else {
        bail!("usage: db_inspect <database> [key-file]");
    };
    let key_file = args.next().map(|p| KeyFileSource::Path(PathBuf::from(p)));

    print!("Password for {}: ", path.display());
    std::io::stdout().flush()?;
    let password = read_password().context("failed to read password")?;
    let key = CompositeKey::new(&password, key_file, None);

    let data = std::fs::read(&path).with_context(|| format!("cannot read {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let manager = DatabaseManager::new();
    let events = manager.subscribe();
    let reporter = thread::spawn(move || {
        for event in events {
            match event {
                ManagerEvent::ProgressChanged(fraction) => {
                    info!("unlocking… {:.0}%", fraction * 100.0)
                }
                ManagerEvent::DidLoad { .. } | ManagerEvent::LoadFailed { .. } => break,
                ManagerEvent::LoadCancelled | ManagerEvent::InvalidKey => break,
                _ => {}
            }
        }
    });

    let Ok(result) = manager.start_load(file_name, data, key).join() else {
        bail!("loader thread panicked");
    };
    let _ = reporter.join();
    let warnings = match result {
        Ok(warnings) => warnings,
        Err(DatabaseError::InvalidKey) => bail!("wrong password or key file"),
        Err(err) => return Err(err).context("load failed"),
    };

    if let Some(generator) = &warnings.generator {
        info!("written by {generator}");
    }
    for issue in &warnings.issues {
        warn!("{issue}");
    }

    manager.with_database(|db| {
        println!(
            "{:?} database, {} group(s), {} entr(ies)",
            db.format(),
            db.tree().group_count(),
            db.tree().entry_count()
        );
        print_group(db, db.root(), 0);
    });
    manager.close()?;
    Ok(())
}
