//! JSON-lines file sink standing in for the upstream collector.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use agromesh_services::{ResponseEntry, Uplink};

/// One reading as written to the sink.
#[derive(Serialize)]
struct UplinkRecord<'a> {
    node: &'a str,
    controller: &'a str,
    data: String,
    received_at: u64,
}

pub struct JsonLinesUplink {
    path: PathBuf,
}

impl JsonLinesUplink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Uplink for JsonLinesUplink {
    fn deliver(&self, batch: &[ResponseEntry]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = String::new();
        for entry in batch {
            let record = UplinkRecord {
                node: entry.src.as_str(),
                controller: entry.dest.as_str(),
                data: hex::encode(entry.data),
                received_at: entry.received_at,
            };
            out.push_str(&serde_json::to_string(&record)?);
            out.push('\n');
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open {}", self.path.display()))?;
        file.write_all(out.as_bytes())
            .with_context(|| format!("failed to append to {}", self.path.display()))?;
        Ok(())
    }
}
