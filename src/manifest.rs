//! YAML description of a batch run.
//!
//! ```yaml
//! rate_policy: sales-population
//! activity_columns: ["Action Performed", "Date", "Time"]
//! partitions:
//!   - person: alice
//!     month: "03"
//!     report_type: isr
//!     activity: alice/alice_sales_activity_03.csv
//!     jobs: total_jobs_03.csv
//!     sales: alice/alice_commission_isr_03.csv
//! ```
//!
//! Relative input paths are resolved against the manifest's own directory.

use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::reconcile::{PartitionKey, RatePolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    pub rate_policy: Option<RatePolicy>,
    #[serde(default)]
    pub activity_columns: Option<Vec<String>>,
    #[serde(default)]
    pub write_details: Option<bool>,
    pub partitions: Vec<PartitionSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionSpec {
    pub person: String,
    pub month: String,
    #[serde(default = "default_report_type")]
    pub report_type: String,
    pub activity: PathBuf,
    pub jobs: PathBuf,
    pub sales: PathBuf,
}

fn default_report_type() -> String {
    "default".to_string()
}

impl PartitionSpec {
    pub fn key(&self) -> PartitionKey {
        PartitionKey::new(&self.person, &self.month, &self.report_type)
    }
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening manifest {path:?}"))?;
        let mut manifest: Manifest = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing manifest {path:?}"))?;
        manifest.validate()?;
        if let Some(base) = path.parent() {
            manifest.resolve_paths(base);
        }
        Ok(manifest)
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(text).context("Parsing manifest")?;
        manifest.validate()?;
        Ok(manifest)
    }

    fn validate(&self) -> Result<()> {
        for (idx, partition) in self.partitions.iter().enumerate() {
            ensure!(
                !partition.person.trim().is_empty() && !partition.month.trim().is_empty(),
                "Partition {} must name both a person and a month",
                idx + 1
            );
        }
        Ok(())
    }

    fn resolve_paths(&mut self, base: &Path) {
        let rebase = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        for partition in &mut self.partitions {
            rebase(&mut partition.activity);
            rebase(&mut partition.jobs);
            rebase(&mut partition.sales);
        }
    }
}
