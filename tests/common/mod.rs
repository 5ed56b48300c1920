#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::{TempDir, tempdir};

pub const ACTIVITY_CSV: &str = "\
Job ID,Action Performed,Date,Time,Agent
101.0,Call,2024-03-01,09:00,ann
101.0,Call,2024-03-02,10:00,ann
101.0,Email,2024-03-02,11:00,ann
102.0,Call,2024-03-03,12:00,ann
103.0,Visit,2024-03-04,13:00,ann
999.0,Call,2024-03-05,14:00,ann
";

pub const JOBS_CSV: &str = "\
job_id,Customer ID,Customer Name,Job Type
101,1,Alpha,Install
102,2,Alpha,Repair
103,3,Beta,Install
";

pub const SALES_CSV: &str = "\
Sold Job ID,Customer Id,Amount
102,2.0,150.00
103,3.0,90.50
104,4.0,40.00
";

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` under the workspace (creating parent directories) and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.temp_dir.path().join(name)).expect("read workspace file")
    }
}

/// Parses CSV text into header + rows of plain strings.
pub fn parse_csv(text: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(text.as_bytes());
    let headers = reader
        .headers()
        .expect("headers")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|r| r.expect("record").iter().map(str::to_string).collect())
        .collect();
    (headers, rows)
}
