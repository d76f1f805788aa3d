/****************************************************************
 * $ID: tracker.rs  	Thu 15 Oct 2026 14:02:17+0800               *
 *                                                              *
 * Maintainer: 范美辉 (MeiHui FAN) <mhfan@ustc.edu>              *
 * Copyright (c) 2026 M.H.Fan, All rights reserved.             *
 ****************************************************************/

//! Offline experiment tracker, keeping each run in its own directory:
//!
//! ```text
//! <root>/<project>/run-<YYYYmmdd_HHMMSS>-<id>/
//!     config.json     run.json    history.jsonl   summary.json
//!     media/table/<key>_<step>.table.json
//!     media/images/<key>_<step>_<row>_<col>.png
//! ```

use std::{fs::{self, File}, io::{BufWriter, Write}, path::{Path, PathBuf}};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use crate::error::{Error, Result};

/// One history row (or the summary): metric name to value.
pub type Row = Map<String, Value>;

pub trait Tracker {
    /// Merge `row` into the pending row without committing it.
    fn stage(&mut self, row: Row) -> Result<()>;

    /// Commit the pending row as the next history step.
    fn commit(&mut self) -> Result<()>;

    fn log(&mut self, row: Row) -> Result<()> { self.stage(row)?; self.commit() }

    /// Stage `table` under `key`, to be committed with the next row.
    fn log_table(&mut self, key: &str, table: &Table) -> Result<()>;

    fn set_summary(&mut self, key: &str, value: Value) -> Result<()>;

    fn summary(&self) -> &Row;

    /// Run directory, if anything is persisted.
    fn dir(&self) -> Option<&Path>;

    /// Commit the pending row and close the run, later calls fail with `Error::Finished`.
    fn finish(&mut self) -> Result<()>;
}

/// History bookkeeping shared by the tracker backends.
#[derive(Debug, Default)] struct RunState {
    step: u64,
    pending: Row,
    summary: Row,
    finished: bool,
}

impl RunState {
    fn check(&self) -> Result<()> { if self.finished { Err(Error::Finished) } else { Ok(()) } }

    /// Take the pending row stamped with its step, latest values go to the summary.
    fn take(&mut self) -> Option<Row> {
        if self.pending.is_empty() { return None }
        let mut row = std::mem::take(&mut self.pending);
        row.iter().for_each(|(key, value)|
            { self.summary.insert(key.clone(), value.clone()); });

        row.insert("_step".into(), json!(self.step));
        self.step += 1;     Some(row)
    }
}

#[derive(Clone, Debug, PartialEq)] pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Image {
    /// 8-bit grayscale image, row major.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != width as usize * height as usize {
            return Err(Error::ImageShape { width, height, got: pixels.len() })
        }   Ok(Self { width, height, pixels })
    }

    pub fn width (&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }
    pub fn pixels(&self) -> &[u8] { &self.pixels }

    fn save(&self, path: &Path) -> Result<()> {
        image::GrayImage::from_raw(self.width, self.height, self.pixels.clone())
            .ok_or(Error::ImageShape { width: self.width, height: self.height,
                got: self.pixels.len() })?.save(path)?;     Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)] pub enum Cell { Int(i64), Float(f64), Image(Image), }

impl From<i64> for Cell { fn from(value: i64) -> Self { Self::Int(value) } }
impl From<f64> for Cell { fn from(value: f64) -> Self { Self::Float(value) } }
impl From<f32> for Cell { fn from(value: f32) -> Self { Self::Float(value as f64) } }
impl From<Image> for Cell { fn from(value: Image) -> Self { Self::Image(value) } }

#[derive(Clone, Debug, Default, PartialEq)] pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Table {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self { columns: columns.into_iter().map(Into::into).collect(), rows: Vec::new() }
    }

    pub fn add_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::TableShape { expected: self.columns.len(), got: row.len() })
        }   self.rows.push(row);    Ok(())
    }

    pub fn columns(&self) -> &[String] { &self.columns }
    pub fn rows(&self) -> &[Vec<Cell>] { &self.rows }
    pub fn len(&self) -> usize { self.rows.len() }
    pub fn is_empty(&self) -> bool { self.rows.is_empty() }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")] pub enum RunStatus { Running, Finished, Crashed, }

/// Content of `run.json`.
#[derive(Clone, Debug, Serialize, Deserialize)] pub struct RunMeta {
    pub id: String,
    pub project: String,
    pub state: RunStatus,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub git_hash: String,
    pub build_timestamp: String,
}

pub struct FileTracker {
    dir: PathBuf,
    meta: RunMeta,
    history: BufWriter<File>,
    state: RunState,
}

impl FileTracker {
    /// Create a new run directory under `<root>/<project>/` and record `config` in it.
    pub fn init<C: Serialize>(root: &Path, project: &str, config: &C) -> Result<Self> {
        let started = chrono::Local::now();
        let id = run_id();
        let dir = root.join(project)
            .join(format!("run-{}-{id}", started.format("%Y%m%d_%H%M%S")));
        fs::create_dir_all(dir.join("media"))?;

        fs::write(dir.join("config.json"), serde_json::to_string_pretty(config)?)?;
        let history = BufWriter::new(File::create(dir.join("history.jsonl"))?);

        let meta = RunMeta { id, project: project.into(), state: RunStatus::Running,
            started_at: started.to_rfc3339(), finished_at: None,
            git_hash: env!("BUILD_GIT_HASH").into(),
            build_timestamp: env!("BUILD_TIMESTAMP").into(),
        };
        let tracker = Self { dir, meta, history, state: RunState::default() };
        tracker.write_meta()?;      Ok(tracker)
    }

    pub fn meta(&self) -> &RunMeta { &self.meta }

    fn write_meta(&self) -> Result<()> {
        fs::write(self.dir.join("run.json"), serde_json::to_string_pretty(&self.meta)?)?;  Ok(())
    }

    fn save_cell(&self, cell: &Cell, stem: &str) -> Result<Value> { Ok(match cell {
        Cell::Int(value) => json!(value),
        Cell::Float(value) => json!(value),
        Cell::Image(image) => {
            let path = format!("media/images/{stem}.png");
            image.save(&self.dir.join(&path))?;
            json!({ "_type": "image-file", "path": path,
                "width": image.width(), "height": image.height() })
        }
    }) }
}

impl Tracker for FileTracker {
    fn stage(&mut self, row: Row) -> Result<()> {
        self.state.check()?;    self.state.pending.extend(row);     Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.state.check()?;
        if let Some(mut row) = self.state.take() {
            row.insert("_timestamp".into(),
                json!(chrono::Utc::now().timestamp_millis() as f64 / 1e3));
            serde_json::to_writer(&mut self.history, &row)?;
            writeln!(self.history)?;    self.history.flush()?;
        }   Ok(())
    }

    fn log_table(&mut self, key: &str, table: &Table) -> Result<()> {
        self.state.check()?;
        let (name, step) = (key.replace('/', "_"), self.state.step);
        fs::create_dir_all(self.dir.join("media").join("images"))?;
        fs::create_dir_all(self.dir.join("media").join("table"))?;

        let data = table.rows().iter().enumerate().map(|(r, row)|
            row.iter().enumerate().map(|(c, cell)|
                self.save_cell(cell, &format!("{name}_{step}_{r}_{c}")))
            .collect::<Result<Vec<_>>>()).collect::<Result<Vec<_>>>()?;

        let path = format!("media/table/{name}_{step}.table.json");
        fs::write(self.dir.join(&path), serde_json::to_string(
            &json!({ "columns": table.columns(), "data": data }))?)?;

        let mut row = Row::new();
        row.insert(key.into(), json!({ "_type": "table-file", "path": path,
            "nrows": table.len(), "ncols": table.columns().len() }));
        self.stage(row)
    }

    fn set_summary(&mut self, key: &str, value: Value) -> Result<()> {
        self.state.check()?;    self.state.summary.insert(key.into(), value);   Ok(())
    }

    fn summary(&self) -> &Row { &self.state.summary }

    fn dir(&self) -> Option<&Path> { Some(&self.dir) }

    fn finish(&mut self) -> Result<()> {
        self.commit()?;
        fs::write(self.dir.join("summary.json"),
            serde_json::to_string_pretty(&self.state.summary)?)?;

        self.meta.state = RunStatus::Finished;
        self.meta.finished_at = Some(chrono::Local::now().to_rfc3339());
        self.write_meta()?;     self.state.finished = true;     Ok(())
    }
}

impl Drop for FileTracker {
    fn drop(&mut self) {
        if self.state.finished { return }
        self.meta.state = RunStatus::Crashed;
        if let Err(err) = self.history.flush().map_err(Error::from)
            .and_then(|_| self.write_meta()) {
            log::warn!("Fail to close run {}: {err}", self.dir.display());
        }
    }
}

/// Disabled tracking: the same bookkeeping, nothing persisted.
#[derive(Debug, Default)] pub struct NoopTracker { state: RunState, }

impl NoopTracker { pub fn new() -> Self { Self::default() } }

impl Tracker for NoopTracker {
    fn stage(&mut self, row: Row) -> Result<()> {
        self.state.check()?;    self.state.pending.extend(row);     Ok(())
    }

    fn commit(&mut self) -> Result<()> { self.state.check()?;  self.state.take();  Ok(()) }

    fn log_table(&mut self, key: &str, table: &Table) -> Result<()> {
        let mut row = Row::new();
        row.insert(key.into(), json!({ "_type": "table", "nrows": table.len(),
            "ncols": table.columns().len() }));
        self.stage(row)
    }

    fn set_summary(&mut self, key: &str, value: Value) -> Result<()> {
        self.state.check()?;    self.state.summary.insert(key.into(), value);   Ok(())
    }

    fn summary(&self) -> &Row { &self.state.summary }

    fn dir(&self) -> Option<&Path> { None }

    fn finish(&mut self) -> Result<()> { self.commit()?;  self.state.finished = true;  Ok(()) }
}

/// 8 lowercase alphanumeric characters.
fn run_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..8).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

/// Build a [`Row`] from `key => value` pairs, values going through `serde_json::json!`.
#[macro_export] macro_rules! row {
    ($($key:expr => $value:expr),* $(,)?) => {{
        #[allow(unused_mut)] let mut row = $crate::tracker::Row::new();
        $( row.insert(::std::string::String::from($key), ::serde_json::json!($value)); )*
        row
    }};
}

#[cfg(test)] pub(crate) mod tests {
use super::*;
use crate::row;

pub(crate) fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mnist-exp-{name}-{}", run_id()));
    let _ = fs::remove_dir_all(&dir);   dir
}

pub(crate) fn read_history(dir: &Path) -> Result<Vec<Row>, Box<dyn std::error::Error>> {
    Ok(fs::read_to_string(dir.join("history.jsonl"))?.lines()
        .map(serde_json::from_str).collect::<Result<Vec<Row>, _>>()?)
}

#[test] fn table_shape() -> Result<(), Box<dyn std::error::Error>> {
    let mut table = Table::new(["pred", "target"]);
    table.add_row(vec![3i64.into(), 5i64.into()])?;
    assert!(matches!(table.add_row(vec![1i64.into()]),
        Err(Error::TableShape { expected: 2, got: 1 })));
    assert_eq!(table.len(), 1);

    assert!(matches!(Image::new(2, 2, vec![0; 3]), Err(Error::ImageShape { got: 3, .. })));
    assert!(matches!(Image::new(u32::MAX, u32::MAX, vec![]), Err(Error::ImageShape { .. })));
    assert_eq!(Image::new(2, 3, vec![9; 6])?.pixels().len(), 6);      Ok(())
}

#[test] fn stage_and_commit() -> Result<(), Box<dyn std::error::Error>> {
    let root = scratch_dir("tracker");
    let mut tracker = FileTracker::init(&root, "demo", &json!({ "lr": 1e-3 }))?;
    let dir = tracker.dir().ok_or("no run dir")?.to_path_buf();
    assert!(dir.starts_with(root.join("demo")));
    assert_eq!(tracker.meta().id.len(), 8);

    tracker.log(row!{ "loss" => 2.5, "epoch" => 0 })?;
    tracker.stage(row!{ "acc" => 0.5 })?;
    tracker.log(row!{ "loss" => 1.5 })?;
    tracker.commit()?;      // nothing pending
    tracker.set_summary("test_accuracy", json!(0.9))?;

    let mut table = Table::new(["image", "pred"]);
    table.add_row(vec![Image::new(2, 2, vec![0, 64, 128, 255])?.into(), 7i64.into()])?;
    tracker.log_table("predictions_table", &table)?;
    tracker.finish()?;
    assert!(matches!(tracker.log(row!{ "loss" => 0.1 }), Err(Error::Finished)));

    let history = read_history(&dir)?;
    assert_eq!(history.len(), 3);
    assert_eq!(history[1]["_step"], json!(1));
    assert_eq!(history[1]["acc"], json!(0.5));
    assert!(history[1].contains_key("_timestamp"));

    let table = &history[2]["predictions_table"];
    assert_eq!(table["nrows"], json!(1));
    let data: Value = serde_json::from_str(&fs::read_to_string(
        dir.join(table["path"].as_str().ok_or("no table path")?))?)?;
    assert_eq!(data["data"][0][1], json!(7));
    assert!(dir.join(data["data"][0][0]["path"].as_str().ok_or("no image")?).exists());

    let summary: Row = serde_json::from_str(&fs::read_to_string(dir.join("summary.json"))?)?;
    assert_eq!(summary["loss"], json!(1.5));
    assert_eq!(summary["epoch"], json!(0));
    assert_eq!(summary["test_accuracy"], json!(0.9));

    let meta: RunMeta = serde_json::from_str(&fs::read_to_string(dir.join("run.json"))?)?;
    assert_eq!(meta.state, RunStatus::Finished);
    let config: Value = serde_json::from_str(&fs::read_to_string(dir.join("config.json"))?)?;
    assert_eq!(config["lr"], json!(1e-3));

    fs::remove_dir_all(root)?;  Ok(())
}

#[test] fn unfinished_run_is_crashed() -> Result<(), Box<dyn std::error::Error>> {
    let root = scratch_dir("crash");
    let dir = {
        let mut tracker = FileTracker::init(&root, "demo", &json!({}))?;
        tracker.log(row!{ "loss" => 1.0 })?;
        tracker.dir().ok_or("no run dir")?.to_path_buf()
    };
    let meta: RunMeta = serde_json::from_str(&fs::read_to_string(dir.join("run.json"))?)?;
    assert_eq!(meta.state, RunStatus::Crashed);
    assert_eq!(read_history(&dir)?.len(), 1);
    fs::remove_dir_all(root)?;  Ok(())
}

#[test] fn failed_finish_is_crashed() -> Result<(), Box<dyn std::error::Error>> {
    let root = scratch_dir("finish");
    let dir = {
        let mut tracker = FileTracker::init(&root, "demo", &json!({}))?;
        let dir = tracker.dir().ok_or("no run dir")?.to_path_buf();
        fs::create_dir(dir.join("summary.json"))?;  // not writable as a file
        assert!(tracker.finish().is_err());     dir
    };
    let meta: RunMeta = serde_json::from_str(&fs::read_to_string(dir.join("run.json"))?)?;
    assert_eq!(meta.state, RunStatus::Crashed);
    fs::remove_dir_all(root)?;  Ok(())
}

#[test] fn disabled_tracking() -> Result<(), Box<dyn std::error::Error>> {
    let mut tracker = NoopTracker::new();
    tracker.stage(row!{ "a" => 1 })?;
    tracker.log(row!{ "b" => 2 })?;
    tracker.finish()?;
    assert!(tracker.dir().is_none());
    assert_eq!(tracker.summary()["a"], json!(1));
    assert!(tracker.finish().is_err());     Ok(())
}

}
