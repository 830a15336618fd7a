//! 📊 progress.rs — "Are we there yet?" — every pipeline, every time, forever.
//!
//! Two things live here:
//! - [`Progress`]: the caller-visible progress record. Counters, a message, and
//!   the opaque `encoded_resume_info` that a later run resumes from. This is
//!   the persisted state layout. It round-trips through serde untouched.
//! - [`ProgressMetrics`]: the terminal display. An indicatif bar with a
//!   comfy-table of rates. Watching it will not make it go faster.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// -- 📏 binary units, not the marketing kind
const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// 🧾 The progress record a caller can read at any time and persist whenever.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Progress {
    pub sections_completed: u64,
    pub sections_remaining: u64,
    pub percent_complete: i64,
    pub message: String,
    /// 🔐 Opaque to callers. Hand it back unchanged to resume.
    pub encoded_resume_info: String,
}

impl Progress {
    /// 💾 The persisting form: counters, message, and fresh resume info.
    pub fn set_progress_complete(
        &mut self,
        completed: u64,
        scope: u64,
        message: impl Into<String>,
        encoded_resume_info: impl Into<String>,
    ) {
        self.set_counters(completed, scope);
        self.message = message.into();
        self.encoded_resume_info = encoded_resume_info.into();
    }

    /// 🔢 Counters only. Resume info stays whatever was last persisted.
    pub fn set_counters(&mut self, completed: u64, scope: u64) {
        self.sections_completed = completed;
        self.sections_remaining = scope;
        self.percent_complete = percent_of(completed, scope);
    }
}

/// 📐 `completed / scope * 100`, truncated. An empty scope is 0%.
pub(crate) fn percent_of(completed: u64, scope: u64) -> i64 {
    if scope == 0 {
        return 0;
    }
    (completed as f64 / scope as f64 * 100.0) as i64
}

/// 🤝 A shared handle to the progress record. Clone it, hand it to the
/// caller, and both sides see the same record.
///
/// Every change to `encoded_resume_info` is announced on a watch channel, so
/// a caller can persist mid-run saves as they happen ([`ProgressHandle::subscribe`]).
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    inner: Arc<SharedProgress>,
}

#[derive(Debug)]
struct SharedProgress {
    record: Mutex<Progress>,
    resume_info: watch::Sender<String>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self::new(Progress::default())
    }
}

impl ProgressHandle {
    pub fn new(progress: Progress) -> Self {
        let (the_resume_info, _) = watch::channel(progress.encoded_resume_info.clone());
        Self {
            inner: Arc::new(SharedProgress {
                record: Mutex::new(progress),
                resume_info: the_resume_info,
            }),
        }
    }

    /// 📸 A copy of the record right now.
    pub fn get(&self) -> Progress {
        self.inner.record.lock().clone()
    }

    pub fn encoded_resume_info(&self) -> String {
        self.inner.record.lock().encoded_resume_info.clone()
    }

    /// 🔔 Wakes whenever `encoded_resume_info` changes. Counter-only updates stay quiet.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.inner.resume_info.subscribe()
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Progress) -> R) -> R {
        let mut the_record = self.inner.record.lock();
        let the_result = f(&mut the_record);
        self.inner.resume_info.send_if_modified(|announced| {
            if *announced == the_record.encoded_resume_info {
                return false;
            }
            announced.clone_from(&the_record.encoded_resume_info);
            true
        });
        the_result
    }
}

/// 📦 Bytes in the unit the total is measured in, so "done / total" share one.
/// Because "1073741824 bytes" is a war crime in a UI.
fn format_bytes(bytes: u64, total_size: u64) -> String {
    if total_size >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if total_size >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if total_size >= KIB {
        format!("{:.2} KiB", bytes as f64 / KIB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// 🔢 "1000000 objects" → "1,000,000 objects" — you're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS or HH:MM:SS. If it shows HH:MM:SS, call your mom.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

/// 📡 Throughput at one moment.
struct Rates {
    objects_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 The terminal display. Objects on the bar, rates in the table.
///
/// Uses a sliding 5-second window for rates so spikes don't scare you.
pub struct ProgressMetrics {
    source_name: String,
    total_objects: u64,
    total_size: u64,
    done_objects: u64,
    done_bytes: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("total_objects", &self.total_objects)
            .field("done_objects", &self.done_objects)
            .field("done_bytes", &self.done_bytes)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A visible bar. `total_size` may be 0 when the store can't say.
    pub fn new(source_name: String, total_objects: u64, total_size: u64) -> Self {
        let progress_bar = ProgressBar::new(total_objects);
        // -- 🐛 a bad template only costs us the pretty bar, not the run
        if let Ok(style) = ProgressStyle::default_bar().template("{msg}\n| [{bar:40.cyan/blue}]") {
            progress_bar.set_style(style.progress_chars("=>-"));
        }
        Self::with_bar(source_name, total_objects, total_size, progress_bar)
    }

    /// 🙈 Same bookkeeping, nothing drawn. Tests and `show_progress = false`.
    pub fn hidden(source_name: String, total_objects: u64, total_size: u64) -> Self {
        Self::with_bar(source_name, total_objects, total_size, ProgressBar::hidden())
    }

    fn with_bar(
        source_name: String,
        total_objects: u64,
        total_size: u64,
        progress_bar: ProgressBar,
    ) -> Self {
        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));
        Self {
            source_name,
            total_objects,
            total_size,
            done_objects: 0,
            done_bytes: 0,
            progress_bar,
            rate_samples,
            start_time,
        }
    }

    /// 🔄 One object finished with `bytes` read.
    pub fn update(&mut self, bytes: u64) {
        self.done_objects += 1;
        self.done_bytes += bytes;
        let rates = self.calculate_rates();
        self.render(rates);
        self.progress_bar.set_position(self.done_objects);
    }

    pub fn done_objects(&self) -> u64 {
        self.done_objects
    }

    pub fn done_bytes(&self) -> u64 {
        self.done_bytes
    }

    /// ✅ Ring the bell. We made it. (Or we got cancelled. Same energy.)
    pub fn finish(&self) {
        self.progress_bar.finish();
    }

    fn calculate_rates(&mut self) -> Rates {
        let now = Instant::now();
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.done_objects, self.done_bytes));

        if let Some(&(oldest_time, oldest_objects, oldest_bytes)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let objects_delta = self.done_objects.saturating_sub(oldest_objects);
                let bytes_delta = self.done_bytes.saturating_sub(oldest_bytes);
                return Rates {
                    objects_per_sec: objects_delta as f64 / elapsed,
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB as f64,
                };
            }
        }

        Rates {
            objects_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    /// 🎨 Layout:
    /// ```text
    /// source: <name>
    /// | [=====>----------]
    ///   <objects/s>   <done objects / total>
    ///   <MiB/s>       <bytes>
    ///   <elapsed>     <remaining>
    /// ```
    fn render(&self, rates: Rates) {
        let percent = percent_of(self.done_objects, self.total_objects);
        let elapsed = self.start_time.elapsed();
        let remaining = if percent > 0 && percent < 100 {
            // 🔮 linear extrapolation — assumes the future looks like the past
            let total_estimated = elapsed.as_secs_f64() / (percent as f64 / 100.0);
            format_duration(Duration::from_secs_f64(
                (total_estimated - elapsed.as_secs_f64()).max(0.0),
            ))
        } else {
            "--:--".to_string()
        };

        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.add_row(vec![
            Cell::new(format!("{} Objects/s", format_number(rates.objects_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {} Objects ({}%)",
                format_number(self.done_objects),
                format_number(self.total_objects),
                percent
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!(
                "{} / {}",
                format_bytes(self.done_bytes, self.total_size),
                format_bytes(self.total_size, self.total_size)
            ))
            .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} elapsed", format_duration(elapsed)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} remaining", remaining)).set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}
