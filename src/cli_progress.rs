/*!
 * Terminal renderer for Task progress
 *
 * Polls the observed Task collection from the UI thread (after the
 * dispatcher pump has run) and mirrors every Task onto an indicatif bar.
 */

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::core::{QueueSummary, Task, TaskList};

const BAR_TEMPLATE: &str =
    "{spinner:.green} {prefix:<24!} [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} {msg}";

struct TaskBar {
    bar: ProgressBar,
    finished: bool,
}

/// Multi-bar renderer, one bar per Task
pub struct TaskProgressRenderer {
    multi: MultiProgress,
    bars: Vec<TaskBar>,
    style: ProgressStyle,
}

impl TaskProgressRenderer {
    /// Create a renderer; `show_progress = false` draws nothing
    pub fn new(show_progress: bool) -> Self {
        let target = if show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");

        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Vec::new(),
            style,
        }
    }

    /// Bring the bars in line with the current Task states
    pub fn refresh(&mut self, tasks: &TaskList) {
        for (index, task) in tasks.snapshot().into_iter().enumerate() {
            if index == self.bars.len() {
                let bar = self.multi.add(ProgressBar::new(task.total_bytes));
                bar.set_style(self.style.clone());
                bar.set_prefix(task.display_name.clone());
                self.bars.push(TaskBar { bar, finished: false });
            }
            let entry = &mut self.bars[index];
            if !entry.finished {
                update_bar(&entry.bar, &task);
                entry.finished = task.is_terminal();
            }
        }
    }

    /// Number of bars created so far
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Print a line above the bars without tearing them
    pub fn println(&self, line: &str) {
        let _ = self.multi.println(line);
    }
}

fn update_bar(bar: &ProgressBar, task: &Task) {
    if task.total_bytes > 0 {
        bar.set_length(task.total_bytes);
    }
    bar.set_position(task.bytes_transferred);

    if task.completed {
        if task.total_bytes == 0 {
            bar.set_length(1);
            bar.set_position(1);
        }
        bar.finish_with_message(format!("✓ {}", task.status));
    } else if task.failed {
        bar.abandon_with_message(format!("✗ {}", task.status));
    } else {
        bar.set_message(task.status.clone());
    }
}

/// One-line batch report
pub fn format_summary(summary: &QueueSummary) -> String {
    let mut line = format!(
        "{} of {} transferred ({})",
        summary.completed,
        summary.total,
        format_bytes(summary.bytes_transferred)
    );
    if summary.failed > 0 {
        line.push_str(&format!(", {} failed", summary.failed));
    }
    if summary.pending > 0 {
        line.push_str(&format!(", {} unfinished", summary.pending));
    }
    line
}

/// Format bytes in human-readable format
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Direction, InlineDispatcher, TaskHandle, TransferUnit};

    fn push_task(list: &TaskList, name: &str, f: impl FnOnce(&mut Task) + Send + 'static) {
        let handle = TaskHandle::new(Task::from_unit(&TransferUnit::file(
            format!("/r/{}", name),
            format!("/l/{}", name),
            name,
            Direction::Download,
        )));
        handle.post(&InlineDispatcher, f);
        list.push(handle);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_048_576), "1.00 MB");
    }

    #[test]
    fn test_refresh_tracks_new_tasks() {
        let tasks = TaskList::new();
        let mut renderer = TaskProgressRenderer::new(false);
        assert!(renderer.is_empty());

        push_task(&tasks, "a", |t| {
            t.set_total_bytes(10);
            t.set_bytes_transferred(4);
        });
        renderer.refresh(&tasks);
        assert_eq!(renderer.len(), 1);
        assert_eq!(renderer.bars[0].bar.position(), 4);
        assert!(!renderer.bars[0].finished);

        push_task(&tasks, "b", |t| t.mark_failed("refused"));
        tasks.get(0).unwrap().update(|t| t.mark_completed());
        renderer.refresh(&tasks);
        assert_eq!(renderer.len(), 2);
        assert!(renderer.bars.iter().all(|b| b.finished));
    }

    #[test]
    fn test_format_summary() {
        let summary = QueueSummary {
            total: 7,
            completed: 6,
            failed: 1,
            pending: 0,
            bytes_transferred: 2048,
        };
        assert_eq!(format_summary(&summary), "6 of 7 transferred (2.00 KB), 1 failed");
    }
}
