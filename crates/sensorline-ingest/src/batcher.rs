//! Groups consecutive input lines into outbound batches

use std::path::Path;

use sensorline_common::Batch;
use tracing::warn;

use crate::parser::parse_line;

/// Readings of up to `batch_size` consecutive lines of one file
#[derive(Debug, Clone, PartialEq)]
pub struct LineGroup {
    /// 1-based line number of the first line in the group
    pub first_line: usize,
    /// 1-based line number of the last line in the group
    pub last_line: usize,
    pub batch: Batch,
}

#[derive(Debug, Clone, Copy)]
pub struct LineBatcher {
    batch_size: usize,
}

impl LineBatcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Split the content of `path` into groups of non-blank lines.
    ///
    /// Malformed lines are logged and skipped but still count towards their
    /// group. Groups without a single valid reading are dropped.
    pub fn split(&self, path: &Path, content: &str) -> Vec<LineGroup> {
        let mut groups = Vec::new();
        let mut current: Option<LineGroup> = None;
        let mut lines_in_group = 0;

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let line_number = index + 1;

            let group = current.get_or_insert_with(|| LineGroup {
                first_line: line_number,
                last_line: line_number,
                batch: Batch::new(),
            });
            group.last_line = line_number;
            lines_in_group += 1;

            match parse_line(line) {
                Ok(record) => group.batch.merge(record.into_batch()),
                Err(e) => warn!(
                    path = %path.display(),
                    line = line_number,
                    error = %e,
                    "Skipping malformed line"
                ),
            }

            if lines_in_group == self.batch_size {
                groups.extend(current.take().filter(|g| !g.batch.is_empty()));
                lines_in_group = 0;
            }
        }

        groups.extend(current.filter(|g| !g.batch.is_empty()));
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(minute: u32, sensors: &[(i64, f64)]) -> String {
        let map = sensors
            .iter()
            .map(|(id, t)| format!("\"{}\": {}", id, t))
            .collect::<Vec<_>>()
            .join(", ");
        format!("2024-05-01|08:{:02}:00|{{{}}}", minute, map)
    }

    #[test]
    fn test_groups_of_five_with_trailing_flush() {
        let content = (0..12)
            .map(|m| line(m, &[(1, m as f64)]))
            .collect::<Vec<_>>()
            .join("\n");
        let groups = LineBatcher::new(5).split(Path::new("in.txt"), &content);

        assert_eq!(groups.len(), 3);
        assert_eq!(groups[0].batch.len(), 5);
        assert_eq!(groups[1].batch.len(), 5);
        assert_eq!(groups[2].batch.len(), 2);
        assert_eq!((groups[2].first_line, groups[2].last_line), (11, 12));
    }

    #[test]
    fn test_merge_preserves_line_order_per_sensor() {
        let content = [
            line(0, &[(1, 10.0), (2, 20.0)]),
            line(1, &[(2, 21.0)]),
            line(2, &[(1, 11.0)]),
        ]
        .join("\n");
        let groups = LineBatcher::new(5).split(Path::new("in.txt"), &content);

        assert_eq!(groups.len(), 1);
        let batch = &groups[0].batch;
        let temps = |id| {
            batch
                .for_location(id)
                .iter()
                .map(|r| r.temperature)
                .collect::<Vec<_>>()
        };
        assert_eq!(temps(1), vec![10.0, 11.0]);
        assert_eq!(temps(2), vec![20.0, 21.0]);
    }

    #[test]
    fn test_blank_lines_do_not_count() {
        let content = format!("{}\n\n   \n{}\n", line(0, &[(1, 1.0)]), line(1, &[(1, 2.0)]));
        let groups = LineBatcher::new(2).split(Path::new("in.txt"), &content);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].batch.len(), 2);
        assert_eq!((groups[0].first_line, groups[0].last_line), (1, 4));
    }

    #[test]
    fn test_malformed_lines_skipped() {
        let content = [
            line(0, &[(1, 1.0)]),
            "garbage".to_string(),
            line(2, &[(1, 3.0)]),
        ]
        .join("\n");
        let groups = LineBatcher::new(5).split(Path::new("in.txt"), &content);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].batch.len(), 2);
    }

    #[test]
    fn test_group_without_valid_lines_dropped() {
        let content = ["bad", "worse", line(0, &[(1, 1.0)]).as_str()].join("\n");
        let groups = LineBatcher::new(2).split(Path::new("in.txt"), &content);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].first_line, 3);
    }

    #[test]
    fn test_empty_content() {
        assert!(LineBatcher::new(5).split(Path::new("in.txt"), "").is_empty());
    }
}
