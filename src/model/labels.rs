use std::collections::BTreeMap;
use std::path::Path;

use crate::error::VisionError;

/// Sparse class-id → label mapping.
///
/// Label tables are sparse by design: detector label spaces have
/// intentional holes (ids that exist in the output space but name nothing),
/// and classification tables may be entirely absent when no labels file
/// ships with the weights. Absent ids are rendered through a formatting
/// fallback rather than treated as errors.
#[derive(Clone, Debug, Default)]
pub struct LabelTable {
    labels: BTreeMap<i64, String>,
}

impl LabelTable {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from explicit (id, label) pairs. Holes are preserved.
    pub fn from_pairs<I, S>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (i64, S)>,
        S: Into<String>,
    {
        Self {
            labels: pairs
                .into_iter()
                .map(|(id, label)| (id, label.into()))
                .collect(),
        }
    }

    /// Build a dense table from a labels file, one label per line, line
    /// number = class id. Blank lines are skipped but keep their index.
    pub fn from_lines_file(path: &Path) -> Result<Self, VisionError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VisionError::validation(
                "labels",
                format!("failed to read {}: {}", path.display(), e),
            )
        })?;
        let labels = raw
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| (idx as i64, line.trim().to_string()))
            .collect();
        Ok(Self { labels })
    }

    pub fn get(&self, id: i64) -> Option<&str> {
        self.labels.get(&id).map(String::as_str)
    }

    /// Label for `id`, or the documented `"id {n}"` fallback for holes.
    pub fn label_or_id(&self, id: i64) -> String {
        match self.get(id) {
            Some(label) => label.to_string(),
            None => format!("id {}", id),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holes_fall_back_to_id_formatting() {
        let table = LabelTable::from_pairs([(1, "person"), (3, "car")]);
        assert_eq!(table.label_or_id(1), "person");
        assert_eq!(table.label_or_id(2), "id 2");
        assert_eq!(table.label_or_id(999), "id 999");
    }

    #[test]
    fn empty_table_always_falls_back() {
        let table = LabelTable::empty();
        assert!(table.is_empty());
        assert_eq!(table.label_or_id(0), "id 0");
    }
}
