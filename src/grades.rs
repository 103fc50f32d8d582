use crate::config::GradesConfig;

pub const NO_GRADE: &str = "N/A";

/// The ordered list of grade labels the model can emit, with a display
/// color per grade.
#[derive(Debug, Clone)]
pub struct GradeCatalog {
    grades: Vec<String>,
    palette: Vec<String>,
}

impl GradeCatalog {
    pub fn with_palette<I, S>(grades: I, palette: Vec<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut known: Vec<String> = Vec::new();
        for grade in grades {
            let grade = grade.into().trim().to_string();
            let folded = grade.to_lowercase();
            if grade.is_empty() || known.iter().any(|g| g.to_lowercase() == folded) {
                continue;
            }
            known.push(grade);
        }

        GradeCatalog {
            grades: known,
            palette,
        }
    }

    pub fn grades(&self) -> &[String] {
        &self.grades
    }

    pub fn len(&self) -> usize {
        self.grades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grades.is_empty()
    }

    /// Position of the known grade matching `label`, ignoring surrounding
    /// whitespace and case.
    pub fn index_of(&self, label: &str) -> Option<usize> {
        let cleaned = label.trim().to_lowercase();
        if cleaned.is_empty() {
            return None;
        }
        self.grades
            .iter()
            .position(|grade| grade.to_lowercase() == cleaned)
    }

    pub fn normalize(&self, label: &str) -> Option<&str> {
        self.index_of(label).map(|idx| self.grades[idx].as_str())
    }

    /// Palette entries are reused in order when there are more grades than
    /// colors.
    pub fn color(&self, idx: usize) -> &str {
        if self.palette.is_empty() {
            return "";
        }
        &self.palette[idx % self.palette.len()]
    }
}

impl Default for GradeCatalog {
    fn default() -> Self {
        GradeCatalog::from(&GradesConfig::default())
    }
}

impl From<&GradesConfig> for GradeCatalog {
    fn from(config: &GradesConfig) -> Self {
        GradeCatalog::with_palette(config.known.iter().cloned(), config.palette.clone())
    }
}
