// Tue Jan 13 2026 - Alex

use crate::config::Config;
use crate::finders::CombinedResults;
use crate::output::report::{ReportFormat, ReportGenerator};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Writes a result set to every destination the configuration names.
pub struct OutputManager {
    targets: Vec<(ReportFormat, PathBuf)>,
}

impl OutputManager {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            targets: vec![(ReportFormat::Json, output_path)],
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut manager = Self::new(config.output_file.clone());
        if let Some(path) = &config.text_output_file {
            manager = manager.with_target(ReportFormat::Text, path.clone());
        }
        if let Some(path) = &config.markdown_output_file {
            manager = manager.with_target(ReportFormat::Markdown, path.clone());
        }
        manager
    }

    pub fn with_target(mut self, format: ReportFormat, path: PathBuf) -> Self {
        self.targets.push((format, path));
        self
    }

    pub fn targets(&self) -> &[(ReportFormat, PathBuf)] {
        &self.targets
    }

    pub fn save(&self, results: &CombinedResults, format: ReportFormat, path: &Path) -> io::Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        ReportGenerator::new(results).write(format, &mut file)?;
        file.flush()
    }

    /// Saves every target, returning the outcome for each in order.
    pub fn save_all(&self, results: &CombinedResults) -> Vec<(ReportFormat, &Path, io::Result<()>)> {
        self.targets
            .iter()
            .map(|(format, path)| {
                let outcome = self.save(results, *format, path);
                match &outcome {
                    Ok(()) => log::debug!("Wrote {} report to {}", format, path.display()),
                    Err(e) => log::error!("Failed to write {} report to {}: {}", format, path.display(), e),
                }
                (*format, path.as_path(), outcome)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::finders::StructureOffsetResult;

    #[test]
    fn test_targets_from_config() {
        let mut config = Config::default();
        config.markdown_output_file = Some(PathBuf::from("report.md"));
        let manager = OutputManager::from_config(&config);
        let formats: Vec<ReportFormat> = manager.targets().iter().map(|(f, _)| *f).collect();
        assert_eq!(formats, vec![ReportFormat::Json, ReportFormat::Markdown]);
    }

    #[test]
    fn test_save_all_writes_files() {
        let dir = std::env::temp_dir().join(format!("smkm-output-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let json = dir.join("offsets.json");
        let text = dir.join("offsets.txt");

        let mut results = CombinedResults::new();
        results.add_structure_offset(StructureOffsetResult::new("ST_DATA_MGR".into(), "sLocalTree".into(), Some(0)));

        let manager = OutputManager::new(json.clone()).with_target(ReportFormat::Text, text.clone());
        assert!(manager.save_all(&results).iter().all(|(_, _, r)| r.is_ok()));
        assert!(std::fs::read_to_string(&json).unwrap().contains("sLocalTree"));
        assert!(std::fs::read_to_string(&text).unwrap().contains("ST_DATA_MGR.sLocalTree: 0x0"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
