// Wed Jan 15 2026 - Alex

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

pub struct ProgressManager {
    enabled: bool,
    style_template: String,
}

impl ProgressManager {
    pub fn new() -> Self {
        Self {
            enabled: true,
            style_template: "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}".to_string(),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_style(mut self, template: &str) -> Self {
        self.style_template = template.to_string();
        self
    }

    /// A bar over `total` steps; hidden when progress output is disabled.
    pub fn create(&self, total: u64, message: &str) -> ProgressBar {
        if !self.enabled {
            return ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden());
        }

        let pb = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template(&self.style_template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb.set_message(message.to_string());
        pb
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        Self::new()
    }
}
